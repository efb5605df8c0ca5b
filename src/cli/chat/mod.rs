pub mod conversation_state;
pub mod prompt;
pub mod renderer;
pub mod session;

use std::io;
use std::process::ExitCode;

use color_print::cprintln;
use copypasta::{ClipboardContext, ClipboardProvider};
use eyre::Result;
use rustyline::error::ReadlineError;
use tracing::{info, warn};
use url::Url;

use crate::kb_client::KbClient;
use renderer::TerminalRenderer;
use session::ChatSession;

const WELCOME_TEXT: &str = "
Hi, I'm KB Chat. Ask me anything about the knowledge base.

Things to try
• Ask a question and press Enter.
• /example to drop a sample question into the input line.
• /strict to only answer from the knowledge base.
• /save to keep the last Q/A pair in the knowledge base.

/help         Show the help dialogue
/quit         Quit the application
";

const HELP_TEXT: &str = "
KB Chat CLI

/clear          Clear the conversation and start over
/strict         Toggle strict answering mode
/example        Put a sample question into the input line
/copy           Copy the last answer to the clipboard
/save           Save the last Q/A pair to the knowledge base
/export [path]  Write the transcript to a text file (default chat.txt)
/health         Check the backend status
/help           Show this help dialogue
/quit           Quit the application
";

const DEFAULT_EXPORT_PATH: &str = "chat.txt";

pub struct ChatContext {
    input: Option<String>,
    interactive: bool,
    session: ChatSession,
    pending_input: Option<String>,
}

impl ChatContext {
    pub fn new(server: Url, input: Option<String>, interactive: bool, strict: bool) -> Self {
        let renderer = TerminalRenderer::new(Box::new(io::stdout()));
        let mut session = ChatSession::new(KbClient::new(server), Box::new(renderer));
        session.set_strict(strict);
        Self {
            input,
            interactive,
            session,
            pending_input: None,
        }
    }

    pub async fn run(&mut self) -> Result<ExitCode> {
        if self.interactive {
            self.print_welcome();
        }
        self.session.refresh_health().await?;

        // Non-interactive mode (single query)
        if let Some(input) = self.input.take() {
            self.session.send(&input).await?;
            return Ok(ExitCode::SUCCESS);
        }

        if self.interactive {
            self.run_interactive().await?;
        }

        Ok(ExitCode::SUCCESS)
    }

    fn print_welcome(&self) {
        println!("{}", WELCOME_TEXT);
    }

    async fn run_interactive(&mut self) -> Result<()> {
        let mut rl = prompt::rl()?;

        loop {
            let prompt_text = prompt::generate_prompt(self.session.strict());
            let readline = match self.pending_input.take() {
                Some(initial) => rl.readline_with_initial(&prompt_text, (initial.as_str(), "")),
                None => rl.readline(&prompt_text),
            };

            match readline {
                Ok(line) => {
                    if line.trim().is_empty() {
                        continue;
                    }

                    rl.add_history_entry(line.as_str());

                    if line.trim() == "/quit" {
                        break;
                    }

                    if let Err(e) = self.handle_input(&line).await {
                        cprintln!("<red>Error: {}</red>", e);
                    }
                }
                Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
                Err(e) => {
                    cprintln!("<red>Error: {}</red>", e);
                    break;
                }
            }
        }

        Ok(())
    }

    async fn handle_input(&mut self, input: &str) -> Result<()> {
        let trimmed = input.trim();
        match trimmed {
            "/help" => {
                println!("{}", HELP_TEXT);
            }
            "/clear" => {
                self.session.reset()?;
                self.print_welcome();
                self.session.refresh_health().await?;
            }
            "/strict" => {
                let on = self.session.toggle_strict();
                println!("Strict mode: {}", if on { "ON" } else { "OFF" });
            }
            "/example" => {
                self.pending_input = Some(self.session.pick_example().to_string());
            }
            "/copy" => {
                self.copy_last_answer();
            }
            "/save" => {
                self.session.save_last_exchange().await?;
            }
            "/health" => {
                self.session.refresh_health().await?;
            }
            _ if trimmed == "/export" || trimmed.starts_with("/export ") => {
                let path = trimmed.trim_start_matches("/export").trim();
                let path = if path.is_empty() {
                    DEFAULT_EXPORT_PATH
                } else {
                    path
                };
                self.export_transcript(path)?;
            }
            _ => {
                self.session.send(input).await?;
            }
        }

        Ok(())
    }

    fn export_transcript(&self, path: &str) -> Result<()> {
        std::fs::write(path, self.session.export_transcript())?;
        info!("transcript written to {path}");
        println!("Transcript saved to {path}");
        Ok(())
    }

    /// Copies the last answer to the clipboard; when no clipboard is
    /// available the text lands in the input line instead.
    fn copy_last_answer(&mut self) {
        let Some(text) = self.session.last_assistant_text() else {
            return;
        };
        let text = text.to_string();
        match ClipboardContext::new().and_then(|mut ctx| ctx.set_contents(text.clone())) {
            Ok(()) => println!("Copied ✓"),
            Err(e) => {
                warn!("clipboard unavailable: {e}");
                self.pending_input = Some(text);
            }
        }
    }
}
