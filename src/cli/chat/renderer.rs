use std::io::Write;

use color_print::cformat;
use crossterm::cursor;
use crossterm::terminal::{Clear, ClearType};
use crossterm::QueueableCommand;
use eyre::Result;

use super::conversation_state::Role;

/// Rendering surface for the conversation. The session only talks to this
/// trait, so the whole loop can run headless under test.
pub trait Renderer {
    fn append_message(&mut self, role: Role, text: &str, source: Option<&str>) -> Result<()>;
    fn show_typing(&mut self, on: bool) -> Result<()>;
    fn set_status(&mut self, status: &str) -> Result<()>;
    fn clear(&mut self) -> Result<()>;
}

/// Prints the conversation to a terminal, one role-tagged line per message.
/// The typing indicator is written without a newline and wiped in place once
/// the reply (or an error) lands.
pub struct TerminalRenderer {
    output: Box<dyn Write>,
    typing: bool,
}

impl TerminalRenderer {
    pub fn new(output: Box<dyn Write>) -> Self {
        Self {
            output,
            typing: false,
        }
    }

    fn wipe_typing_line(&mut self) -> Result<()> {
        self.output.queue(cursor::MoveToColumn(0))?;
        self.output.queue(Clear(ClearType::CurrentLine))?;
        self.output.flush()?;
        self.typing = false;
        Ok(())
    }
}

impl Renderer for TerminalRenderer {
    fn append_message(&mut self, role: Role, text: &str, source: Option<&str>) -> Result<()> {
        if self.typing {
            self.wipe_typing_line()?;
        }
        let tag = format!("{:<4}", role.tag());
        let avatar = match role {
            Role::User => cformat!("<s><blue>{}</blue></s>", tag),
            Role::Assistant => cformat!("<s><green>{}</green></s>", tag),
        };
        write!(self.output, "{avatar}{text}")?;
        if let Some(source) = source {
            write!(self.output, " {}", cformat!("<dim>[{}]</dim>", source))?;
        }
        writeln!(self.output)?;
        self.output.flush()?;
        Ok(())
    }

    fn show_typing(&mut self, on: bool) -> Result<()> {
        if on {
            write!(self.output, "{}", cformat!("<dim>AI   …</dim>"))?;
            self.output.flush()?;
            self.typing = true;
        } else if self.typing {
            self.wipe_typing_line()?;
        }
        Ok(())
    }

    fn set_status(&mut self, status: &str) -> Result<()> {
        if self.typing {
            self.wipe_typing_line()?;
        }
        writeln!(self.output, "{}", cformat!("<yellow>{}</yellow>", status))?;
        self.output.flush()?;
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.typing = false;
        self.output.queue(Clear(ClearType::All))?;
        self.output.queue(cursor::MoveTo(0, 0))?;
        self.output.flush()?;
        Ok(())
    }
}
