use eyre::Result;
use rand::Rng;
use tracing::{debug, warn};

use super::conversation_state::{ConversationState, Message, Role};
use super::renderer::Renderer;
use crate::kb_client::{ApiError, KbClient};

pub const EXAMPLE_PROMPTS: &[&str] = &[
    "What topics does the knowledge base cover?",
    "Who maintains this knowledge base?",
    "How do I add a new question and answer?",
    "What happens when no answer is found?",
];

struct TranscriptEntry {
    role: Role,
    text: String,
}

/// The conversation loop itself: bounded history, chat requests, health
/// polling, KB annotation and transcript export. Rendering goes through the
/// `Renderer` trait; nothing here knows about the terminal.
pub struct ChatSession {
    client: KbClient,
    state: ConversationState,
    transcript: Vec<TranscriptEntry>,
    renderer: Box<dyn Renderer>,
}

impl ChatSession {
    pub fn new(client: KbClient, renderer: Box<dyn Renderer>) -> Self {
        Self {
            client,
            state: ConversationState::new(),
            transcript: Vec::new(),
            renderer,
        }
    }

    pub fn strict(&self) -> bool {
        self.state.strict
    }

    pub fn set_strict(&mut self, on: bool) {
        self.state.strict = on;
    }

    pub fn toggle_strict(&mut self) -> bool {
        self.state.strict = !self.state.strict;
        self.state.strict
    }

    pub fn history(&self) -> &[Message] {
        self.state.history()
    }

    pub fn pick_example(&self) -> &'static str {
        let idx = rand::rng().random_range(0..EXAMPLE_PROMPTS.len());
        EXAMPLE_PROMPTS[idx]
    }

    /// Text of the most recently rendered assistant entry, error bubbles
    /// included.
    pub fn last_assistant_text(&self) -> Option<&str> {
        self.transcript
            .iter()
            .rev()
            .find(|e| e.role == Role::Assistant)
            .map(|e| e.text.as_str())
    }

    fn append(&mut self, role: Role, text: &str, source: Option<&str>) -> Result<()> {
        self.transcript.push(TranscriptEntry {
            role,
            text: text.to_string(),
        });
        self.renderer.append_message(role, text, source)
    }

    /// Sends one user message and renders the outcome. Empty input is
    /// ignored without touching the transcript or the network. Failures
    /// render as an assistant-side error bubble and never enter the history
    /// sent with later requests.
    pub async fn send(&mut self, message: &str) -> Result<()> {
        let message = message.trim();
        if message.is_empty() {
            return Ok(());
        }

        self.state.last_user_question = message.to_string();
        self.append(Role::User, message, None)?;
        self.state.push(Role::User, message);

        self.renderer.show_typing(true)?;
        match self
            .client
            .chat(message, self.state.strict, self.state.history())
            .await
        {
            Ok(reply) => {
                self.renderer.show_typing(false)?;
                self.state.last_assistant_answer = reply.answer.clone();
                let source = reply.source.as_deref().unwrap_or("?").to_uppercase();
                self.append(Role::Assistant, &reply.answer, Some(&source))?;
                self.state.push(Role::Assistant, &reply.answer);
            }
            Err(e) => {
                self.renderer.show_typing(false)?;
                self.append(Role::Assistant, &format!("Error: {e}"), None)?;
            }
        }
        Ok(())
    }

    /// Saves a question/answer pair to the knowledge base. No-op when either
    /// side is empty. A failed save leaves the error status standing.
    pub async fn add_to_kb(&mut self, question: &str, answer: &str) -> Result<()> {
        let question = question.trim();
        let answer = answer.trim();
        if question.is_empty() || answer.is_empty() {
            return Ok(());
        }

        self.renderer.set_status("Saving to KB…")?;
        match self.client.add_to_kb(question, answer).await {
            Ok(()) => {
                self.renderer.set_status("Saved to KB ✓")?;
                self.refresh_health().await?;
            }
            Err(e) => {
                warn!("kb add failed: {e}");
                self.renderer.set_status(&format!("KB save error: {e}"))?;
            }
        }
        Ok(())
    }

    /// `/save` operates on the last completed exchange.
    pub async fn save_last_exchange(&mut self) -> Result<()> {
        let question = self.state.last_user_question.clone();
        let answer = self.state.last_assistant_answer.clone();
        self.add_to_kb(&question, &answer).await
    }

    pub async fn refresh_health(&mut self) -> Result<()> {
        let status = match self.client.health().await {
            Ok(health) if health.ok => {
                format!("Status: OK | KB: yes ({})", health.kb_items)
            }
            Ok(_) => "Status: error".to_string(),
            Err(ApiError::Http(e)) if !e.is_decode() => {
                debug!("health endpoint unreachable: {e}");
                "Status: offline".to_string()
            }
            Err(e) => {
                debug!("health check failed: {e}");
                "Status: error".to_string()
            }
        };
        self.renderer.set_status(&status)
    }

    /// Serializes the rendered transcript as `[ROLE] text` lines with a
    /// blank line after each message. Pure and synchronous.
    pub fn export_transcript(&self) -> String {
        let mut out = String::new();
        for entry in &self.transcript {
            out.push_str(&format!("[{}] {}\n\n", entry.role.tag(), entry.text.trim()));
        }
        out
    }

    /// Clears transcript, history and session flags and resets the view.
    pub fn reset(&mut self) -> Result<()> {
        self.state.clear();
        self.transcript.clear();
        self.renderer.clear()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use serde_json::json;
    use url::Url;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[derive(Clone, Default)]
    struct Recorder {
        messages: Rc<RefCell<Vec<(Role, String, Option<String>)>>>,
        statuses: Rc<RefCell<Vec<String>>>,
        typing: Rc<RefCell<Vec<bool>>>,
        clears: Rc<RefCell<usize>>,
    }

    impl Renderer for Recorder {
        fn append_message(&mut self, role: Role, text: &str, source: Option<&str>) -> Result<()> {
            self.messages
                .borrow_mut()
                .push((role, text.to_string(), source.map(str::to_string)));
            Ok(())
        }

        fn show_typing(&mut self, on: bool) -> Result<()> {
            self.typing.borrow_mut().push(on);
            Ok(())
        }

        fn set_status(&mut self, status: &str) -> Result<()> {
            self.statuses.borrow_mut().push(status.to_string());
            Ok(())
        }

        fn clear(&mut self) -> Result<()> {
            *self.clears.borrow_mut() += 1;
            Ok(())
        }
    }

    fn session_for(uri: &str) -> (ChatSession, Recorder) {
        let recorder = Recorder::default();
        let client = KbClient::new(Url::parse(uri).unwrap());
        let session = ChatSession::new(client, Box::new(recorder.clone()));
        (session, recorder)
    }

    async fn mount_chat_ok(server: &MockServer, answer: &str, source: &str) {
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "answer": answer,
                "source": source,
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn whitespace_only_input_is_a_silent_noop() {
        let server = MockServer::start().await;
        let (mut session, recorder) = session_for(&server.uri());

        session.send("   ").await.unwrap();

        assert!(recorder.messages.borrow().is_empty());
        assert!(recorder.typing.borrow().is_empty());
        assert!(session.history().is_empty());
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn successful_exchange_renders_and_records_both_sides() {
        let server = MockServer::start().await;
        mount_chat_ok(&server, "Hola, ¿en qué ayudo?", "kb").await;
        let (mut session, recorder) = session_for(&server.uri());

        session.send("Hola").await.unwrap();

        let messages = recorder.messages.borrow();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0], (Role::User, "Hola".to_string(), None));
        assert_eq!(
            messages[1],
            (
                Role::Assistant,
                "Hola, ¿en qué ayudo?".to_string(),
                Some("KB".to_string())
            )
        );
        assert_eq!(*recorder.typing.borrow(), vec![true, false]);

        assert_eq!(session.history().len(), 2);
        assert_eq!(session.history()[0], Message::new(Role::User, "Hola"));
        assert_eq!(
            session.history()[1],
            Message::new(Role::Assistant, "Hola, ¿en qué ayudo?")
        );
    }

    #[tokio::test]
    async fn failed_exchange_renders_error_but_keeps_it_out_of_history() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "ok": false,
                "error": "boom",
            })))
            .mount(&server)
            .await;
        let (mut session, recorder) = session_for(&server.uri());

        session.send("Hola").await.unwrap();

        let messages = recorder.messages.borrow();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].1, "Error: boom");
        assert_eq!(*recorder.typing.borrow(), vec![true, false]);

        // Only the user message goes into later request context.
        assert_eq!(session.history().len(), 1);
        assert_eq!(session.history()[0].role, Role::User);
    }

    #[tokio::test]
    async fn nine_exchanges_keep_only_the_latest_eight_entries() {
        let server = MockServer::start().await;
        mount_chat_ok(&server, "ack", "kb").await;
        let (mut session, _recorder) = session_for(&server.uri());

        for i in 0..9 {
            session.send(&format!("q{i}")).await.unwrap();
        }

        assert_eq!(session.history().len(), 8);
        // 9 exchanges produce 18 entries; the window holds the last 8.
        assert_eq!(session.history()[0], Message::new(Role::User, "q5"));
        assert_eq!(session.history()[7], Message::new(Role::Assistant, "ack"));
    }

    #[tokio::test]
    async fn export_matches_the_documented_byte_format() {
        let server = MockServer::start().await;
        mount_chat_ok(&server, "Hello", "kb").await;
        let (mut session, _recorder) = session_for(&server.uri());

        session.send("Hi").await.unwrap();

        assert_eq!(session.export_transcript(), "[USR] Hi\n\n[AI] Hello\n\n");
    }

    #[tokio::test]
    async fn health_ok_reports_item_count() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "kb_items": 42,
            })))
            .mount(&server)
            .await;
        let (mut session, recorder) = session_for(&server.uri());

        session.refresh_health().await.unwrap();

        assert_eq!(*recorder.statuses.borrow(), vec!["Status: OK | KB: yes (42)"]);
    }

    #[tokio::test]
    async fn health_not_ok_reports_generic_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": false })))
            .mount(&server)
            .await;
        let (mut session, recorder) = session_for(&server.uri());

        session.refresh_health().await.unwrap();

        assert_eq!(*recorder.statuses.borrow(), vec!["Status: error"]);
    }

    #[tokio::test]
    async fn health_unreachable_reports_offline() {
        // A pooled `MockServer::start()` keeps its port listening after drop;
        // a dedicated server actually releases it, making the URI unreachable.
        let server = MockServer::builder().start().await;
        let uri = server.uri();
        drop(server);
        let (mut session, recorder) = session_for(&uri);

        session.refresh_health().await.unwrap();

        assert_eq!(*recorder.statuses.borrow(), vec!["Status: offline"]);
    }

    #[tokio::test]
    async fn kb_save_confirms_and_refreshes_health() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/kb/add"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "kb_items": 7,
            })))
            .expect(1)
            .mount(&server)
            .await;
        let (mut session, recorder) = session_for(&server.uri());

        session.add_to_kb("q", "a").await.unwrap();

        assert_eq!(
            *recorder.statuses.borrow(),
            vec!["Saving to KB…", "Saved to KB ✓", "Status: OK | KB: yes (7)"]
        );
    }

    #[tokio::test]
    async fn kb_save_failure_leaves_error_status_standing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/kb/add"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "ok": false,
                "error": "disk full",
            })))
            .mount(&server)
            .await;
        let (mut session, recorder) = session_for(&server.uri());

        session.add_to_kb("q", "a").await.unwrap();

        assert_eq!(
            *recorder.statuses.borrow(),
            vec!["Saving to KB…", "KB save error: disk full"]
        );
    }

    #[tokio::test]
    async fn kb_save_with_empty_side_is_a_noop() {
        let server = MockServer::start().await;
        let (mut session, recorder) = session_for(&server.uri());

        session.add_to_kb("", "answer").await.unwrap();
        session.add_to_kb("question", "  ").await.unwrap();

        assert!(recorder.statuses.borrow().is_empty());
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reset_clears_history_transcript_and_flags() {
        let server = MockServer::start().await;
        mount_chat_ok(&server, "ack", "kb").await;
        let (mut session, recorder) = session_for(&server.uri());

        session.send("Hola").await.unwrap();
        session.set_strict(true);
        session.reset().unwrap();

        assert!(session.history().is_empty());
        assert!(!session.strict());
        assert!(session.export_transcript().is_empty());
        assert!(session.last_assistant_text().is_none());
        assert_eq!(*recorder.clears.borrow(), 1);
    }

    #[tokio::test]
    async fn last_assistant_text_sees_the_latest_bubble() {
        let server = MockServer::start().await;
        mount_chat_ok(&server, "second", "kb").await;
        let (mut session, _recorder) = session_for(&server.uri());

        assert!(session.last_assistant_text().is_none());
        session.send("one").await.unwrap();
        session.send("two").await.unwrap();
        assert_eq!(session.last_assistant_text(), Some("second"));
    }
}
