//! Chat orchestration against scripted providers

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use sitewright_chat::{
    ChatError, ChatOrchestrator, ChatSettings, MessageStatus, OFFLINE_TEMPLATE,
};
use sitewright_providers::{
    ChunkStream, ErrorKind, GenerateOptions, GenerateResult, ManagerSettings, Message, Provider,
    ProviderError, ProviderKind, ProviderManager, Role, StreamChunk,
};
use tokio_util::sync::CancellationToken;

struct ScriptedProvider {
    kind: ProviderKind,
    available: AtomicBool,
    reply: String,
    chunks: Mutex<Option<Vec<Result<StreamChunk, ProviderError>>>>,
    open_error: Option<ProviderError>,
    received: Mutex<Vec<Vec<Message>>>,
    calls: AtomicU32,
}

impl ScriptedProvider {
    fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            available: AtomicBool::new(true),
            reply: "batch reply".to_string(),
            chunks: Mutex::new(None),
            open_error: None,
            received: Mutex::new(Vec::new()),
            calls: AtomicU32::new(0),
        }
    }

    fn replying(mut self, reply: &str) -> Self {
        self.reply = reply.to_string();
        self
    }

    fn streaming(self, chunks: Vec<Result<StreamChunk, ProviderError>>) -> Self {
        *self.chunks.lock() = Some(chunks);
        self
    }

    fn failing_to_open(mut self, error: ProviderError) -> Self {
        self.open_error = Some(error);
        self
    }

    fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn last_request(&self) -> Vec<Message> {
        self.received.lock().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn default_model(&self) -> &str {
        "scripted"
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn generate(
        &self,
        messages: &[Message],
        options: &GenerateOptions,
    ) -> Result<GenerateResult, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.received.lock().push(messages.to_vec());
        if options.is_cancelled() {
            return Err(ProviderError::aborted());
        }
        Ok(GenerateResult {
            text: self.reply.clone(),
            finish_reason: Default::default(),
            usage: Default::default(),
            model: "scripted".to_string(),
            provider: None,
        })
    }

    async fn generate_stream(
        &self,
        messages: &[Message],
        _options: &GenerateOptions,
    ) -> Result<ChunkStream, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.received.lock().push(messages.to_vec());
        if let Some(e) = &self.open_error {
            return Err(e.clone());
        }
        let chunks = self.chunks.lock().clone().unwrap_or_else(|| {
            vec![
                Ok(StreamChunk::text(self.reply.clone())),
                Ok(StreamChunk::done(None)),
            ]
        });
        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}

fn manager_with(client: Arc<ScriptedProvider>) -> Arc<ProviderManager> {
    let kind = client.kind;
    let factory = move |requested: ProviderKind| -> Result<Arc<dyn Provider>, ProviderError> {
        if requested == kind {
            Ok(client.clone() as Arc<dyn Provider>)
        } else {
            Err(ProviderError::not_configured("no key").with_provider(requested))
        }
    };
    Arc::new(ProviderManager::new(
        Arc::new(factory),
        ManagerSettings::default(),
    ))
}

fn batch_settings() -> ChatSettings {
    ChatSettings {
        stream: false,
        ..ChatSettings::default()
    }
}

#[tokio::test]
async fn test_streamed_chunks_build_one_message() {
    let client = Arc::new(ScriptedProvider::new(ProviderKind::Google).streaming(vec![
        Ok(StreamChunk::text("Hel")),
        Ok(StreamChunk::text("lo")),
        Ok(StreamChunk::done(None)),
    ]));
    let mut chat = ChatOrchestrator::new(manager_with(client.clone()), ChatSettings::default());

    let mut updates = Vec::new();
    let reply = chat
        .submit_with("Say hello", |message| {
            assert_eq!(message.status, MessageStatus::Streaming);
            assert!(message.is_pending());
            updates.push(message.content.clone());
        })
        .await
        .unwrap();

    assert_eq!(reply.content, "Hello");
    assert_eq!(reply.status, MessageStatus::Complete);
    assert_eq!(reply.provider, Some(ProviderKind::Google));
    assert!(reply.id.starts_with("msg-"));
    assert_eq!(updates, vec!["Hel".to_string(), "Hello".to_string()]);

    let messages = chat.conversation().messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[1].content, "Hello");
    assert!(chat.preview().is_none());
}

#[tokio::test]
async fn test_offline_template_without_network() {
    let client = Arc::new(ScriptedProvider::new(ProviderKind::OpenAi));
    client.set_available(false);
    let mut chat = ChatOrchestrator::new(manager_with(client.clone()), ChatSettings::default());

    assert!(!chat.is_ready());
    let reply = chat.submit("A page for my bakery").await.unwrap();

    assert_eq!(reply.content, OFFLINE_TEMPLATE);
    assert_eq!(reply.status, MessageStatus::Offline);
    assert_eq!(reply.role, Role::Assistant);
    assert_eq!(chat.conversation().len(), 2);
    assert_eq!(chat.preview().unwrap().html, OFFLINE_TEMPLATE);
    assert_eq!(client.calls(), 0);
}

#[tokio::test]
async fn test_partial_stream_is_kept_as_interrupted() {
    let client = Arc::new(ScriptedProvider::new(ProviderKind::Anthropic).streaming(vec![
        Ok(StreamChunk::text("Partial")),
        Err(ProviderError::new(ErrorKind::Network, "connection reset")),
    ]));
    let mut chat = ChatOrchestrator::new(manager_with(client), ChatSettings::default());

    let err = chat.submit("Build it").await.unwrap_err();
    assert!(matches!(err, ChatError::Provider(ref e) if e.kind == ErrorKind::Network));
    assert!(err.user_message().contains("connection reset"));

    let last = chat.conversation().last().unwrap();
    assert_eq!(last.status, MessageStatus::Interrupted);
    assert_eq!(last.content, "Partial");
    assert!(!last.is_pending());
}

#[tokio::test]
async fn test_failure_before_output_removes_placeholder() {
    let client = Arc::new(
        ScriptedProvider::new(ProviderKind::Cohere)
            .failing_to_open(ProviderError::new(ErrorKind::InvalidRequest, "bad request")),
    );
    let mut chat = ChatOrchestrator::new(manager_with(client), ChatSettings::default());

    let err = chat.submit("Build it").await.unwrap_err();
    assert!(!err.is_aborted());

    let messages = chat.conversation().messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].role, Role::User);
}

#[tokio::test]
async fn test_html_reply_becomes_preview() {
    let reply = "Here you go:\n```html\n<!DOCTYPE html>\n<html><body><h1>Bakery</h1></body></html>\n```";
    let client = Arc::new(ScriptedProvider::new(ProviderKind::OpenAi).replying(reply));
    let mut chat = ChatOrchestrator::new(manager_with(client), batch_settings());

    let message = chat.submit("Bakery site").await.unwrap();
    let preview = chat.preview().unwrap();

    assert_eq!(
        preview.html,
        "<!DOCTYPE html>\n<html><body><h1>Bakery</h1></body></html>"
    );
    assert_eq!(preview.message_id, message.id);
    assert_eq!(message.content, reply);
}

#[tokio::test]
async fn test_batch_reply_records_provider() {
    let client = Arc::new(ScriptedProvider::new(ProviderKind::OpenAi).replying("Done"));
    let mut chat = ChatOrchestrator::new(manager_with(client.clone()), batch_settings());

    let reply = chat.submit("Hi").await.unwrap();
    assert_eq!(reply.content, "Done");
    assert_eq!(reply.provider, Some(ProviderKind::OpenAi));
    assert_eq!(client.calls(), 1);
}

#[tokio::test]
async fn test_history_skips_offline_turns() {
    let client = Arc::new(ScriptedProvider::new(ProviderKind::Google).replying("ok"));
    let mut chat = ChatOrchestrator::new(manager_with(client.clone()), batch_settings());

    client.set_available(false);
    chat.submit("first").await.unwrap();
    client.set_available(true);
    chat.submit("second").await.unwrap();

    let sent: Vec<String> = client
        .last_request()
        .into_iter()
        .map(|m| m.content)
        .collect();
    assert_eq!(sent, vec!["first".to_string(), "second".to_string()]);
    assert_eq!(chat.conversation().len(), 4);
}

#[tokio::test]
async fn test_history_window_is_bounded() {
    let client = Arc::new(ScriptedProvider::new(ProviderKind::Google).replying("ok"));
    let settings = ChatSettings {
        max_history: 3,
        ..batch_settings()
    };
    let mut chat = ChatOrchestrator::new(manager_with(client.clone()), settings);

    for i in 0..4 {
        chat.submit(&format!("turn {}", i)).await.unwrap();
    }

    let sent = client.last_request();
    assert_eq!(sent.len(), 3);
    assert_eq!(sent[2].content, "turn 3");
    assert_eq!(sent[0].role, Role::User);
}

#[tokio::test]
async fn test_cancelled_request_is_aborted() {
    let client = Arc::new(ScriptedProvider::new(ProviderKind::OpenAi));
    let mut chat = ChatOrchestrator::new(manager_with(client), batch_settings());

    let token = CancellationToken::new();
    token.cancel();
    let err = chat
        .submit_with_signal("Hi", Some(token), |_| {})
        .await
        .unwrap_err();

    assert!(err.is_aborted());
    assert_eq!(err.user_message(), "Request cancelled.");
    assert_eq!(chat.conversation().len(), 1);
}

#[tokio::test]
async fn test_empty_input_is_rejected() {
    let client = Arc::new(ScriptedProvider::new(ProviderKind::OpenAi));
    let mut chat = ChatOrchestrator::new(manager_with(client.clone()), ChatSettings::default());

    let err = chat.submit("   ").await.unwrap_err();
    assert!(matches!(err, ChatError::EmptyInput));
    assert!(chat.conversation().is_empty());
    assert_eq!(client.calls(), 0);
}

#[tokio::test]
async fn test_clear_resets_conversation_and_preview() {
    let client = Arc::new(ScriptedProvider::new(ProviderKind::OpenAi));
    client.set_available(false);
    let mut chat = ChatOrchestrator::new(manager_with(client), ChatSettings::default());

    chat.submit("anything").await.unwrap();
    assert!(chat.preview().is_some());

    chat.clear();
    assert!(chat.conversation().is_empty());
    assert!(chat.preview().is_none());
}
