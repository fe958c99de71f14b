use std::future::Future;
use std::pin::Pin;

use snafu::Snafu;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub provider_id: String,
    /// Somnia backend base URL.
    pub endpoint: String,
    /// OpenAI-compatible API root; `None` keeps the client's default.
    pub model_base_url: Option<String>,
    pub api_key: String,
    pub model_id: Option<String>,
}

impl ProviderConfig {
    pub fn new(
        provider_id: impl Into<String>,
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        model_id: Option<String>,
    ) -> Self {
        Self {
            provider_id: provider_id.into().trim().to_string(),
            endpoint: endpoint.into().trim().trim_end_matches('/').to_string(),
            model_base_url: None,
            api_key: api_key.into().trim().to_string(),
            model_id: model_id
                .map(|model_id| model_id.trim().to_string())
                .filter(|model_id| !model_id.is_empty()),
        }
    }

    pub fn with_model_base_url(mut self, model_base_url: Option<String>) -> Self {
        self.model_base_url = model_base_url
            .map(|url| url.trim().trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty());
        self
    }
}

/// Tags every event of one reply stream so consumers can drop stale chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub u64);

impl StreamId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyRequest {
    pub stream_id: StreamId,
    pub text: String,
}

impl ReplyRequest {
    pub fn new(stream_id: StreamId, text: impl Into<String>) -> Self {
        Self {
            stream_id,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEventPayload {
    Fragment(String),
    Done,
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEvent {
    pub stream_id: StreamId,
    pub payload: StreamEventPayload,
}

pub type ProviderWorker = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
pub type ProviderResult<T> = Result<T, ProviderError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ProviderError {
    #[snafu(display("missing API key for provider '{provider_id}'"))]
    MissingApiKey {
        stage: &'static str,
        provider_id: String,
    },
    #[snafu(display("provider '{provider_id}' is not supported"))]
    UnsupportedProvider {
        stage: &'static str,
        provider_id: String,
    },
    #[snafu(display("reply request {stream_id:?} has no text"))]
    EmptyRequest {
        stage: &'static str,
        stream_id: StreamId,
    },
    #[snafu(display("failed to build HTTP client on `{stage}`: {source}"))]
    BuildClient {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("request to {url} failed on `{stage}`: {source}"))]
    Transport {
        stage: &'static str,
        url: String,
        source: reqwest::Error,
    },
    #[snafu(display("endpoint {url} returned status {status}: {body}"))]
    ResponseStatus {
        stage: &'static str,
        url: String,
        status: u16,
        body: String,
    },
    #[snafu(display("http client failed on `{stage}`, {source}"))]
    HttpClient {
        stage: &'static str,
        source: rig::http_client::Error,
    },
    #[snafu(display("completions failed on `{stage}`, {source}"))]
    CompletionsFailed {
        stage: &'static str,
        source: rig::completion::CompletionError,
    },
}

/// Receiving half of one reply: a finite, non-restartable fragment sequence.
pub struct FragmentStream {
    stream_id: StreamId,
    events: mpsc::UnboundedReceiver<StreamEvent>,
    cancel_tx: Option<oneshot::Sender<()>>,
}

pub struct ProviderStreamHandle {
    pub stream: FragmentStream,
    pub worker: ProviderWorker,
}

impl FragmentStream {
    pub(crate) fn new(
        stream_id: StreamId,
        events: mpsc::UnboundedReceiver<StreamEvent>,
        cancel_tx: oneshot::Sender<()>,
    ) -> Self {
        Self {
            stream_id,
            events,
            cancel_tx: Some(cancel_tx),
        }
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.events.recv().await
    }

}

/// Dropping the receiving half is how a reply is cancelled.
impl Drop for FragmentStream {
    fn drop(&mut self) {
        if let Some(cancel_tx) = self.cancel_tx.take() {
            let _ = cancel_tx.send(());
        }
    }
}

pub trait ResponseProvider: Send + Sync {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn stream_reply(&self, request: ReplyRequest) -> ProviderResult<ProviderStreamHandle>;
}

pub(crate) fn make_event_stream(
    stream_id: StreamId,
) -> (
    mpsc::UnboundedSender<StreamEvent>,
    FragmentStream,
    oneshot::Receiver<()>,
) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (cancel_tx, cancel_rx) = oneshot::channel();
    (
        event_tx,
        FragmentStream::new(stream_id, event_rx, cancel_tx),
        cancel_rx,
    )
}

pub(crate) fn emit_error_event(
    event_tx: &mpsc::UnboundedSender<StreamEvent>,
    stream_id: StreamId,
    error: ProviderError,
) {
    let _ = event_tx.send(StreamEvent {
        stream_id,
        payload: StreamEventPayload::Error(error.to_string()),
    });
}
