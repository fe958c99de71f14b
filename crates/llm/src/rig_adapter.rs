use futures::StreamExt;
use rig::completion::{CompletionModel, Message as RigMessage};
use rig::prelude::CompletionClient;
use rig::providers::openai;
use rig::streaming::StreamedAssistantContent;
use snafu::{ResultExt, ensure};
use tokio::sync::{mpsc, oneshot};

use super::provider::{
    CompletionsFailedSnafu, EmptyRequestSnafu, HttpClientSnafu, MissingApiKeySnafu,
    ProviderConfig, ProviderError, ProviderResult, ProviderStreamHandle, ProviderWorker,
    ReplyRequest, ResponseProvider, StreamEvent, StreamEventPayload, StreamId, emit_error_event,
    make_event_stream,
};

pub const RIG_OPENAI_PROVIDER_ID: &str = "openai";
pub const DEFAULT_DREAM_MODEL: &str = "gpt-oss:120b-cloud";

pub const DREAM_PREAMBLE: &str = "You interpret dreams. Explain the dream the user describes \
from the standpoint of psychology and how the brain works. Answer in several points: what the \
dream means, how to improve the situation if the dream is a bad one, and what the dreamer \
should avoid. Reply in the language the dream is written in.";

type RigStreamingResponse = rig::streaming::StreamingCompletionResponse<
    rig::providers::openai::responses_api::streaming::StreamingCompletionResponse,
>;

/// Streams dream interpretations straight from an OpenAI-compatible API.
pub struct RigProvider {
    config: ProviderConfig,
}

impl RigProvider {
    pub fn new(config: ProviderConfig) -> ProviderResult<Self> {
        ensure!(
            !config.api_key.is_empty(),
            MissingApiKeySnafu {
                stage: "rig-provider-new",
                provider_id: config.provider_id.clone(),
            }
        );

        Ok(Self { config })
    }

    pub fn model_id(&self) -> &str {
        self.config
            .model_id
            .as_deref()
            .unwrap_or(DEFAULT_DREAM_MODEL)
    }

    fn build_client(config: &ProviderConfig) -> ProviderResult<openai::Client> {
        let mut builder = openai::Client::builder().api_key(config.api_key.as_str());
        if let Some(base_url) = config.model_base_url.as_deref() {
            builder = builder.base_url(base_url);
        }
        builder.build().context(HttpClientSnafu {
            stage: "rig-build-client",
        })
    }

    async fn open_stream(
        config: &ProviderConfig,
        model_id: String,
        request: &ReplyRequest,
    ) -> ProviderResult<RigStreamingResponse> {
        let client = Self::build_client(config)?;
        let model = client.completion_model(model_id);

        model
            .completion_request(RigMessage::user(request.text.clone()))
            .preamble(DREAM_PREAMBLE.to_string())
            .stream()
            .await
            .context(CompletionsFailedSnafu {
                stage: "rig-open-stream",
            })
    }

    fn map_stream_item<R>(stream_id: StreamId, item: StreamedAssistantContent<R>) -> Option<StreamEvent>
    where
        R: Clone + Unpin,
    {
        let fragment = match item {
            StreamedAssistantContent::Text(text) => text.text,
            // Only the visible answer reaches the transcript.
            StreamedAssistantContent::Reasoning(_)
            | StreamedAssistantContent::ReasoningDelta { .. }
            | StreamedAssistantContent::ToolCall { .. }
            | StreamedAssistantContent::ToolCallDelta { .. }
            | StreamedAssistantContent::Final(_) => return None,
        };

        if fragment.is_empty() {
            return None;
        }

        Some(StreamEvent {
            stream_id,
            payload: StreamEventPayload::Fragment(fragment),
        })
    }

    async fn run_stream_worker(
        config: ProviderConfig,
        model_id: String,
        request: ReplyRequest,
        event_tx: mpsc::UnboundedSender<StreamEvent>,
        mut cancel_rx: oneshot::Receiver<()>,
    ) {
        let stream_id = request.stream_id;
        let opened = tokio::select! {
            _ = &mut cancel_rx => {
                tracing::debug!(stream_id = ?stream_id, "rig stream cancelled before response");
                return;
            }
            opened = Self::open_stream(&config, model_id.clone(), &request) => opened,
        };

        let mut stream = match opened {
            Ok(stream) => stream,
            Err(error) => {
                tracing::error!(
                    stream_id = ?stream_id,
                    provider_id = %config.provider_id,
                    model_id = %model_id,
                    error = %error,
                    "failed to open rig stream"
                );
                emit_error_event(&event_tx, stream_id, error);
                return;
            }
        };

        let mut cancelled = false;
        let mut stream_failed = false;

        loop {
            tokio::select! {
                _ = &mut cancel_rx => {
                    cancelled = true;
                    tracing::debug!(stream_id = ?stream_id, "rig stream cancelled");
                    stream.cancel();
                    break;
                }
                next_item = stream.next() => {
                    match next_item {
                        Some(Ok(item)) => {
                            if let Some(event) = Self::map_stream_item(stream_id, item)
                                && event_tx.send(event).is_err()
                            {
                                return;
                            }
                        }
                        Some(Err(source)) => {
                            stream_failed = true;
                            tracing::warn!(
                                stream_id = ?stream_id,
                                error = %source,
                                "rig stream emitted an error chunk"
                            );
                            let error = ProviderError::CompletionsFailed {
                                stage: "rig-stream-chunk",
                                source,
                            };
                            emit_error_event(&event_tx, stream_id, error);
                            break;
                        }
                        None => break,
                    }
                }
            }
        }

        if !cancelled && !stream_failed {
            let _ = event_tx.send(StreamEvent {
                stream_id,
                payload: StreamEventPayload::Done,
            });
        }
    }
}

impl ResponseProvider for RigProvider {
    fn id(&self) -> &str {
        &self.config.provider_id
    }

    fn name(&self) -> &str {
        "Rig OpenAI"
    }

    fn stream_reply(&self, request: ReplyRequest) -> ProviderResult<ProviderStreamHandle> {
        ensure!(
            !request.text.trim().is_empty(),
            EmptyRequestSnafu {
                stage: "rig-stream-reply",
                stream_id: request.stream_id,
            }
        );

        let (event_tx, stream, cancel_rx) = make_event_stream(request.stream_id);
        let worker: ProviderWorker = Box::pin(Self::run_stream_worker(
            self.config.clone(),
            self.model_id().to_string(),
            request,
            event_tx,
            cancel_rx,
        ));

        Ok(ProviderStreamHandle { stream, worker })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::net::TcpListener;

    use super::*;

    fn config(api_key: &str) -> ProviderConfig {
        ProviderConfig::new(RIG_OPENAI_PROVIDER_ID, "", api_key, None)
    }

    #[test]
    fn missing_api_key_is_rejected() {
        assert!(matches!(
            RigProvider::new(config("  ")),
            Err(ProviderError::MissingApiKey { .. })
        ));
    }

    #[test]
    fn model_defaults_to_dream_model() {
        let provider = RigProvider::new(config("sk-test")).unwrap();
        assert_eq!(provider.model_id(), DEFAULT_DREAM_MODEL);

        let custom = RigProvider::new(ProviderConfig::new(
            RIG_OPENAI_PROVIDER_ID,
            "",
            "sk-test",
            Some("gpt-4o-mini".to_string()),
        ))
        .unwrap();
        assert_eq!(custom.model_id(), "gpt-4o-mini");
    }

    #[test]
    fn blank_request_is_rejected_before_spawning() {
        let provider = RigProvider::new(config("sk-test")).unwrap();
        let result = provider.stream_reply(ReplyRequest::new(StreamId::new(1), "   "));
        assert!(matches!(result, Err(ProviderError::EmptyRequest { .. })));
    }

    #[tokio::test]
    async fn dropping_the_stream_aborts_a_pending_open() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let (accepted_tx, accepted_rx) = oneshot::channel();

        // Accepts the request and never answers it.
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let _ = accepted_tx.send(());
            tokio::time::sleep(Duration::from_secs(60)).await;
            drop(socket);
        });

        let provider = RigProvider::new(
            config("sk-test").with_model_base_url(Some(format!("http://{address}/v1"))),
        )
        .unwrap();
        let handle = provider
            .stream_reply(ReplyRequest::new(StreamId::new(7), "a locked door"))
            .unwrap();
        let worker = tokio::spawn(handle.worker);

        accepted_rx.await.unwrap();
        drop(handle.stream);

        let finished = tokio::time::timeout(Duration::from_secs(5), worker).await;
        assert!(finished.is_ok(), "worker kept waiting after cancellation");
        server.abort();
    }
}
