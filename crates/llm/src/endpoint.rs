use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use futures::StreamExt;
use serde::Serialize;
use snafu::{ResultExt, ensure};
use tokio::sync::{mpsc, oneshot};

use super::decoder::Utf8FragmentDecoder;
use super::provider::{
    BuildClientSnafu, EmptyRequestSnafu, ProviderConfig, ProviderError, ProviderResult,
    ProviderStreamHandle, ProviderWorker, ReplyRequest, ResponseProvider, ResponseStatusSnafu,
    StreamEvent, StreamEventPayload, TransportSnafu, emit_error_event, make_event_stream,
};

pub const ENDPOINT_PROVIDER_ID: &str = "endpoint";
pub const DEFAULT_ENDPOINT_BASE_URL: &str = "http://localhost:2717";
pub const INTERPRET_PATH: &str = "/ai/ollama";

/// Request body for the interpretation endpoint; the dream travels base64-encoded.
#[derive(Debug, Serialize)]
struct InterpretRequestBody {
    text: String,
}

/// Streams plain-text interpretations from the backend interpretation endpoint.
pub struct EndpointProvider {
    config: ProviderConfig,
    client: reqwest::Client,
}

impl EndpointProvider {
    pub fn new(config: ProviderConfig) -> ProviderResult<Self> {
        let client = reqwest::Client::builder()
            .build()
            .context(BuildClientSnafu {
                stage: "endpoint-build-client",
            })?;

        Ok(Self { config, client })
    }

    pub fn interpret_url(&self) -> String {
        let base = if self.config.endpoint.is_empty() {
            DEFAULT_ENDPOINT_BASE_URL
        } else {
            self.config.endpoint.as_str()
        };
        format!("{}{INTERPRET_PATH}", base.trim_end_matches('/'))
    }

    async fn open_stream(
        client: &reqwest::Client,
        url: &str,
        request: &ReplyRequest,
    ) -> ProviderResult<reqwest::Response> {
        let body = InterpretRequestBody {
            text: BASE64_STANDARD.encode(request.text.as_bytes()),
        };

        let response = client
            .post(url)
            .json(&body)
            .send()
            .await
            .context(TransportSnafu {
                stage: "endpoint-send-request",
                url: url.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return ResponseStatusSnafu {
                stage: "endpoint-http-status",
                url: url.to_string(),
                status: status.as_u16(),
                body,
            }
            .fail();
        }

        Ok(response)
    }

    async fn run_stream_worker(
        client: reqwest::Client,
        url: String,
        request: ReplyRequest,
        event_tx: mpsc::UnboundedSender<StreamEvent>,
        mut cancel_rx: oneshot::Receiver<()>,
    ) {
        let stream_id = request.stream_id;

        let opened = tokio::select! {
            _ = &mut cancel_rx => {
                tracing::debug!(stream_id = ?stream_id, "endpoint stream cancelled before response");
                return;
            }
            opened = Self::open_stream(&client, &url, &request) => opened,
        };

        let response = match opened {
            Ok(response) => response,
            Err(error) => {
                tracing::error!(
                    stream_id = ?stream_id,
                    url = %url,
                    error = %error,
                    "failed to open interpretation stream"
                );
                emit_error_event(&event_tx, stream_id, error);
                return;
            }
        };

        let mut body = response.bytes_stream();
        let mut decoder = Utf8FragmentDecoder::new();
        let mut fragment_count = 0_usize;

        loop {
            tokio::select! {
                _ = &mut cancel_rx => {
                    tracing::debug!(stream_id = ?stream_id, fragment_count, "endpoint stream cancelled");
                    return;
                }
                next_chunk = body.next() => {
                    let text = match next_chunk {
                        Some(Ok(chunk)) => decoder.push(&chunk),
                        Some(Err(source)) => {
                            tracing::warn!(
                                stream_id = ?stream_id,
                                error = %source,
                                "interpretation stream failed mid-body"
                            );
                            let error = ProviderError::Transport {
                                stage: "endpoint-read-chunk",
                                url: url.clone(),
                                source,
                            };
                            emit_error_event(&event_tx, stream_id, error);
                            return;
                        }
                        None => break,
                    };

                    if let Some(text) = text {
                        fragment_count += 1;
                        let event = StreamEvent {
                            stream_id,
                            payload: StreamEventPayload::Fragment(text),
                        };
                        if event_tx.send(event).is_err() {
                            return;
                        }
                    }
                }
            }
        }

        if let Some(tail) = decoder.finish() {
            let _ = event_tx.send(StreamEvent {
                stream_id,
                payload: StreamEventPayload::Fragment(tail),
            });
        }

        tracing::debug!(stream_id = ?stream_id, fragment_count, "interpretation stream finished");
        let _ = event_tx.send(StreamEvent {
            stream_id,
            payload: StreamEventPayload::Done,
        });
    }
}

impl ResponseProvider for EndpointProvider {
    fn id(&self) -> &str {
        &self.config.provider_id
    }

    fn name(&self) -> &str {
        "Interpretation endpoint"
    }

    fn stream_reply(&self, request: ReplyRequest) -> ProviderResult<ProviderStreamHandle> {
        ensure!(
            !request.text.trim().is_empty(),
            EmptyRequestSnafu {
                stage: "endpoint-stream-reply",
                stream_id: request.stream_id,
            }
        );

        let (event_tx, stream, cancel_rx) = make_event_stream(request.stream_id);
        let worker: ProviderWorker = Box::pin(Self::run_stream_worker(
            self.client.clone(),
            self.interpret_url(),
            request,
            event_tx,
            cancel_rx,
        ));

        Ok(ProviderStreamHandle { stream, worker })
    }
}
