mod decoder;
mod endpoint;
mod provider;
mod rig_adapter;

use std::sync::Arc;

pub use decoder::Utf8FragmentDecoder;
pub use endpoint::{
    DEFAULT_ENDPOINT_BASE_URL, ENDPOINT_PROVIDER_ID, EndpointProvider, INTERPRET_PATH,
};
pub use provider::{
    FragmentStream, ProviderConfig, ProviderError, ProviderResult, ProviderStreamHandle,
    ProviderWorker, ReplyRequest, ResponseProvider, StreamEvent, StreamEventPayload, StreamId,
};
pub use rig_adapter::{DEFAULT_DREAM_MODEL, DREAM_PREAMBLE, RIG_OPENAI_PROVIDER_ID, RigProvider};

/// Builds the provider named by `config.provider_id`; an empty id means the backend endpoint.
pub fn create_provider(mut config: ProviderConfig) -> ProviderResult<Arc<dyn ResponseProvider>> {
    if config.provider_id.is_empty() {
        config.provider_id = ENDPOINT_PROVIDER_ID.to_string();
    }

    match config.provider_id.as_str() {
        ENDPOINT_PROVIDER_ID => Ok(Arc::new(EndpointProvider::new(config)?)),
        RIG_OPENAI_PROVIDER_ID | "rig-openai" => Ok(Arc::new(RigProvider::new(config)?)),
        _ => Err(ProviderError::UnsupportedProvider {
            stage: "create-provider",
            provider_id: config.provider_id,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_is_the_default_provider() {
        let provider = create_provider(ProviderConfig::new("", "", "", None)).unwrap();
        assert_eq!(provider.name(), "Interpretation endpoint");
        assert_eq!(provider.id(), ENDPOINT_PROVIDER_ID);
    }

    #[test]
    fn rig_aliases_resolve() {
        for id in [RIG_OPENAI_PROVIDER_ID, "rig-openai"] {
            let provider = create_provider(ProviderConfig::new(id, "", "sk-test", None)).unwrap();
            assert_eq!(provider.id(), id);
        }
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let result = create_provider(ProviderConfig::new("carrier-pigeon", "", "", None));
        assert!(matches!(
            result,
            Err(ProviderError::UnsupportedProvider { .. })
        ));
    }
}
