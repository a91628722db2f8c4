use scout::providers::configs::OpenAiProviderConfig;
use scout::retriever::KnowledgeBaseConfig;

/// Shared application state.
///
/// Only collaborator configs live here; the agent itself is constructed per
/// request so no conversation state is shared across requests.
#[derive(Clone)]
pub struct AppState {
    pub provider_config: OpenAiProviderConfig,
    pub knowledge_base_config: KnowledgeBaseConfig,
}
