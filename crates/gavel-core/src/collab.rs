//! Collaborator seams for the outer system.
//!
//! The engine never assembles repository context or prompt templates itself;
//! it calls through these traits and ships whatever comes back.

use async_trait::async_trait;

use crate::error::AuditError;
use crate::types::SessionConfig;

/// Assembles the repository-context snippet pack sent to the judge.
#[async_trait]
pub trait ContextPacker: Send + Sync {
    async fn build_context_pack(&self, config: &SessionConfig) -> Result<String, AuditError>;
}

/// Supplies the per-session audit configuration (task, scope, thresholds)
/// and may be backed by the outer tool server's own config store.
pub trait SessionConfigProvider: Send + Sync {
    fn session_config(&self, session_id: Option<&str>) -> SessionConfig;
}

/// Sink for prompt-context continuity: the prompt builder stores what it
/// rendered so the next loop can refer back to it.
pub trait PromptContextSink: Send + Sync {
    fn store_prompt_context(
        &self,
        session_id: &str,
        context: serde_json::Value,
    ) -> Result<(), AuditError>;

    fn get_prompt_context(&self, session_id: &str)
    -> Result<Option<serde_json::Value>, AuditError>;
}

/// A fixed-config provider, good enough for callers without an outer store.
#[derive(Debug, Clone, Default)]
pub struct StaticConfigProvider {
    pub config: SessionConfig,
}

impl SessionConfigProvider for StaticConfigProvider {
    fn session_config(&self, _session_id: Option<&str>) -> SessionConfig {
        self.config.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_provider_ignores_session_id() {
        let provider = StaticConfigProvider {
            config: SessionConfig {
                task: "audit".into(),
                ..SessionConfig::default()
            },
        };
        assert_eq!(provider.session_config(None).task, "audit");
        assert_eq!(provider.session_config(Some("abc")).task, "audit");
    }
}
