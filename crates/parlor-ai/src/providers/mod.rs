//! LLM Provider implementations

pub mod openai;

use crate::{Context, Error, MessageEventStream, Model, Result};
use async_trait::async_trait;

/// Trait for LLM providers
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Stream a response from the LLM
    async fn stream(&self, model: &Model, context: &Context) -> Result<MessageEventStream>;
}

/// Get an API key from a provided value or the environment
pub fn get_api_key(provided: Option<&str>, env_var: Option<&str>) -> Result<String> {
    if let Some(key) = provided.filter(|k| !k.is_empty()) {
        return Ok(key.to_string());
    }

    match env_var {
        Some(var) => std::env::var(var).map_err(|_| Error::InvalidApiKey),
        None => Err(Error::InvalidApiKey),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provided_key_wins() {
        let key = get_api_key(Some("sk-test"), Some("PARLOR_UNSET_KEY_VAR")).unwrap();
        assert_eq!(key, "sk-test");
    }

    #[test]
    fn test_missing_key() {
        let err = get_api_key(None, Some("PARLOR_DEFINITELY_UNSET_KEY_VAR")).unwrap_err();
        assert!(matches!(err, Error::InvalidApiKey));
        assert!(matches!(get_api_key(Some(""), None), Err(Error::InvalidApiKey)));
    }
}
