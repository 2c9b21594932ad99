//! Primary-key / default-key retry policy
//!
//! A request first uses the user-configured key when one is set, otherwise the
//! built-in default. An authentication rejection of a user key is retried
//! exactly once with the default key; every other failure propagates as-is.

use crate::gateway::GatewayError;
use std::future::Future;

/// Which key an attempt was made with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    User,
    Default,
}

/// Run `attempt` under the key-fallback policy.
pub async fn with_key_fallback<F, Fut>(
    user_key: Option<String>,
    default_key: Option<String>,
    mut attempt: F,
) -> Result<String, GatewayError>
where
    F: FnMut(String, KeySource) -> Fut,
    Fut: Future<Output = Result<String, GatewayError>>,
{
    let user_key = user_key.filter(|key| !key.trim().is_empty());
    let default_key = default_key.filter(|key| !key.trim().is_empty());

    let (first_key, source) = match (&user_key, &default_key) {
        (Some(key), _) => (key.clone(), KeySource::User),
        (None, Some(key)) => (key.clone(), KeySource::Default),
        (None, None) => {
            return Err(GatewayError::auth_failed(
                "No API key configured. Run 'forge --setup' or set OPENROUTER_API_KEY.",
            ))
        }
    };

    match attempt(first_key.clone(), source).await {
        Ok(text) => Ok(text),
        Err(err) if err.is_auth_failure() && source == KeySource::User => match default_key {
            Some(default) if default != first_key => {
                tracing::warn!("configured API key was rejected; retrying with the default key");
                attempt(default, KeySource::Default).await
            }
            _ => Err(err),
        },
        Err(err) => Err(err),
    }
}
