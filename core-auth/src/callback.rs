//! Host callback registration table.
//!
//! The host delivers authorization redirects to a named callback
//! (`cloud-sync-cb-<kind>`, `cloud-sync-cb-pro`). Handlers are registered
//! explicitly and looked up when a callback arrives.

use futures::future::BoxFuture;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

use crate::error::{AuthError, CallbackError, Result};

/// Query parameters of an authorization redirect.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CallbackParams(HashMap<String, String>);

impl CallbackParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Parameters from a full redirect URL such as
    /// `obsidian://cloud-sync-cb-box?code=...&state=...`.
    pub fn from_redirect_url(raw: &str) -> Result<Self> {
        let url = Url::parse(raw)
            .map_err(|e| AuthError::Configuration(format!("Invalid redirect URL: {e}")))?;
        Ok(url.query_pairs().into_owned().collect())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn code(&self) -> Option<&str> {
        self.get("code").filter(|code| !code.is_empty())
    }

    pub fn state(&self) -> Option<&str> {
        self.get("state")
    }

    /// Provider-reported failure (`error`, with `error_description` when present).
    pub fn error(&self) -> Option<String> {
        let code = self.get("error").filter(|e| !e.is_empty())?;
        Some(match self.get("error_description") {
            Some(description) if !description.is_empty() => format!("{code}: {description}"),
            _ => code.to_string(),
        })
    }
}

impl FromIterator<(String, String)> for CallbackParams {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Debug for CallbackParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&String> = self.0.keys().collect();
        keys.sort();
        f.debug_struct("CallbackParams").field("keys", &keys).finish()
    }
}

pub type CallbackHandler = Arc<dyn Fn(CallbackParams) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Table from callback identifier to handler.
#[derive(Default)]
pub struct CallbackRegistry {
    handlers: HashMap<String, CallbackHandler>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `id`, replacing any previous handler.
    pub fn register<F, Fut>(&mut self, id: impl Into<String>, handler: F)
    where
        F: Fn(CallbackParams) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let id = id.into();
        debug!(callback = %id, "Registering callback handler");
        let handler: CallbackHandler =
            Arc::new(move |params: CallbackParams| -> BoxFuture<'static, Result<()>> {
                Box::pin(handler(params))
            });
        self.handlers.insert(id, handler);
    }

    pub fn unregister(&mut self, id: &str) -> bool {
        self.handlers.remove(id).is_some()
    }

    pub fn is_registered(&self, id: &str) -> bool {
        self.handlers.contains_key(id)
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.handlers.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Run the handler registered for `id`.
    pub async fn dispatch(
        &self,
        id: &str,
        params: CallbackParams,
    ) -> std::result::Result<(), CallbackError> {
        let Some(handler) = self.handlers.get(id).cloned() else {
            warn!(callback = %id, "Callback delivered for unknown identifier");
            return Err(CallbackError::UnknownCallback(id.to_string()));
        };
        handler(params).await?;
        Ok(())
    }
}

impl fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("ids", &self.ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_dispatch_routes_to_registered_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = CallbackRegistry::new();
        let counter = calls.clone();
        registry.register("cloud-sync-cb-box", move |params: CallbackParams| {
            let counter = counter.clone();
            async move {
                assert_eq!(params.code(), Some("abc"));
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        registry
            .dispatch("cloud-sync-cb-box", CallbackParams::new().with("code", "abc"))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_callback() {
        let registry = CallbackRegistry::new();
        let err = registry
            .dispatch("cloud-sync-cb-dropbox", CallbackParams::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CallbackError::UnknownCallback(id) if id == "cloud-sync-cb-dropbox"));
    }

    #[tokio::test]
    async fn test_handler_errors_are_propagated() {
        let mut registry = CallbackRegistry::new();
        registry.register("cloud-sync-cb-pro", |_params| async {
            Err(AuthError::NoPendingSession {
                target: "pro".into(),
            })
        });
        let err = registry
            .dispatch("cloud-sync-cb-pro", CallbackParams::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CallbackError::Auth(AuthError::NoPendingSession { .. })
        ));
        assert!(registry.unregister("cloud-sync-cb-pro"));
        assert!(!registry.is_registered("cloud-sync-cb-pro"));
    }

    #[test]
    fn test_params_from_redirect_url() {
        let params = CallbackParams::from_redirect_url(
            "obsidian://cloud-sync-cb-koofr?code=c%2F1&state=xyz",
        )
        .unwrap();
        assert_eq!(params.code(), Some("c/1"));
        assert_eq!(params.state(), Some("xyz"));
        assert_eq!(params.error(), None);

        let denied = CallbackParams::new()
            .with("error", "access_denied")
            .with("error_description", "User said no");
        assert_eq!(denied.error().as_deref(), Some("access_denied: User said no"));
        assert!(!format!("{params:?}").contains("c/1"));
    }
}
