//! User-facing presentation hooks.
//!
//! The core never opens browsers or renders dialogs itself. It hands the
//! authorization URL and short notices to the host through [`Presenter`].

use async_trait::async_trait;

use crate::error::Result;

/// Severity of a notice shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// Host-side presentation capability.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::presentation::Presenter;
///
/// async fn begin(presenter: &dyn Presenter, url: &str) -> Result<()> {
///     presenter.present_authorization_url("googledrive", url).await
/// }
/// ```
#[async_trait]
pub trait Presenter: Send + Sync {
    /// Present an authorization URL to the user (open a browser, show a link).
    async fn present_authorization_url(&self, provider: &str, url: &str) -> Result<()>;

    /// Show a short human-readable notice.
    async fn notify(&self, level: NoticeLevel, message: &str) -> Result<()>;
}

/// Presenter that drops everything. Used by headless hosts and tests.
#[derive(Debug, Default, Clone)]
pub struct NoopPresenter;

#[async_trait]
impl Presenter for NoopPresenter {
    async fn present_authorization_url(&self, _provider: &str, _url: &str) -> Result<()> {
        Ok(())
    }

    async fn notify(&self, _level: NoticeLevel, _message: &str) -> Result<()> {
        Ok(())
    }
}
