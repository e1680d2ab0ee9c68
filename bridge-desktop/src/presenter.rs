//! Presenter that routes authorization URLs and notices to the log.
//!
//! Desktop shells without a UI layer (CLI tools, daemons) can surface the
//! URL through the terminal log and let the user open it by hand.

use async_trait::async_trait;
use bridge_traits::{
    error::Result,
    presentation::{NoticeLevel, Presenter},
};
use tracing::{error, info, warn};

#[derive(Debug, Default, Clone)]
pub struct TracingPresenter;

impl TracingPresenter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Presenter for TracingPresenter {
    async fn present_authorization_url(&self, provider: &str, url: &str) -> Result<()> {
        info!(provider, url, "Open this URL in a browser to authorize");
        Ok(())
    }

    async fn notify(&self, level: NoticeLevel, message: &str) -> Result<()> {
        match level {
            NoticeLevel::Info => info!(notice = message),
            NoticeLevel::Warning => warn!(notice = message),
            NoticeLevel::Error => error!(notice = message),
        }
        Ok(())
    }
}
