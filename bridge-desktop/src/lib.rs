//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! - `HttpClient` using `reqwest` with rustls
//! - `SettingsStore` using a SQLite-backed key-value table (`sqlx`)
//! - `Presenter` that writes authorization URLs and notices to `tracing`
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{ReqwestHttpClient, SqliteSettingsStore, TracingPresenter};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), bridge_traits::BridgeError> {
//!     let http_client = ReqwestHttpClient::new()?;
//!     let settings = SqliteSettingsStore::new("settings.db".into()).await?;
//!     let presenter = TracingPresenter::new();
//!
//!     // Hand them to core_runtime::config::CoreConfig::builder()
//!     Ok(())
//! }
//! ```

mod http;
mod presenter;
mod settings;

pub use http::ReqwestHttpClient;
pub use presenter::TracingPresenter;
pub use settings::SqliteSettingsStore;
