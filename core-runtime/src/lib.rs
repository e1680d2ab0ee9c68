//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the credential core:
//! - Logging and tracing infrastructure
//! - Configuration management (host bridges and lifecycle timing)
//! - Event bus system
//!
//! ## Overview
//!
//! `core-auth` builds its `CredentialManager` from a [`config::CoreConfig`]
//! and publishes lifecycle changes on an [`events::EventBus`]. Hosts call
//! [`logging::init_logging`] once at startup.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
