//! Workspace placeholder crate.
//!
//! This crate exists to expose shared feature flags that map to the individual
//! workspace crates (`core-auth`, `core-runtime`, `bridge-desktop`). Host
//! applications can depend on `cloudsync-workspace` and enable the documented
//! features without needing to wire each crate individually.

#[cfg(any(feature = "desktop-shims", feature = "headless"))]
pub use core_auth as auth;
#[cfg(any(feature = "desktop-shims", feature = "headless"))]
pub use core_runtime as runtime;

#[cfg(feature = "desktop-shims")]
pub use bridge_desktop as desktop;
