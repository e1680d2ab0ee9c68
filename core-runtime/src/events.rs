//! # Event Bus System
//!
//! Typed event broadcasting for the credential core using `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! The event bus system consists of:
//! - **Event Types**: [`CoreEvent`] wrapping [`AuthEvent`] and [`EntitlementEvent`]
//! - **EventBus**: Central broadcast channel for publishing events
//! - **EventStream**: Wrapper for consuming events with filtering
//!
//! Hosts subscribe to refresh their settings UI when a backend signs in, a
//! token is refreshed, credentials are wiped or the entitlement list changes.
//! Payloads carry identifiers and timestamps only, never secrets.
//!
//! ```text
//! ┌──────────────────┐   emit    ┌───────────┐  subscribe  ┌────────────┐
//! │ CredentialManager├──────────>│ EventBus  ├────────────>│ Settings UI│
//! └──────────────────┘           └───────────┘             └────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{EventBus, CoreEvent, AuthEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let event_bus = EventBus::new(16);
//! let mut stream = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::Auth(AuthEvent::SignedIn {
//!         target: "googledrive".to_string(),
//!     }))
//!     .ok();
//!
//! let received = stream.recv().await.unwrap();
//! assert!(matches!(received, CoreEvent::Auth(AuthEvent::SignedIn { .. })));
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: Subscriber was too slow and missed `n` events.
//!   This is non-fatal; the subscriber can continue receiving new events.
//! - **`RecvError::Closed`**: All senders have been dropped. This indicates shutdown.
//!
//! Emitting with no subscribers returns `Err`; publishers treat that as a no-op.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 64;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Credential lifecycle events
    Auth(AuthEvent),
    /// Entitlement (Pro feature) events
    Entitlement(EntitlementEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Auth(e) => e.description(),
            CoreEvent::Entitlement(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Auth(AuthEvent::AuthError { .. }) => EventSeverity::Error,
            CoreEvent::Auth(AuthEvent::ReauthorizationRequired { .. }) => EventSeverity::Warning,
            CoreEvent::Auth(AuthEvent::CredentialsWiped { .. }) => EventSeverity::Warning,
            CoreEvent::Entitlement(EntitlementEvent::DeletionScheduled { .. }) => {
                EventSeverity::Warning
            }
            CoreEvent::Auth(AuthEvent::SignedIn { .. }) => EventSeverity::Info,
            CoreEvent::Auth(AuthEvent::Revoked { .. }) => EventSeverity::Info,
            CoreEvent::Entitlement(EntitlementEvent::Synced { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Authentication Events
// ============================================================================

/// Events of the per-target credential lifecycle.
///
/// `target` is the backend kind tag (`googledrive`, `box`, ...) or `pro`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum AuthEvent {
    /// An authorization URL was handed to the user.
    AuthorizationStarted { target: String },
    /// A pending authorization attempt was cancelled by the host.
    AuthorizationCancelled { target: String },
    /// Authorization code exchanged and tokens stored.
    SignedIn { target: String },
    /// Access token is being refreshed.
    TokenRefreshing { target: String },
    /// Token refresh completed successfully.
    TokenRefreshed {
        target: String,
        /// Epoch milliseconds at which the new access token expires.
        expires_at_ms: i64,
    },
    /// The provider rejected the refresh token; the user must sign in again.
    ReauthorizationRequired { target: String, message: String },
    /// Credentials were reset by an explicit revoke.
    Revoked { target: String },
    /// Credentials were wiped because their deletion deadline passed.
    CredentialsWiped { target: String },
    /// Authentication error occurred.
    AuthError {
        target: Option<String>,
        message: String,
        /// Whether the error is recoverable (e.g., retry possible).
        recoverable: bool,
    },
}

impl AuthEvent {
    fn description(&self) -> &str {
        match self {
            AuthEvent::AuthorizationStarted { .. } => "Authorization started",
            AuthEvent::AuthorizationCancelled { .. } => "Authorization cancelled",
            AuthEvent::SignedIn { .. } => "Signed in successfully",
            AuthEvent::TokenRefreshing { .. } => "Refreshing access token",
            AuthEvent::TokenRefreshed { .. } => "Token refreshed successfully",
            AuthEvent::ReauthorizationRequired { .. } => "Re-authorization required",
            AuthEvent::Revoked { .. } => "Credentials revoked",
            AuthEvent::CredentialsWiped { .. } => "Expired credentials wiped",
            AuthEvent::AuthError { .. } => "Authentication error",
        }
    }
}

// ============================================================================
// Entitlement Events
// ============================================================================

/// Events about Pro feature entitlements and the cleanup they drive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum EntitlementEvent {
    /// A fresh entitlement list replaced the stored one.
    Synced {
        /// Feature tags active right after the sync.
        active_features: Vec<String>,
    },
    /// A feature became active through a sync.
    FeatureActivated { feature: String },
    /// A previously active feature is no longer active.
    FeatureDeactivated { feature: String },
    /// A backend lost its gating feature and will be wiped at `at_ms`.
    DeletionScheduled { backend: String, at_ms: i64 },
    /// A pending deletion was cancelled because the feature is active again.
    DeletionCancelled { backend: String },
}

impl EntitlementEvent {
    fn description(&self) -> &str {
        match self {
            EntitlementEvent::Synced { .. } => "Entitlements synced",
            EntitlementEvent::FeatureActivated { .. } => "Feature activated",
            EntitlementEvent::FeatureDeactivated { .. } => "Feature deactivated",
            EntitlementEvent::DeletionScheduled { .. } => "Credential deletion scheduled",
            EntitlementEvent::DeletionCancelled { .. } => "Credential deletion cancelled",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event broadcasting hub.
///
/// Cloning is cheap; clones publish into the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    ///
    /// Subscribers that fall behind by more than `capacity` events receive
    /// `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an
    /// error if there are none.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    ///
    /// ```rust
    /// use core_runtime::events::EventBus;
    ///
    /// let event_bus = EventBus::new(8);
    /// assert_eq!(event_bus.subscriber_count(), 0);
    ///
    /// let _subscriber = event_bus.subscribe();
    /// assert_eq!(event_bus.subscriber_count(), 1);
    /// ```
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A wrapper around `broadcast::Receiver` with optional filtering.
///
/// ```rust
/// use core_runtime::events::{EventBus, EventStream, CoreEvent};
///
/// let event_bus = EventBus::new(8);
/// let entitlement_stream = EventStream::new(event_bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Entitlement(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events that match the predicate will be returned by `recv()`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receives the next event that passes the filter (if any).
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n` events.
    /// Returns `RecvError::Closed` if all senders have been dropped.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive an event without blocking.
    ///
    /// Returns `None` if no matching events are currently available.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_emission_no_subscribers() {
        let bus = EventBus::new(10);
        let event = CoreEvent::Auth(AuthEvent::Revoked {
            target: "box".to_string(),
        });

        assert!(bus.emit(event).is_err());
    }

    #[tokio::test]
    async fn test_multiple_subscribers_receive_same_event() {
        let bus = EventBus::new(10);
        let mut sub1 = bus.subscribe();
        let mut sub2 = bus.subscribe();

        let event = CoreEvent::Auth(AuthEvent::TokenRefreshed {
            target: "googledrive".to_string(),
            expires_at_ms: 1_700_000_000_000,
        });

        assert_eq!(bus.emit(event.clone()).unwrap(), 2);
        assert_eq!(sub1.recv().await.unwrap(), event);
        assert_eq!(sub2.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn test_event_stream_filter_skips_other_categories() {
        let bus = EventBus::new(10);
        let mut stream = EventStream::new(bus.subscribe())
            .filter(|event| matches!(event, CoreEvent::Entitlement(_)));

        bus.emit(CoreEvent::Auth(AuthEvent::SignedIn {
            target: "koofr".to_string(),
        }))
        .ok();
        let entitlement = CoreEvent::Entitlement(EntitlementEvent::FeatureDeactivated {
            feature: "feature-koofr".to_string(),
        });
        bus.emit(entitlement.clone()).ok();

        assert_eq!(stream.recv().await.unwrap(), entitlement);
        assert!(stream.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_lagged_subscriber() {
        let bus = EventBus::new(2);
        let mut stream = EventStream::new(bus.subscribe());

        for i in 0..4 {
            bus.emit(CoreEvent::Auth(AuthEvent::TokenRefreshing {
                target: format!("t{}", i),
            }))
            .ok();
        }

        assert!(matches!(stream.try_recv(), Some(Err(RecvError::Lagged(2)))));
    }

    #[test]
    fn test_severity_levels() {
        let wiped = CoreEvent::Auth(AuthEvent::CredentialsWiped {
            target: "pcloud".to_string(),
        });
        let error = CoreEvent::Auth(AuthEvent::AuthError {
            target: None,
            message: "boom".to_string(),
            recoverable: true,
        });
        let refreshing = CoreEvent::Auth(AuthEvent::TokenRefreshing {
            target: "box".to_string(),
        });

        assert_eq!(wiped.severity(), EventSeverity::Warning);
        assert_eq!(error.severity(), EventSeverity::Error);
        assert_eq!(refreshing.severity(), EventSeverity::Debug);
        assert!(error.severity() > wiped.severity());
    }

    #[test]
    fn test_event_serialization_shape() {
        let event = CoreEvent::Entitlement(EntitlementEvent::DeletionScheduled {
            backend: "box".to_string(),
            at_ms: 42,
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "Entitlement");
        assert_eq!(json["payload"]["event"], "DeletionScheduled");
        assert_eq!(json["payload"]["at_ms"], 42);

        let back: CoreEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
        assert_eq!(back.description(), "Credential deletion scheduled");
    }
}
