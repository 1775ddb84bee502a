//! Connection state, disconnect reasons and the events fanned out to
//! registered handlers.

use nexuskit_proto::ProtocolEvent;

use crate::error::NexusError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting(u32),
    Disconnecting,
}

impl ConnectionState {
    /// Whether `self -> next` is a legal lifecycle transition.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connected, Disconnecting)
                | (Connected, Reconnecting(_))
                | (Reconnecting(_), Connecting)
                | (Reconnecting(_), Disconnected)
                | (Disconnecting, Disconnected)
        )
    }
}

#[derive(Debug, Clone)]
pub enum DisconnectReason {
    ClientInitiated,
    ServerInitiated,
    Error(String),
    HeartbeatTimeout,
    NetworkLost,
}

/// Structured event broadcast to every registered handler, in registration
/// order, before the operation that caused it returns.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    Connecting,
    Connected,
    Disconnected(DisconnectReasonEvent),
    Message(ProtocolEvent),
    Error(NexusErrorEvent),
    StateChange(ConnectionState, ConnectionState),
}

/// `DisconnectReason` is not `Clone`-trivial to carry a `NexusError`
/// verbatim through a `Clone` event payload, so the event carries a
/// rendered, stable description alongside the reason's shape.
#[derive(Debug, Clone)]
pub struct DisconnectReasonEvent {
    pub reason: DisconnectReasonKind,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReasonKind {
    ClientInitiated,
    ServerInitiated,
    Error,
    HeartbeatTimeout,
    NetworkLost,
}

impl From<&DisconnectReason> for DisconnectReasonEvent {
    fn from(reason: &DisconnectReason) -> Self {
        let (kind, detail) = match reason {
            DisconnectReason::ClientInitiated => (DisconnectReasonKind::ClientInitiated, String::new()),
            DisconnectReason::ServerInitiated => (DisconnectReasonKind::ServerInitiated, String::new()),
            DisconnectReason::Error(e) => (DisconnectReasonKind::Error, e.clone()),
            DisconnectReason::HeartbeatTimeout => (DisconnectReasonKind::HeartbeatTimeout, String::new()),
            DisconnectReason::NetworkLost => (DisconnectReasonKind::NetworkLost, String::new()),
        };
        Self { reason: kind, detail }
    }
}

/// A cloneable, renderable stand-in for `NexusError` inside broadcast
/// events (the error type itself wraps non-`Clone` sources).
#[derive(Debug, Clone)]
pub struct NexusErrorEvent {
    pub message: String,
}

impl From<&NexusError> for NexusErrorEvent {
    fn from(err: &NexusError) -> Self {
        Self {
            message: err.to_string(),
        }
    }
}
