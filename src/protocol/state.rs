use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of the device connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// A connection attempt is in flight
    Connecting,
    /// The transport is open
    Connected,
    /// No transport; either never connected, closed by the peer, or stopped
    Disconnected,
    /// The last attempt or the open transport failed
    Error,
}

/// Something that happened to the link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// `connect()` was called
    ConnectRequested,
    /// The reconnection delay elapsed
    ReconnectDue,
    /// The transport opened
    Opened,
    /// Opening the transport failed or timed out
    OpenFailed,
    /// The peer closed an open transport
    RemoteClosed,
    /// An open transport failed
    TransportFailed,
    /// `disconnect()` was called
    DisconnectRequested,
}

impl ConnectionState {
    /// Returns the state after `event`, or `None` when the event does not
    /// apply in this state and must be ignored.
    pub fn on_event(self, event: LinkEvent) -> Option<ConnectionState> {
        use ConnectionState::*;

        match (self, event) {
            (Disconnected | Error, LinkEvent::ConnectRequested | LinkEvent::ReconnectDue) => {
                Some(Connecting)
            }
            (Connecting, LinkEvent::Opened) => Some(Connected),
            (Connecting, LinkEvent::OpenFailed) => Some(Error),
            (Connected, LinkEvent::RemoteClosed) => Some(Disconnected),
            (Connected, LinkEvent::TransportFailed) => Some(Error),
            (Disconnected, LinkEvent::DisconnectRequested) => None,
            (_, LinkEvent::DisconnectRequested) => Some(Disconnected),
            _ => None,
        }
    }

    /// Whether a transport exists or is being created
    pub fn is_active(&self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Connected)
    }

    /// Returns the lowercase name of this state
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Error => "error",
        }
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        ConnectionState::Disconnected
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::ConnectionState::*;

    #[test]
    fn test_connection_flow() {
        let state = Disconnected;
        let state = state.on_event(LinkEvent::ConnectRequested).unwrap();
        assert_eq!(state, Connecting);
        let state = state.on_event(LinkEvent::Opened).unwrap();
        assert_eq!(state, Connected);
        let state = state.on_event(LinkEvent::RemoteClosed).unwrap();
        assert_eq!(state, Disconnected);
        let state = state.on_event(LinkEvent::ReconnectDue).unwrap();
        assert_eq!(state, Connecting);
    }

    #[test]
    fn test_failure_paths() {
        assert_eq!(Connecting.on_event(LinkEvent::OpenFailed), Some(Error));
        assert_eq!(Connected.on_event(LinkEvent::TransportFailed), Some(Error));
        assert_eq!(Error.on_event(LinkEvent::ReconnectDue), Some(Connecting));
        assert_eq!(Error.on_event(LinkEvent::ConnectRequested), Some(Connecting));
    }

    #[test]
    fn test_connect_is_idempotent() {
        assert_eq!(Connecting.on_event(LinkEvent::ConnectRequested), None);
        assert_eq!(Connected.on_event(LinkEvent::ConnectRequested), None);
        assert_eq!(Connected.on_event(LinkEvent::ReconnectDue), None);
    }

    #[test]
    fn test_disconnect_from_any_state() {
        for state in [Connecting, Connected, Error] {
            assert_eq!(state.on_event(LinkEvent::DisconnectRequested), Some(Disconnected));
        }
        assert_eq!(Disconnected.on_event(LinkEvent::DisconnectRequested), None);
    }

    #[test]
    fn test_invalid_transitions() {
        assert_eq!(Disconnected.on_event(LinkEvent::Opened), None);
        assert_eq!(Connected.on_event(LinkEvent::OpenFailed), None);
        assert_eq!(Connecting.on_event(LinkEvent::RemoteClosed), None);
        assert_eq!(Error.on_event(LinkEvent::TransportFailed), None);
    }

    #[test]
    fn test_state_names() {
        assert_eq!(Connected.to_string(), "connected");
        assert_eq!(serde_json::to_string(&Error).unwrap(), "\"error\"");
        assert_eq!(ConnectionState::default(), Disconnected);
        assert!(Connecting.is_active());
        assert!(!Error.is_active());
    }
}
