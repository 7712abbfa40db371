use serde::{Deserialize, Serialize};

/// Lifecycle state of the connection.
///
/// `Closed -> Connecting -> Connected -> Authenticating -> Authenticated -> Ready`,
/// with `LoggingOut -> Closed` as the explicit exit. Every open state can
/// fall back to `Closed` when the transport goes away.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Closed,
    Connecting,
    Connected,
    Authenticating,
    Authenticated,
    Ready,
    LoggingOut,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Closed => "closed",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Authenticating => "authenticating",
            ConnectionState::Authenticated => "authenticated",
            ConnectionState::Ready => "ready",
            ConnectionState::LoggingOut => "logging_out",
        }
    }

    /// A transport is attached.
    pub fn is_open(&self) -> bool {
        !matches!(self, ConnectionState::Closed | ConnectionState::Connecting)
    }

    pub fn can_transition(&self, to: ConnectionState) -> bool {
        use ConnectionState::*;
        match (self, to) {
            (Closed, Connecting) => true,
            (Connecting, Connected) => true,
            (Connected, Authenticating) => true,
            (Authenticating, Authenticated) => true,
            (Authenticated, Ready) => true,
            (Connected | Authenticating | Authenticated | Ready, LoggingOut) => true,
            (from, Closed) => *from != Closed,
            _ => false,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
