//! Network reachability state

use serde::{Deserialize, Serialize};

/// Network state as reported by the host platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkState {
    /// Network is available
    Online,
    /// Network is unavailable
    Offline,
    /// Not yet determined
    #[default]
    Unknown,
}

impl NetworkState {
    /// Whether requests can be expected to reach the server
    pub fn is_online(&self) -> bool {
        matches!(self, NetworkState::Online)
    }

    /// Whether moving from `previous` to `self` is a reconnect
    pub fn is_reconnect_from(&self, previous: NetworkState) -> bool {
        self.is_online() && !previous.is_online()
    }
}

impl std::fmt::Display for NetworkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkState::Online => write!(f, "online"),
            NetworkState::Offline => write!(f, "offline"),
            NetworkState::Unknown => write!(f, "unknown"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconnect_detection() {
        assert!(NetworkState::Online.is_reconnect_from(NetworkState::Offline));
        assert!(NetworkState::Online.is_reconnect_from(NetworkState::Unknown));
        assert!(!NetworkState::Online.is_reconnect_from(NetworkState::Online));
        assert!(!NetworkState::Offline.is_reconnect_from(NetworkState::Online));
    }

    #[test]
    fn test_display() {
        assert_eq!(NetworkState::Offline.to_string(), "offline");
        assert_eq!(NetworkState::default(), NetworkState::Unknown);
    }
}
