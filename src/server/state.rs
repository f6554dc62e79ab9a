use chrono::{DateTime, Utc};

use crate::broadcaster::PeerStatusBoard;

/// Shared state of the status server
#[derive(Clone)]
pub struct AppState {
    pub cluster_id: String,
    pub hostname: String,
    pub started_at: DateTime<Utc>,
    pub board: PeerStatusBoard,
}

impl AppState {
    pub fn new(cluster_id: impl Into<String>, board: PeerStatusBoard) -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());

        Self {
            cluster_id: cluster_id.into(),
            hostname,
            started_at: Utc::now(),
            board,
        }
    }

    /// Override the reported host name
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    pub fn peer_count(&self) -> usize {
        self.board.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_state_creation() {
        let state = AppState::new("c1", PeerStatusBoard::new());
        assert_eq!(state.cluster_id, "c1");
        assert!(!state.hostname.is_empty());
        assert_eq!(state.peer_count(), 0);
    }

    #[test]
    fn test_with_hostname() {
        let state = AppState::new("c1", PeerStatusBoard::new()).with_hostname("gw-0");
        assert_eq!(state.hostname, "gw-0");
    }
}
