//! Per-connection gateway session state.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};

use crate::models::user::UserProfile;

/// State for a single authenticated WebSocket connection.
pub struct GatewaySession {
    /// Unique connection identifier (`conn_` prefixed ULID).
    pub connection_id: String,
    pub user: UserProfile,
    pub authenticated_at: DateTime<Utc>,
    /// Monotonically increasing sequence number for dispatch frames.
    seq: AtomicU64,
}

impl GatewaySession {
    pub fn new(connection_id: String, user: UserProfile) -> Self {
        Self {
            connection_id,
            user,
            authenticated_at: Utc::now(),
            seq: AtomicU64::new(0),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user.id
    }

    /// Get the next sequence number for a dispatch frame.
    pub fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_starts_at_one() {
        let session = GatewaySession::new(
            "conn_1".into(),
            UserProfile {
                id: "usr_a".into(),
                name: "Ada".into(),
                email: None,
                role: "volunteer".into(),
            },
        );
        assert_eq!(session.next_seq(), 1);
        assert_eq!(session.next_seq(), 2);
        assert_eq!(session.user_id(), "usr_a");
    }
}
