//! Broadcast router: delivers events to rooms, users and single connections.
//!
//! Every connection owns a bounded outbound queue. Delivery never awaits: a
//! full queue drops the event for that connection only, so one slow client
//! cannot stall the others.

use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;

use super::events::ServerEvent;
use super::registry::{Outbound, RoomRegistry};

/// Capacity of each connection's outbound queue.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Outcome of a user-targeted delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Queued on this many connections.
    Delivered(usize),
    /// The user has no live connection.
    Undelivered,
}

/// Cloneable handle over the registry; store in AppState.
#[derive(Clone)]
pub struct Broadcaster {
    registry: Arc<RoomRegistry>,
}

impl Broadcaster {
    pub fn new(registry: Arc<RoomRegistry>) -> Self {
        Self { registry }
    }

    /// Send to every connection joined to `community_id`, optionally skipping
    /// one. Returns the number of connections the event was queued on.
    pub fn to_room(&self, community_id: &str, event: ServerEvent, except: Option<&str>) -> usize {
        let event = Arc::new(event);
        self.registry
            .room_connections(community_id)
            .iter()
            .filter(|id| Some(id.as_str()) != except)
            .filter(|id| self.push(id, Outbound::Dispatch(event.clone())))
            .count()
    }

    /// Send to every live connection of `user_id`.
    pub fn to_user(&self, user_id: &str, event: ServerEvent) -> Delivery {
        let connections = self.registry.user_connections(user_id);
        if connections.is_empty() {
            return Delivery::Undelivered;
        }
        let event = Arc::new(event);
        let delivered = connections
            .iter()
            .filter(|id| self.push(id, Outbound::Dispatch(event.clone())))
            .count();
        Delivery::Delivered(delivered)
    }

    pub fn to_connection(&self, connection_id: &str, event: ServerEvent) -> bool {
        self.push(connection_id, Outbound::Dispatch(Arc::new(event)))
    }

    fn push(&self, connection_id: &str, outbound: Outbound) -> bool {
        let Some(tx) = self.registry.sender(connection_id) else {
            return false;
        };
        match tx.try_send(outbound) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(connection_id, "outbound queue full; dropping event");
                false
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(connection_id, "outbound queue closed");
                false
            }
        }
    }
}
