use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::{BuildingStatus, DdsStatus, LockupAction, LockupReason, MemberSummary};

const DEFAULT_CAPACITY: usize = 256;

/// Events pushed to dashboards and TV displays over the WebSocket channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LiveEvent {
    CheckedIn {
        member: MemberSummary,
        kiosk_id: Option<String>,
        at: DateTime<Utc>,
    },
    CheckedOut {
        member: MemberSummary,
        at: DateTime<Utc>,
    },
    BulkCheckout {
        members: usize,
        visitors: usize,
        at: DateTime<Utc>,
    },
    VisitorSignedIn {
        visitor_id: Uuid,
        full_name: String,
        at: DateTime<Utc>,
    },
    VisitorSignedOut {
        visitor_id: Uuid,
        at: DateTime<Utc>,
    },
    LockupChanged {
        action: LockupAction,
        reason: LockupReason,
        building_status: BuildingStatus,
        holder_id: Option<Uuid>,
        at: DateTime<Utc>,
    },
    DdsChanged {
        duty_date: NaiveDate,
        member_id: Uuid,
        status: DdsStatus,
        at: DateTime<Utc>,
    },
    /// Sent to a subscriber that fell behind; it should refetch full state
    Resync,
}

/// Fan-out hub for [`LiveEvent`]s. Cloning shares the underlying channel.
#[derive(Clone)]
pub struct LiveFeed {
    sender: broadcast::Sender<LiveEvent>,
}

impl Default for LiveFeed {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl LiveFeed {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: LiveEvent) {
        // No subscribers is normal when no dashboard is open
        if let Err(broadcast::error::SendError(event)) = self.sender.send(event) {
            tracing::trace!(?event, "No live subscribers, event dropped");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LiveEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
