mod events;
mod group;
mod lifecycle;
mod votes;

pub use group::GroupJoinResult;
pub use lifecycle::PollSpec;

use crate::identity::IdentityResolver;
use crate::protocol::ServerMessage;
use crate::store::PollStore;
use crate::types::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;

/// A member's live presence within a group. Dedupe key is the SAPIN:
/// multiple connections from the same member collapse into one entry.
#[derive(Debug, Clone)]
pub struct Presence {
    pub member: Member,
    pub access: AccessLevel,
    /// Live connections held by this member
    pub connections: u32,
}

/// Live state of one group. Exists exactly while at least one connection
/// holds the group as its joined group; created on first join, discarded
/// when the last connection leaves.
pub struct GroupContext {
    pub group_id: GroupId,
    pub members: HashMap<MemberId, Presence>,
    pub active_poll_id: Option<PollId>,
    pub published_event_id: Option<EventId>,
    /// Room multicast: every connection in the group
    pub room_tx: broadcast::Sender<ServerMessage>,
    /// Read-write and higher connections only
    pub admin_tx: broadcast::Sender<ServerMessage>,
    /// Total live connections across all members
    pub connections: u32,
    /// Pending debounced voted-summary broadcast; aborted on teardown
    pub(crate) voted_task: Option<JoinHandle<()>>,
}

impl GroupContext {
    pub(crate) fn new(group_id: GroupId) -> Self {
        let (room_tx, _) = broadcast::channel(256);
        let (admin_tx, _) = broadcast::channel(256);
        Self {
            group_id,
            members: HashMap::new(),
            active_poll_id: None,
            published_event_id: None,
            room_tx,
            admin_tx,
            connections: 0,
            voted_task: None,
        }
    }
}

/// Shared engine state. The group map is owned here and lifecycle-managed
/// entirely by join/leave; the store and identity resolver are injected
/// seams.
#[derive(Clone)]
pub struct AppState {
    pub groups: Arc<RwLock<HashMap<GroupId, GroupContext>>>,
    pub store: Arc<dyn PollStore>,
    pub identity: Arc<dyn IdentityResolver>,
    /// Batch window for voted-summary broadcasts
    pub voted_debounce: Duration,
}

impl AppState {
    pub fn new(store: Arc<dyn PollStore>, identity: Arc<dyn IdentityResolver>) -> Self {
        Self {
            groups: Arc::new(RwLock::new(HashMap::new())),
            store,
            identity,
            voted_debounce: Duration::from_millis(500),
        }
    }

    pub fn with_debounce(mut self, window: Duration) -> Self {
        self.voted_debounce = window;
        self
    }

    /// Snapshot of a group's live context, for acks and tests
    pub async fn group_snapshot(&self, group_id: &GroupId) -> Option<(Vec<MemberId>, Option<PollId>)> {
        let groups = self.groups.read().await;
        let ctx = groups.get(group_id)?;
        let mut sapins: Vec<MemberId> = ctx.members.keys().copied().collect();
        sapins.sort_unstable();
        Some((sapins, ctx.active_poll_id.clone()))
    }
}
