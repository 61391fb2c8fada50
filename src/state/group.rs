//! Group context lifecycle and membership bookkeeping

use super::{AppState, GroupContext, Presence};
use crate::error::CommandError;
use crate::identity::CallerIdentity;
use crate::protocol::{JoinData, ServerMessage};
use crate::store::PollStore;
use crate::types::*;
use tokio::sync::broadcast;

/// Everything a connection needs after a successful join: the resync
/// payload plus subscriptions to the group's rooms.
#[derive(Debug)]
pub struct GroupJoinResult {
    pub data: JoinData,
    pub access: AccessLevel,
    pub room_rx: broadcast::Receiver<ServerMessage>,
    /// Present only for read-write and higher callers
    pub admin_rx: Option<broadcast::Receiver<ServerMessage>>,
}

impl AppState {
    /// Admits a connection into a group: resolves permission and roster
    /// entry, creates the group context on first join (seeding it from the
    /// store), registers the presence, and returns the resync payload.
    pub async fn join_group(
        &self,
        caller: &CallerIdentity,
        group_id: &GroupId,
    ) -> Result<GroupJoinResult, CommandError> {
        let access = self.identity.group_access(caller, group_id).await;
        if access < AccessLevel::ReadOnly {
            return Err(CommandError::Forbidden(format!(
                "no access to group {group_id}"
            )));
        }

        let member = match self.identity.roster_member(group_id, caller.sapin).await {
            Some(member) => member,
            None => Member::guest(caller.sapin, caller.name.clone()),
        };

        // Seed data is read before taking the group map lock; only the
        // first join for a group actually uses it.
        let events = self.store.events_for_group(group_id).await?;
        let published = events.iter().find(|e| e.is_published).cloned();
        let group_polls = self.store.polls_for_group(group_id).await?;
        let active = group_polls.iter().find(|p| p.state.is_some()).cloned();

        // Visible on join: the published event's polls, plus the active
        // poll when it belongs to a different, unpublished event.
        let mut polls: Vec<Poll> = match &published {
            Some(event) => group_polls
                .iter()
                .filter(|p| p.event_id == event.id)
                .cloned()
                .collect(),
            None => Vec::new(),
        };
        if let Some(active) = &active {
            if !polls.iter().any(|p| p.id == active.id) {
                polls.push(active.clone());
            }
        }

        let mut votes = Vec::new();
        for poll in &polls {
            if let Some(vote) = self.store.get_vote(&poll.id, caller.sapin).await? {
                votes.push(vote);
            }
        }

        let (room_rx, admin_rx) = {
            let mut groups = self.groups.write().await;
            let ctx = groups.entry(group_id.clone()).or_insert_with(|| {
                tracing::info!(group = %group_id, "creating group context");
                let mut ctx = GroupContext::new(group_id.clone());
                ctx.published_event_id = published.as_ref().map(|e| e.id.clone());
                ctx.active_poll_id = active.as_ref().map(|p| p.id.clone());
                ctx
            });

            let presence = ctx.members.entry(caller.sapin).or_insert_with(|| Presence {
                member: member.clone(),
                access,
                connections: 0,
            });
            // Re-resolved level wins over a stale join-time one
            presence.access = access;
            presence.connections += 1;
            ctx.connections += 1;

            let room_rx = ctx.room_tx.subscribe();
            let admin_rx = (access >= AccessLevel::ReadWrite).then(|| ctx.admin_tx.subscribe());
            (room_rx, admin_rx)
        };

        self.schedule_voted_update(group_id).await;

        tracing::debug!(group = %group_id, sapin = caller.sapin, ?access, "member joined");
        Ok(GroupJoinResult {
            data: JoinData {
                group_id: group_id.clone(),
                events,
                polls,
                votes,
            },
            access,
            room_rx,
            admin_rx,
        })
    }

    /// Removes one connection of a member from a group. No-ops gracefully
    /// when the context is already gone (disconnect racing teardown).
    pub async fn leave_group(&self, group_id: &GroupId, sapin: MemberId) {
        {
            let mut groups = self.groups.write().await;
            let Some(ctx) = groups.get_mut(group_id) else {
                return;
            };

            if let Some(presence) = ctx.members.get_mut(&sapin) {
                presence.connections = presence.connections.saturating_sub(1);
                if presence.connections == 0 {
                    ctx.members.remove(&sapin);
                }
            }
            ctx.connections = ctx.connections.saturating_sub(1);

            if ctx.connections == 0 {
                if let Some(task) = ctx.voted_task.take() {
                    task.abort();
                }
                groups.remove(group_id);
                tracing::info!(group = %group_id, "last connection left, discarding group context");
                return;
            }
        }

        self.schedule_voted_update(group_id).await;
        tracing::debug!(group = %group_id, sapin, "connection left");
    }

    /// Current permission level of a member, re-derived from the live
    /// membership table rather than cached from join time
    pub async fn member_access(&self, group_id: &GroupId, sapin: MemberId) -> AccessLevel {
        let groups = self.groups.read().await;
        groups
            .get(group_id)
            .and_then(|ctx| ctx.members.get(&sapin))
            .map(|p| p.access)
            .unwrap_or(AccessLevel::None)
    }
}
