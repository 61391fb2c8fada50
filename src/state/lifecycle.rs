//! Poll lifecycle controller
//!
//! Owns the show/open/close state machine and the single-active-poll
//! invariant: at most one poll per group is in a non-null state. Any
//! transition of poll B into a non-null state while poll A is active
//! first forces A back to inactive (broadcast as `poll:unshown`).
//!
//! Broadcast policy for CRUD changes: fan out to the room only when the
//! poll belongs to the published event or the poll itself is active;
//! edits to unpublished, inactive content stay silent.

use super::AppState;
use crate::error::CommandError;
use crate::protocol::ServerMessage;
use crate::store::PollStore;
use crate::types::*;

/// Fields accepted by `poll:create`
#[derive(Debug, Clone, Default)]
pub struct PollSpec {
    pub title: Option<String>,
    pub body: Option<String>,
    pub options: Option<Vec<String>>,
    pub choice: Option<PollChoice>,
    pub voters_type: Option<VotersType>,
}

impl AppState {
    pub async fn create_poll(
        &self,
        group_id: &GroupId,
        event_id: &EventId,
        spec: PollSpec,
    ) -> Result<Poll, CommandError> {
        let event = self
            .store
            .get_event(event_id)
            .await?
            .filter(|e| e.group_id == *group_id)
            .ok_or_else(|| CommandError::not_found(format!("event {event_id}")))?;

        let index = self.store.polls_for_event(event_id).await?.len() as u32;
        let poll = Poll {
            id: ulid::Ulid::new().to_string(),
            event_id: event_id.clone(),
            group_id: group_id.clone(),
            index,
            title: spec.title.unwrap_or_default(),
            body: spec.body.unwrap_or_default(),
            options: spec.options.unwrap_or_default(),
            choice: spec.choice.unwrap_or(PollChoice::Single),
            voters_type: spec.voters_type.unwrap_or(VotersType::Anyone),
            state: None,
        };
        let poll = self.store.add_poll(poll).await?;

        self.broadcast_poll_change(
            &poll,
            event.is_published,
            ServerMessage::PollAdded { poll: poll.clone() },
        )
        .await;
        Ok(poll)
    }

    /// Merges field changes into a stored poll. A state change embedded in
    /// the changes routes through `set_poll_state` so the single-active
    /// invariant holds no matter which command carried the transition.
    pub async fn update_poll(
        &self,
        group_id: &GroupId,
        id: &PollId,
        changes: &PollChanges,
    ) -> Result<Poll, CommandError> {
        self.group_poll(group_id, id).await?;

        if let Some(target) = changes.state {
            let mut field_changes = changes.clone();
            field_changes.state = None;
            if field_changes != PollChanges::default() {
                self.store.update_poll(id, &field_changes).await?;
            }
            return self.set_poll_state(group_id, id, target).await;
        }

        let updated = self.store.update_poll(id, changes).await?;
        let published = self.event_published(&updated.event_id).await;
        self.broadcast_poll_change(
            &updated,
            published,
            ServerMessage::PollUpdated {
                poll: updated.clone(),
            },
        )
        .await;
        Ok(updated)
    }

    pub async fn delete_poll(&self, group_id: &GroupId, id: &PollId) -> Result<(), CommandError> {
        let poll = self.group_poll(group_id, id).await?;
        let published = self.event_published(&poll.event_id).await;

        self.store.delete_poll(id).await?;

        let was_active = {
            let mut groups = self.groups.write().await;
            match groups.get_mut(group_id) {
                Some(ctx) if ctx.active_poll_id.as_ref() == Some(id) => {
                    ctx.active_poll_id = None;
                    true
                }
                _ => false,
            }
        };

        self.broadcast_poll_change(&poll, published, ServerMessage::PollDeleted { id: id.clone() })
            .await;
        if was_active {
            self.schedule_voted_update(group_id).await;
        }
        Ok(())
    }

    /// Applies a lifecycle transition, forcing any other active poll of
    /// the group back to inactive first
    pub async fn set_poll_state(
        &self,
        group_id: &GroupId,
        id: &PollId,
        target: Option<PollState>,
    ) -> Result<Poll, CommandError> {
        let before = self.group_poll(group_id, id).await?;

        let prior_active = {
            let groups = self.groups.read().await;
            groups.get(group_id).and_then(|ctx| ctx.active_poll_id.clone())
        };

        if target.is_some() {
            if let Some(prior_id) = prior_active.filter(|p| p != id) {
                match self.store.update_poll(&prior_id, &PollChanges::state(None)).await {
                    Ok(prior) => {
                        tracing::debug!(group = %group_id, poll = %prior_id, "unshowing prior active poll");
                        self.send_room(group_id, ServerMessage::PollUnshown { poll: prior })
                            .await;
                    }
                    // Stale reference (poll deleted out from under us)
                    Err(err) => tracing::warn!(poll = %prior_id, %err, "failed to unshow prior poll"),
                }
            }
        }

        let updated = self.store.update_poll(id, &PollChanges::state(target)).await?;

        {
            let mut groups = self.groups.write().await;
            if let Some(ctx) = groups.get_mut(group_id) {
                if target.is_some() {
                    ctx.active_poll_id = Some(id.clone());
                } else if ctx.active_poll_id.as_ref() == Some(id) {
                    ctx.active_poll_id = None;
                }
            }
        }

        // Unshowing an already-inactive poll on an unpublished event
        // stays silent
        let unshow_visible =
            before.state.is_some() || self.event_published(&before.event_id).await;
        let msg = match target {
            Some(PollState::Shown) => Some(ServerMessage::PollShown {
                poll: updated.clone(),
            }),
            Some(PollState::Opened) => Some(ServerMessage::PollOpened {
                poll: updated.clone(),
            }),
            Some(PollState::Closed) => Some(ServerMessage::PollClosed {
                poll: updated.clone(),
            }),
            None if unshow_visible => Some(ServerMessage::PollUnshown {
                poll: updated.clone(),
            }),
            None => None,
        };
        if let Some(msg) = msg {
            self.send_room(group_id, msg).await;
        }

        self.schedule_voted_update(group_id).await;
        Ok(updated)
    }

    /// Polls of the joined group, optionally narrowed to one event
    pub async fn get_polls(
        &self,
        group_id: &GroupId,
        event_id: Option<&EventId>,
    ) -> Result<Vec<Poll>, CommandError> {
        match event_id {
            Some(event_id) => {
                self.store
                    .get_event(event_id)
                    .await?
                    .filter(|e| e.group_id == *group_id)
                    .ok_or_else(|| CommandError::not_found(format!("event {event_id}")))?;
                Ok(self.store.polls_for_event(event_id).await?)
            }
            None => Ok(self.store.polls_for_group(group_id).await?),
        }
    }

    /// Poll lookup scoped to the caller's group
    pub(crate) async fn group_poll(
        &self,
        group_id: &GroupId,
        id: &PollId,
    ) -> Result<Poll, CommandError> {
        self.store
            .get_poll(id)
            .await?
            .filter(|p| p.group_id == *group_id)
            .ok_or_else(|| CommandError::not_found(format!("poll {id}")))
    }

    pub(crate) async fn event_published(&self, event_id: &EventId) -> bool {
        matches!(
            self.store.get_event(event_id).await,
            Ok(Some(event)) if event.is_published
        )
    }

    pub(crate) async fn send_room(&self, group_id: &GroupId, msg: ServerMessage) {
        let groups = self.groups.read().await;
        if let Some(ctx) = groups.get(group_id) {
            // No receivers is fine
            let _ = ctx.room_tx.send(msg);
        }
    }

    async fn broadcast_poll_change(&self, poll: &Poll, published: bool, msg: ServerMessage) {
        if published || poll.state.is_some() {
            self.send_room(&poll.group_id, msg).await;
        }
    }
}
