//! Poll store seam
//!
//! The engine treats the store as the single source of truth for event and
//! poll field values; group contexts cache only the derived fields needed
//! for fast-path invariant checks. `MemStore` is the in-process backend;
//! a durable backend would implement the same trait.

use crate::types::*;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("store backend failure: {0}")]
    Backend(String),
}

#[async_trait]
pub trait PollStore: Send + Sync {
    async fn add_event(&self, event: Event) -> Result<Event, StoreError>;
    async fn get_event(&self, id: &EventId) -> Result<Option<Event>, StoreError>;
    async fn events_for_group(&self, group_id: &GroupId) -> Result<Vec<Event>, StoreError>;
    async fn update_event(&self, id: &EventId, changes: &EventChanges)
        -> Result<Event, StoreError>;
    /// Removes the event and every poll (and vote) under it
    async fn delete_event(&self, id: &EventId) -> Result<(), StoreError>;
    /// Marks the event published, unpublishing any other event of the group
    async fn publish_event(&self, group_id: &GroupId, id: &EventId) -> Result<Event, StoreError>;

    async fn add_poll(&self, poll: Poll) -> Result<Poll, StoreError>;
    async fn get_poll(&self, id: &PollId) -> Result<Option<Poll>, StoreError>;
    async fn polls_for_event(&self, event_id: &EventId) -> Result<Vec<Poll>, StoreError>;
    async fn polls_for_group(&self, group_id: &GroupId) -> Result<Vec<Poll>, StoreError>;
    async fn update_poll(&self, id: &PollId, changes: &PollChanges) -> Result<Poll, StoreError>;
    async fn delete_poll(&self, id: &PollId) -> Result<(), StoreError>;

    /// Inserts or replaces the member's vote on a poll
    async fn put_vote(&self, vote: Vote) -> Result<(), StoreError>;
    async fn get_vote(&self, poll_id: &PollId, sapin: MemberId)
        -> Result<Option<Vote>, StoreError>;
    async fn votes_for_poll(&self, poll_id: &PollId) -> Result<Vec<Vote>, StoreError>;
}

/// In-memory store backend
#[derive(Default)]
pub struct MemStore {
    events: RwLock<HashMap<EventId, Event>>,
    polls: RwLock<HashMap<PollId, Poll>>,
    votes: RwLock<HashMap<(PollId, MemberId), Vote>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn apply_event_changes(event: &mut Event, changes: &EventChanges) {
    if let Some(name) = &changes.name {
        event.name = name.clone();
    }
    if let Some(tz) = &changes.time_zone {
        event.time_zone = Some(tz.clone());
    }
    if let Some(dt) = &changes.datetime {
        event.datetime = Some(dt.clone());
    }
}

fn apply_poll_changes(poll: &mut Poll, changes: &PollChanges) {
    if let Some(title) = &changes.title {
        poll.title = title.clone();
    }
    if let Some(body) = &changes.body {
        poll.body = body.clone();
    }
    if let Some(options) = &changes.options {
        poll.options = options.clone();
    }
    if let Some(choice) = changes.choice {
        poll.choice = choice;
    }
    if let Some(voters_type) = changes.voters_type {
        poll.voters_type = voters_type;
    }
    if let Some(state) = changes.state {
        poll.state = state;
    }
}

#[async_trait]
impl PollStore for MemStore {
    async fn add_event(&self, event: Event) -> Result<Event, StoreError> {
        self.events
            .write()
            .await
            .insert(event.id.clone(), event.clone());
        Ok(event)
    }

    async fn get_event(&self, id: &EventId) -> Result<Option<Event>, StoreError> {
        Ok(self.events.read().await.get(id).cloned())
    }

    async fn events_for_group(&self, group_id: &GroupId) -> Result<Vec<Event>, StoreError> {
        let mut events: Vec<Event> = self
            .events
            .read()
            .await
            .values()
            .filter(|e| e.group_id == *group_id)
            .cloned()
            .collect();
        events.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(events)
    }

    async fn update_event(
        &self,
        id: &EventId,
        changes: &EventChanges,
    ) -> Result<Event, StoreError> {
        let mut events = self.events.write().await;
        let event = events
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("event {id}")))?;
        apply_event_changes(event, changes);
        Ok(event.clone())
    }

    async fn delete_event(&self, id: &EventId) -> Result<(), StoreError> {
        self.events
            .write()
            .await
            .remove(id)
            .ok_or_else(|| StoreError::NotFound(format!("event {id}")))?;

        let removed: Vec<PollId> = {
            let mut polls = self.polls.write().await;
            let ids: Vec<PollId> = polls
                .values()
                .filter(|p| p.event_id == *id)
                .map(|p| p.id.clone())
                .collect();
            for poll_id in &ids {
                polls.remove(poll_id);
            }
            ids
        };
        self.votes
            .write()
            .await
            .retain(|(poll_id, _), _| !removed.contains(poll_id));
        Ok(())
    }

    async fn publish_event(&self, group_id: &GroupId, id: &EventId) -> Result<Event, StoreError> {
        let mut events = self.events.write().await;
        if !events.contains_key(id) {
            return Err(StoreError::NotFound(format!("event {id}")));
        }
        for event in events.values_mut() {
            if event.group_id == *group_id {
                event.is_published = event.id == *id;
            }
        }
        Ok(events[id].clone())
    }

    async fn add_poll(&self, poll: Poll) -> Result<Poll, StoreError> {
        self.polls
            .write()
            .await
            .insert(poll.id.clone(), poll.clone());
        Ok(poll)
    }

    async fn get_poll(&self, id: &PollId) -> Result<Option<Poll>, StoreError> {
        Ok(self.polls.read().await.get(id).cloned())
    }

    async fn polls_for_event(&self, event_id: &EventId) -> Result<Vec<Poll>, StoreError> {
        let mut polls: Vec<Poll> = self
            .polls
            .read()
            .await
            .values()
            .filter(|p| p.event_id == *event_id)
            .cloned()
            .collect();
        polls.sort_by_key(|p| p.index);
        Ok(polls)
    }

    async fn polls_for_group(&self, group_id: &GroupId) -> Result<Vec<Poll>, StoreError> {
        let mut polls: Vec<Poll> = self
            .polls
            .read()
            .await
            .values()
            .filter(|p| p.group_id == *group_id)
            .cloned()
            .collect();
        polls.sort_by(|a, b| a.event_id.cmp(&b.event_id).then(a.index.cmp(&b.index)));
        Ok(polls)
    }

    async fn update_poll(&self, id: &PollId, changes: &PollChanges) -> Result<Poll, StoreError> {
        let mut polls = self.polls.write().await;
        let poll = polls
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("poll {id}")))?;
        apply_poll_changes(poll, changes);
        Ok(poll.clone())
    }

    async fn delete_poll(&self, id: &PollId) -> Result<(), StoreError> {
        self.polls
            .write()
            .await
            .remove(id)
            .ok_or_else(|| StoreError::NotFound(format!("poll {id}")))?;
        self.votes
            .write()
            .await
            .retain(|(poll_id, _), _| poll_id != id);
        Ok(())
    }

    async fn put_vote(&self, vote: Vote) -> Result<(), StoreError> {
        self.votes
            .write()
            .await
            .insert((vote.poll_id.clone(), vote.sapin), vote);
        Ok(())
    }

    async fn get_vote(
        &self,
        poll_id: &PollId,
        sapin: MemberId,
    ) -> Result<Option<Vote>, StoreError> {
        Ok(self
            .votes
            .read()
            .await
            .get(&(poll_id.clone(), sapin))
            .cloned())
    }

    async fn votes_for_poll(&self, poll_id: &PollId) -> Result<Vec<Vote>, StoreError> {
        let mut votes: Vec<Vote> = self
            .votes
            .read()
            .await
            .values()
            .filter(|v| v.poll_id == *poll_id)
            .cloned()
            .collect();
        votes.sort_by_key(|v| v.sapin);
        Ok(votes)
    }
}
