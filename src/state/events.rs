//! Event operations
//!
//! Events are ordered containers of polls. The store enforces publish
//! exclusivity; the group context only tracks the published event id for
//! the broadcast-policy fast path.

use super::AppState;
use crate::error::CommandError;
use crate::protocol::ServerMessage;
use crate::store::PollStore;
use crate::types::*;

impl AppState {
    pub async fn create_event(
        &self,
        group_id: &GroupId,
        name: Option<String>,
        time_zone: Option<String>,
        datetime: Option<String>,
    ) -> Result<Event, CommandError> {
        let event = Event {
            id: ulid::Ulid::new().to_string(),
            group_id: group_id.clone(),
            name: name.unwrap_or_default(),
            time_zone,
            datetime,
            is_published: false,
        };
        Ok(self.store.add_event(event).await?)
    }

    pub async fn update_event(
        &self,
        group_id: &GroupId,
        id: &EventId,
        changes: &EventChanges,
    ) -> Result<Event, CommandError> {
        self.group_event(group_id, id).await?;
        Ok(self.store.update_event(id, changes).await?)
    }

    pub async fn delete_event(&self, group_id: &GroupId, id: &EventId) -> Result<(), CommandError> {
        self.group_event(group_id, id).await?;
        let event_polls = self.store.polls_for_event(id).await?;
        self.store.delete_event(id).await?;

        let dropped_active = {
            let mut groups = self.groups.write().await;
            match groups.get_mut(group_id) {
                Some(ctx) => {
                    if ctx.published_event_id.as_ref() == Some(id) {
                        ctx.published_event_id = None;
                    }
                    let active_dropped = matches!(
                        &ctx.active_poll_id,
                        Some(active) if event_polls.iter().any(|p| p.id == *active)
                    );
                    if active_dropped {
                        ctx.active_poll_id = None;
                    }
                    active_dropped
                }
                None => false,
            }
        };
        if dropped_active {
            self.schedule_voted_update(group_id).await;
        }
        Ok(())
    }

    /// Publishes the event (unpublishing any other event of the group)
    /// and announces it with its polls to the room
    pub async fn open_event(
        &self,
        group_id: &GroupId,
        event_id: &EventId,
    ) -> Result<(Event, Vec<Poll>), CommandError> {
        self.group_event(group_id, event_id).await?;
        let event = self.store.publish_event(group_id, event_id).await?;
        let polls = self.store.polls_for_event(event_id).await?;

        {
            let mut groups = self.groups.write().await;
            if let Some(ctx) = groups.get_mut(group_id) {
                ctx.published_event_id = Some(event_id.clone());
            }
        }

        tracing::info!(group = %group_id, event = %event_id, "event published");
        self.send_room(
            group_id,
            ServerMessage::EventOpened {
                event_id: event_id.clone(),
                polls: polls.clone(),
            },
        )
        .await;
        Ok((event, polls))
    }

    async fn group_event(&self, group_id: &GroupId, id: &EventId) -> Result<Event, CommandError> {
        self.store
            .get_event(id)
            .await?
            .filter(|e| e.group_id == *group_id)
            .ok_or_else(|| CommandError::not_found(format!("event {id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{CallerIdentity, StaticResolver};
    use crate::state::PollSpec;
    use crate::store::MemStore;
    use std::sync::Arc;

    async fn joined_state() -> (AppState, GroupId) {
        let mut resolver = StaticResolver::new(AccessLevel::ReadOnly);
        resolver.grant("g1", 100, AccessLevel::ReadWrite);
        let state = AppState::new(Arc::new(MemStore::new()), Arc::new(resolver));
        let g1 = "g1".to_string();
        state
            .join_group(
                &CallerIdentity {
                    sapin: 100,
                    name: "Chair".into(),
                },
                &g1,
            )
            .await
            .unwrap();
        (state, g1)
    }

    #[tokio::test]
    async fn test_open_event_broadcasts_polls_and_updates_context() {
        let (state, g1) = joined_state().await;
        let event = state
            .create_event(&g1, Some("Plenary".into()), None, None)
            .await
            .unwrap();
        state
            .create_poll(&g1, &event.id, PollSpec::default())
            .await
            .unwrap();

        let mut room_rx = {
            let groups = state.groups.read().await;
            groups.get(&g1).unwrap().room_tx.subscribe()
        };
        let (opened, polls) = state.open_event(&g1, &event.id).await.unwrap();
        assert!(opened.is_published);
        assert_eq!(polls.len(), 1);

        match room_rx.recv().await.unwrap() {
            ServerMessage::EventOpened { event_id, polls } => {
                assert_eq!(event_id, event.id);
                assert_eq!(polls.len(), 1);
            }
            other => panic!("expected event:opened, got {other:?}"),
        }

        let groups = state.groups.read().await;
        assert_eq!(
            groups.get(&g1).unwrap().published_event_id,
            Some(event.id.clone())
        );
    }

    #[tokio::test]
    async fn test_open_event_replaces_prior_published() {
        let (state, g1) = joined_state().await;
        let e1 = state.create_event(&g1, None, None, None).await.unwrap();
        let e2 = state.create_event(&g1, None, None, None).await.unwrap();

        state.open_event(&g1, &e1.id).await.unwrap();
        state.open_event(&g1, &e2.id).await.unwrap();

        let e1_after = state.store.get_event(&e1.id).await.unwrap().unwrap();
        assert!(!e1_after.is_published);
    }

    #[tokio::test]
    async fn test_delete_event_with_active_poll_clears_active() {
        let (state, g1) = joined_state().await;
        let event = state.create_event(&g1, None, None, None).await.unwrap();
        let poll = state
            .create_poll(&g1, &event.id, PollSpec::default())
            .await
            .unwrap();
        state
            .set_poll_state(&g1, &poll.id, Some(PollState::Shown))
            .await
            .unwrap();

        state.delete_event(&g1, &event.id).await.unwrap();
        let (_, active) = state.group_snapshot(&g1).await.unwrap();
        assert_eq!(active, None);
        assert!(state.store.get_poll(&poll.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cross_group_event_is_not_found() {
        let (state, g1) = joined_state().await;
        let foreign = Event {
            id: "other".into(),
            group_id: "g2".into(),
            name: String::new(),
            time_zone: None,
            datetime: None,
            is_published: false,
        };
        state.store.add_event(foreign).await.unwrap();

        let err = state
            .update_event(&g1, &"other".to_string(), &EventChanges::default())
            .await
            .unwrap_err();
        assert_eq!(err.name(), "NotFoundError");
    }
}
