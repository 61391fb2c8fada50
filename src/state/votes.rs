//! Vote collection and tallying
//!
//! Votes are keyed by (poll, member); a resubmission replaces the prior
//! record. Eligibility (`votersType`) filters the voted-summary counts
//! only — any present member's vote is recorded and tallied.
//!
//! The voted summary is recomputed on every presence change and every
//! vote, but broadcast only to read-write+ connections and only after the
//! debounce window elapses, so bursty churn collapses into one broadcast.

use super::AppState;
use crate::error::CommandError;
use crate::protocol::{PollResults, ServerMessage};
use crate::store::PollStore;
use crate::types::*;
use std::collections::{BTreeSet, HashSet};

impl AppState {
    /// Records (or replaces) the caller's vote on an open poll in the
    /// caller's group. A poll belonging to another group is invisible here.
    pub async fn cast_vote(
        &self,
        group_id: &GroupId,
        sapin: MemberId,
        poll_id: &PollId,
        choices: &[usize],
    ) -> Result<(), CommandError> {
        let poll = self.group_poll(group_id, poll_id).await?;
        if poll.state != Some(PollState::Opened) {
            return Err(CommandError::InvalidState(
                "poll is not open for voting".into(),
            ));
        }

        // Repeats collapse to one
        let choices: Vec<usize> = choices.iter().copied().collect::<BTreeSet<_>>().into_iter().collect();
        if poll.choice == PollChoice::Single && choices.len() > 1 {
            return Err(CommandError::InvalidChoice(
                "poll accepts a single choice".into(),
            ));
        }
        if let Some(&out_of_range) = choices.iter().find(|&&i| i >= poll.options.len()) {
            return Err(CommandError::InvalidChoice(format!(
                "option index {out_of_range} out of range"
            )));
        }

        self.store
            .put_vote(Vote {
                poll_id: poll_id.clone(),
                sapin,
                votes: choices,
                ts: chrono::Utc::now().to_rfc3339(),
            })
            .await?;

        self.schedule_voted_update(group_id).await;
        Ok(())
    }

    /// Per-member votes plus the per-option tally. A vote with multiple
    /// choices increments multiple tally slots.
    pub async fn poll_results(
        &self,
        group_id: &GroupId,
        poll_id: &PollId,
    ) -> Result<PollResults, CommandError> {
        let poll = self.group_poll(group_id, poll_id).await?;
        if !matches!(poll.state, Some(PollState::Opened) | Some(PollState::Closed)) {
            return Err(CommandError::InvalidState(
                "results are only available for opened or closed polls".into(),
            ));
        }

        let results = self.store.votes_for_poll(poll_id).await?;
        let mut tally = vec![0u32; poll.options.len()];
        for vote in &results {
            for &index in &vote.votes {
                if let Some(slot) = tally.get_mut(index) {
                    *slot += 1;
                }
            }
        }
        Ok(PollResults { results, tally })
    }

    /// Presence-derived counts for the group's active poll, or `None`
    /// when the group has no active poll (nothing to summarize)
    pub async fn voted_summary(&self, group_id: &GroupId) -> Option<ServerMessage> {
        let (poll_id, present): (PollId, Vec<(MemberId, MemberStatus)>) = {
            let groups = self.groups.read().await;
            let ctx = groups.get(group_id)?;
            let poll_id = ctx.active_poll_id.clone()?;
            let present = ctx
                .members
                .values()
                .map(|p| (p.member.sapin, p.member.status))
                .collect();
            (poll_id, present)
        };

        let poll = self.store.get_poll(&poll_id).await.ok().flatten()?;
        let votes = self.store.votes_for_poll(&poll_id).await.ok()?;
        let voted: HashSet<MemberId> = votes.iter().map(|v| v.sapin).collect();

        let num_members = present.len();
        let eligible: Vec<MemberId> = present
            .iter()
            .filter(|(_, status)| poll.voters_type.is_eligible(*status))
            .map(|(sapin, _)| *sapin)
            .collect();
        let num_voters = eligible.len();
        let num_voted = eligible.iter().filter(|s| voted.contains(s)).count();

        Some(ServerMessage::PollVoted {
            poll_id,
            num_members,
            num_voters,
            num_voted,
        })
    }

    /// Trailing-edge debounce: each trigger cancels any pending broadcast
    /// and schedules a fresh one a full window out. The task handle is
    /// owned by the group context so teardown cancels it deterministically.
    pub(crate) async fn schedule_voted_update(&self, group_id: &GroupId) {
        let mut groups = self.groups.write().await;
        let Some(ctx) = groups.get_mut(group_id) else {
            return;
        };
        if let Some(pending) = ctx.voted_task.take() {
            pending.abort();
        }

        let state = self.clone();
        let group_id = group_id.clone();
        let window = self.voted_debounce;
        ctx.voted_task = Some(tokio::spawn(async move {
            tokio::time::sleep(window).await;
            state.broadcast_voted_summary(&group_id).await;
        }));
    }

    pub(crate) async fn broadcast_voted_summary(&self, group_id: &GroupId) {
        let Some(summary) = self.voted_summary(group_id).await else {
            return;
        };
        let groups = self.groups.read().await;
        if let Some(ctx) = groups.get(group_id) {
            tracing::debug!(group = %group_id, "broadcasting voted summary");
            let _ = ctx.admin_tx.send(summary);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{CallerIdentity, StaticResolver};
    use crate::state::PollSpec;
    use std::sync::Arc;
    use std::time::Duration;

    fn caller(sapin: MemberId, name: &str) -> CallerIdentity {
        CallerIdentity {
            sapin,
            name: name.into(),
        }
    }

    async fn polling_state(voters_type: VotersType, choice: PollChoice) -> (AppState, GroupId, PollId) {
        let mut resolver = StaticResolver::new(AccessLevel::ReadOnly);
        resolver.grant("g1", 100, AccessLevel::ReadWrite);
        resolver.enroll("g1", 100, "Alice", MemberStatus::Voter);
        resolver.enroll("g1", 200, "Bob", MemberStatus::PotentialVoter);
        let state = AppState::new(
            Arc::new(crate::store::MemStore::new()),
            Arc::new(resolver),
        );
        let g1 = "g1".to_string();
        state.join_group(&caller(100, "Alice"), &g1).await.unwrap();

        let event = state.create_event(&g1, None, None, None).await.unwrap();
        state.open_event(&g1, &event.id).await.unwrap();
        let poll = state
            .create_poll(
                &g1,
                &event.id,
                PollSpec {
                    options: Some(vec!["Approve".into(), "Disapprove".into()]),
                    choice: Some(choice),
                    voters_type: Some(voters_type),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        state
            .set_poll_state(&g1, &poll.id, Some(PollState::Opened))
            .await
            .unwrap();
        (state, g1, poll.id)
    }

    #[tokio::test]
    async fn test_vote_requires_open_state() {
        let (state, g1, poll_id) = polling_state(VotersType::Anyone, PollChoice::Single).await;
        state
            .set_poll_state(&g1, &poll_id, Some(PollState::Closed))
            .await
            .unwrap();

        let err = state.cast_vote(&g1, 100, &poll_id, &[0]).await.unwrap_err();
        assert_eq!(err.name(), "InvalidState");
    }

    #[tokio::test]
    async fn test_vote_choice_validation() {
        let (state, g1, poll_id) = polling_state(VotersType::Anyone, PollChoice::Single).await;

        // Two distinct choices on a single-choice poll
        let err = state.cast_vote(&g1, 100, &poll_id, &[0, 1]).await.unwrap_err();
        assert_eq!(err.name(), "InvalidChoice");

        // Out-of-range index
        let err = state.cast_vote(&g1, 100, &poll_id, &[5]).await.unwrap_err();
        assert_eq!(err.name(), "InvalidChoice");

        // Repeats collapse to one, so this is a valid single choice
        state.cast_vote(&g1, 100, &poll_id, &[1, 1, 1]).await.unwrap();
        let vote = state.store.get_vote(&poll_id, 100).await.unwrap().unwrap();
        assert_eq!(vote.votes, vec![1]);
    }

    #[tokio::test]
    async fn test_vote_is_scoped_to_the_callers_group() {
        let (state, _g1, poll_id) = polling_state(VotersType::Anyone, PollChoice::Single).await;

        // The poll belongs to g1; through another group it does not exist
        let err = state
            .cast_vote(&"g2".to_string(), 100, &poll_id, &[0])
            .await
            .unwrap_err();
        assert_eq!(err.name(), "NotFoundError");
        assert!(state.store.get_vote(&poll_id, 100).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_revote_replaces_not_duplicates() {
        let (state, g1, poll_id) = polling_state(VotersType::Anyone, PollChoice::Single).await;

        state.cast_vote(&g1, 100, &poll_id, &[0]).await.unwrap();
        state.cast_vote(&g1, 100, &poll_id, &[1]).await.unwrap();

        let results = state.poll_results(&g1, &poll_id).await.unwrap();
        assert_eq!(results.results.len(), 1);
        assert_eq!(results.results[0].votes, vec![1]);
        assert_eq!(results.tally, vec![0, 1]);
    }

    #[tokio::test]
    async fn test_multiple_choice_vote_increments_multiple_slots() {
        let (state, g1, poll_id) = polling_state(VotersType::Anyone, PollChoice::Multiple).await;

        state.cast_vote(&g1, 100, &poll_id, &[0, 1]).await.unwrap();
        state.cast_vote(&g1, 200, &poll_id, &[1]).await.unwrap();

        let results = state.poll_results(&g1, &poll_id).await.unwrap();
        assert_eq!(results.tally, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_results_require_opened_or_closed() {
        let (state, g1, poll_id) = polling_state(VotersType::Anyone, PollChoice::Single).await;
        assert!(state.poll_results(&g1, &poll_id).await.is_ok());

        state
            .set_poll_state(&g1, &poll_id, Some(PollState::Closed))
            .await
            .unwrap();
        assert!(state.poll_results(&g1, &poll_id).await.is_ok());

        state.set_poll_state(&g1, &poll_id, None).await.unwrap();
        let err = state.poll_results(&g1, &poll_id).await.unwrap_err();
        assert_eq!(err.name(), "InvalidState");
    }

    #[tokio::test]
    async fn test_eligibility_filters_counts_not_votes() {
        // Voters-only poll, with a Voter and a Potential Voter present
        let (state, g1, poll_id) = polling_state(VotersType::Voters, PollChoice::Single).await;
        state.join_group(&caller(200, "Bob"), &g1).await.unwrap();

        state.cast_vote(&g1, 100, &poll_id, &[0]).await.unwrap();
        // Bob is not eligible but his vote is still recorded and tallied
        state.cast_vote(&g1, 200, &poll_id, &[1]).await.unwrap();

        let results = state.poll_results(&g1, &poll_id).await.unwrap();
        assert_eq!(results.tally, vec![1, 1]);

        let summary = state.voted_summary(&g1).await.unwrap();
        match summary {
            ServerMessage::PollVoted {
                num_members,
                num_voters,
                num_voted,
                ..
            } => {
                assert_eq!(num_members, 2);
                assert_eq!(num_voters, 1);
                assert_eq!(num_voted, 1);
            }
            other => panic!("expected poll:voted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_no_summary_without_active_poll() {
        let (state, g1, poll_id) = polling_state(VotersType::Anyone, PollChoice::Single).await;
        state.set_poll_state(&g1, &poll_id, None).await.unwrap();
        assert!(state.voted_summary(&g1).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_coalesces_bursts() {
        let (state, g1, poll_id) = polling_state(VotersType::Anyone, PollChoice::Single).await;

        let mut admin_rx = {
            let groups = state.groups.read().await;
            groups.get(&g1).unwrap().admin_tx.subscribe()
        };

        // A burst of votes within the window
        state.cast_vote(&g1, 100, &poll_id, &[0]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        state.cast_vote(&g1, 100, &poll_id, &[1]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        state.cast_vote(&g1, 100, &poll_id, &[0]).await.unwrap();

        // Full window after the last trigger: exactly one broadcast
        tokio::time::sleep(Duration::from_millis(600)).await;
        let msg = admin_rx.recv().await.unwrap();
        assert!(matches!(msg, ServerMessage::PollVoted { num_voted: 1, .. }));
        assert!(admin_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_cancels_pending_broadcast() {
        let (state, g1, poll_id) = polling_state(VotersType::Anyone, PollChoice::Single).await;

        let mut admin_rx = {
            let groups = state.groups.read().await;
            groups.get(&g1).unwrap().admin_tx.subscribe()
        };

        state.cast_vote(&g1, 100, &poll_id, &[0]).await.unwrap();
        // Last connection leaves before the window elapses
        state.leave_group(&g1, 100).await;
        tokio::time::sleep(Duration::from_millis(600)).await;

        assert!(state.group_snapshot(&g1).await.is_none());
        assert!(admin_rx.try_recv().is_err());
    }
}
