//! Command dispatch
//!
//! Exhaustive match over the command enum: every command has a handler and
//! every handler validates before touching state. Group-scoped commands
//! fail with `NoGroupError` until the connection has joined; mutating
//! commands re-derive the caller's level from the group context's live
//! membership table, not from the join-time value.

use crate::error::CommandError;
use crate::identity::CallerIdentity;
use crate::protocol::{AckData, ClientCommand, ServerMessage};
use crate::state::{AppState, GroupJoinResult, PollSpec};
use crate::types::{AccessLevel, GroupId};
use tokio::sync::broadcast;

/// Per-connection session: the caller identity and the joined group
#[derive(Debug)]
pub struct Session {
    pub caller: CallerIdentity,
    pub group_id: Option<GroupId>,
}

impl Session {
    pub fn new(caller: CallerIdentity) -> Self {
        Self {
            caller,
            group_id: None,
        }
    }
}

/// Outcome of a dispatched command
#[derive(Debug)]
pub enum Dispatch {
    /// Acknowledge with optional data
    Ack(Option<AckData>),
    /// No acknowledgment (group:leave)
    Silent,
    /// Join succeeded: the connection must swap in the new room
    /// subscriptions before acknowledging
    Joined {
        data: AckData,
        room_rx: broadcast::Receiver<ServerMessage>,
        admin_rx: Option<broadcast::Receiver<ServerMessage>>,
    },
}

fn require(access: AccessLevel, min: AccessLevel, action: &str) -> Result<(), CommandError> {
    if access < min {
        return Err(CommandError::Forbidden(format!(
            "insufficient permission to {action}"
        )));
    }
    Ok(())
}

pub async fn handle_command(
    cmd: ClientCommand,
    session: &mut Session,
    state: &AppState,
) -> Result<Dispatch, CommandError> {
    match cmd {
        ClientCommand::GroupJoin { group_id } => {
            // Join first: a rejected join must leave the prior membership
            // (and its room subscriptions) untouched
            let GroupJoinResult {
                data,
                access: _,
                room_rx,
                admin_rx,
            } = state.join_group(&session.caller, &group_id).await?;
            // Joining a group implicitly leaves any prior one
            if let Some(prev) = session.group_id.take() {
                state.leave_group(&prev, session.caller.sapin).await;
            }
            session.group_id = Some(group_id);
            Ok(Dispatch::Joined {
                data: AckData::Join(data),
                room_rx,
                admin_rx,
            })
        }

        ClientCommand::GroupLeave => {
            if let Some(prev) = session.group_id.take() {
                state.leave_group(&prev, session.caller.sapin).await;
            }
            Ok(Dispatch::Silent)
        }

        // Everything below is scoped to a joined group
        cmd => {
            let group_id = session.group_id.clone().ok_or(CommandError::NoGroup)?;
            let access = state.member_access(&group_id, session.caller.sapin).await;

            match cmd {
                ClientCommand::EventCreate {
                    name,
                    time_zone,
                    datetime,
                } => {
                    require(access, AccessLevel::ReadWrite, "create events")?;
                    let event = state.create_event(&group_id, name, time_zone, datetime).await?;
                    Ok(Dispatch::Ack(Some(AckData::Event { event })))
                }

                ClientCommand::EventUpdate { id, changes } => {
                    require(access, AccessLevel::ReadWrite, "update events")?;
                    let event = state.update_event(&group_id, &id, &changes).await?;
                    Ok(Dispatch::Ack(Some(AckData::Event { event })))
                }

                ClientCommand::EventDelete { id } => {
                    require(access, AccessLevel::ReadWrite, "delete events")?;
                    state.delete_event(&group_id, &id).await?;
                    Ok(Dispatch::Ack(None))
                }

                ClientCommand::EventOpen { event_id } => {
                    require(access, AccessLevel::ReadWrite, "open events")?;
                    state.open_event(&group_id, &event_id).await?;
                    Ok(Dispatch::Ack(None))
                }

                ClientCommand::PollGet { event_id } => {
                    let polls = state.get_polls(&group_id, event_id.as_ref()).await?;
                    Ok(Dispatch::Ack(Some(AckData::Polls { polls })))
                }

                ClientCommand::PollCreate {
                    event_id,
                    title,
                    body,
                    options,
                    choice,
                    voters_type,
                } => {
                    require(access, AccessLevel::ReadWrite, "create polls")?;
                    let poll = state
                        .create_poll(
                            &group_id,
                            &event_id,
                            PollSpec {
                                title,
                                body,
                                options,
                                choice,
                                voters_type,
                            },
                        )
                        .await?;
                    Ok(Dispatch::Ack(Some(AckData::Poll { poll })))
                }

                ClientCommand::PollUpdate { id, changes } => {
                    require(access, AccessLevel::ReadWrite, "update polls")?;
                    let poll = state.update_poll(&group_id, &id, &changes).await?;
                    Ok(Dispatch::Ack(Some(AckData::Poll { poll })))
                }

                ClientCommand::PollDelete { id } => {
                    require(access, AccessLevel::ReadWrite, "delete polls")?;
                    state.delete_poll(&group_id, &id).await?;
                    Ok(Dispatch::Ack(None))
                }

                ClientCommand::PollShow { id } => {
                    require(access, AccessLevel::ReadWrite, "show polls")?;
                    state
                        .set_poll_state(&group_id, &id, Some(crate::types::PollState::Shown))
                        .await?;
                    Ok(Dispatch::Ack(None))
                }

                ClientCommand::PollOpen { id } => {
                    require(access, AccessLevel::ReadWrite, "open polls")?;
                    state
                        .set_poll_state(&group_id, &id, Some(crate::types::PollState::Opened))
                        .await?;
                    Ok(Dispatch::Ack(None))
                }

                ClientCommand::PollClose { id } => {
                    require(access, AccessLevel::ReadWrite, "close polls")?;
                    state
                        .set_poll_state(&group_id, &id, Some(crate::types::PollState::Closed))
                        .await?;
                    Ok(Dispatch::Ack(None))
                }

                ClientCommand::PollVote { id, votes } => {
                    require(access, AccessLevel::ReadOnly, "vote")?;
                    state
                        .cast_vote(&group_id, session.caller.sapin, &id, &votes)
                        .await?;
                    Ok(Dispatch::Ack(None))
                }

                ClientCommand::PollResult { id } => {
                    // Results are for privileged members only
                    require(access, AccessLevel::ReadWrite, "read results")?;
                    let results = state.poll_results(&group_id, &id).await?;
                    Ok(Dispatch::Ack(Some(AckData::Results(results))))
                }

                ClientCommand::GroupJoin { .. } | ClientCommand::GroupLeave => unreachable!(),
            }
        }
    }
}
