//! Wire protocol
//!
//! Commands arrive as JSON text frames carrying an optional client `seq`
//! plus a tagged command; every command except `group:leave` is answered
//! with a `CommandAck` echoing the `seq`. Server-initiated broadcasts are
//! tagged with `t`.

use crate::error::CommandError;
use crate::types::*;
use serde::{Deserialize, Serialize};

/// One inbound frame: correlation seq + the command itself
#[derive(Debug, Clone, Deserialize)]
pub struct CommandFrame {
    #[serde(default)]
    pub seq: Option<u64>,
    #[serde(flatten)]
    pub cmd: ClientCommand,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "cmd")]
pub enum ClientCommand {
    #[serde(rename = "group:join", rename_all = "camelCase")]
    GroupJoin { group_id: GroupId },
    #[serde(rename = "group:leave")]
    GroupLeave,
    #[serde(rename = "event:create", rename_all = "camelCase")]
    EventCreate {
        name: Option<String>,
        time_zone: Option<String>,
        datetime: Option<String>,
    },
    #[serde(rename = "event:update")]
    EventUpdate { id: EventId, changes: EventChanges },
    #[serde(rename = "event:delete")]
    EventDelete { id: EventId },
    #[serde(rename = "event:open", rename_all = "camelCase")]
    EventOpen { event_id: EventId },
    #[serde(rename = "poll:get", rename_all = "camelCase")]
    PollGet { event_id: Option<EventId> },
    #[serde(rename = "poll:create", rename_all = "camelCase")]
    PollCreate {
        event_id: EventId,
        title: Option<String>,
        body: Option<String>,
        options: Option<Vec<String>>,
        choice: Option<PollChoice>,
        voters_type: Option<VotersType>,
    },
    #[serde(rename = "poll:update")]
    PollUpdate { id: PollId, changes: PollChanges },
    #[serde(rename = "poll:delete")]
    PollDelete { id: PollId },
    #[serde(rename = "poll:show")]
    PollShow { id: PollId },
    #[serde(rename = "poll:open")]
    PollOpen { id: PollId },
    #[serde(rename = "poll:close")]
    PollClose { id: PollId },
    #[serde(rename = "poll:vote")]
    PollVote { id: PollId, votes: Vec<usize> },
    #[serde(rename = "poll:result")]
    PollResult { id: PollId },
}

/// Broadcasts fanned out to a group room (or its read-write subset)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "t")]
pub enum ServerMessage {
    #[serde(rename = "event:opened", rename_all = "camelCase")]
    EventOpened { event_id: EventId, polls: Vec<Poll> },
    #[serde(rename = "poll:added")]
    PollAdded { poll: Poll },
    #[serde(rename = "poll:updated")]
    PollUpdated { poll: Poll },
    #[serde(rename = "poll:deleted")]
    PollDeleted { id: PollId },
    #[serde(rename = "poll:shown")]
    PollShown { poll: Poll },
    #[serde(rename = "poll:opened")]
    PollOpened { poll: Poll },
    #[serde(rename = "poll:closed")]
    PollClosed { poll: Poll },
    /// Prior active poll forced back to inactive
    #[serde(rename = "poll:unshown")]
    PollUnshown { poll: Poll },
    /// Read-write+ connections only
    #[serde(rename = "poll:voted", rename_all = "camelCase")]
    PollVoted {
        poll_id: PollId,
        num_members: usize,
        num_voters: usize,
        num_voted: usize,
    },
}

/// Payload of a successful `group:join`
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JoinData {
    pub group_id: GroupId,
    pub events: Vec<Event>,
    /// Polls of the published event, plus the active poll if it belongs
    /// to a different event
    pub polls: Vec<Poll>,
    /// The caller's own prior votes on those polls
    pub votes: Vec<Vote>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PollResults {
    pub results: Vec<Vote>,
    pub tally: Vec<u32>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum AckData {
    Join(JoinData),
    Event { event: Event },
    Poll { poll: Poll },
    Polls { polls: Vec<Poll> },
    Results(PollResults),
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ErrorInfo {
    pub name: String,
    pub message: String,
}

/// Per-command acknowledgment frame
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "status")]
pub enum CommandAck {
    #[serde(rename = "OK")]
    Ok {
        #[serde(skip_serializing_if = "Option::is_none")]
        seq: Option<u64>,
        #[serde(flatten, skip_serializing_if = "Option::is_none")]
        data: Option<AckData>,
    },
    #[serde(rename = "Error")]
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        seq: Option<u64>,
        error: ErrorInfo,
    },
}

impl CommandAck {
    pub fn ok(seq: Option<u64>) -> Self {
        CommandAck::Ok { seq, data: None }
    }

    pub fn ok_with(seq: Option<u64>, data: AckData) -> Self {
        CommandAck::Ok {
            seq,
            data: Some(data),
        }
    }

    pub fn error(seq: Option<u64>, err: &CommandError) -> Self {
        CommandAck::Error {
            seq,
            error: ErrorInfo {
                name: err.name().to_string(),
                message: err.to_string(),
            },
        }
    }
}
