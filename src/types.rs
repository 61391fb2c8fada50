use serde::{Deserialize, Serialize};

/// Opaque ID types for type safety
pub type GroupId = String;
pub type EventId = String;
pub type PollId = String;
/// Numeric member key (SAPIN)
pub type MemberId = u32;

/// Membership status from the group roster
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MemberStatus {
    Voter,
    #[serde(rename = "Potential Voter")]
    PotentialVoter,
    Aspirant,
    ExOfficio,
    #[serde(rename = "Non-Voter")]
    NonVoter,
}

/// Where a session member record came from: the authoritative roster, or
/// synthesized for a caller with group access but no roster entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MemberSource {
    Roster,
    Guest,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Member {
    #[serde(rename = "SAPIN")]
    pub sapin: MemberId,
    pub name: String,
    pub status: MemberStatus,
    pub source: MemberSource,
}

impl Member {
    /// Synthesized roster entry for a caller with no roster record;
    /// never written back to the roster.
    pub fn guest(sapin: MemberId, name: impl Into<String>) -> Self {
        Self {
            sapin,
            name: name.into(),
            status: MemberStatus::NonVoter,
            source: MemberSource::Guest,
        }
    }
}

/// Per-group permission level resolved for a caller. Ordered: every level
/// includes the ones below it.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    #[default]
    None,
    #[serde(rename = "ro")]
    ReadOnly,
    #[serde(rename = "rw")]
    ReadWrite,
    Admin,
}

/// Ordered container of polls for a group. At most one event per group is
/// published (live) at a time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: EventId,
    pub group_id: GroupId,
    pub name: String,
    pub time_zone: Option<String>,
    pub datetime: Option<String>,
    pub is_published: bool,
}

/// Lifecycle state of a poll. A poll with no state is inactive.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PollState {
    Shown,
    Opened,
    Closed,
}

/// How many options a single vote may select
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PollChoice {
    Single,
    Multiple,
}

/// Which membership statuses count toward the voter totals of a poll
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum VotersType {
    #[serde(rename = "anyone")]
    Anyone,
    #[serde(rename = "voters-only")]
    Voters,
    #[serde(rename = "voters-and-potential")]
    VotersAndPotential,
}

impl VotersType {
    /// Whether a member with the given status counts toward `numVoters`
    pub fn is_eligible(&self, status: MemberStatus) -> bool {
        use MemberStatus::*;
        match self {
            VotersType::Anyone => true,
            VotersType::Voters => matches!(status, Voter | ExOfficio),
            VotersType::VotersAndPotential => matches!(status, Voter | PotentialVoter | ExOfficio),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Poll {
    pub id: PollId,
    pub event_id: EventId,
    pub group_id: GroupId,
    /// Position within the event
    pub index: u32,
    pub title: String,
    pub body: String,
    pub options: Vec<String>,
    pub choice: PollChoice,
    pub voters_type: VotersType,
    /// `None` = inactive; at most one poll per group is non-`None`
    pub state: Option<PollState>,
}

/// Partial update merged into a stored event; absent fields are kept
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct EventChanges {
    pub name: Option<String>,
    pub time_zone: Option<String>,
    pub datetime: Option<String>,
}

/// Partial update merged into a stored poll; absent fields are kept.
/// `state` is doubly optional: omitted = untouched, `null` = inactive.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct PollChanges {
    pub title: Option<String>,
    pub body: Option<String>,
    pub options: Option<Vec<String>>,
    pub choice: Option<PollChoice>,
    pub voters_type: Option<VotersType>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        with = "serde_double_option"
    )]
    pub state: Option<Option<PollState>>,
}

impl PollChanges {
    pub fn state(state: Option<PollState>) -> Self {
        Self {
            state: Some(state),
            ..Default::default()
        }
    }
}

/// Distinguishes an absent `state` field from an explicit `"state": null`
mod serde_double_option {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<T, S>(value: &Option<Option<T>>, ser: S) -> Result<S::Ok, S::Error>
    where
        T: Serialize,
        S: Serializer,
    {
        match value {
            Some(inner) => inner.serialize(ser),
            None => ser.serialize_none(),
        }
    }

    pub fn deserialize<'de, T, D>(de: D) -> Result<Option<Option<T>>, D::Error>
    where
        T: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        Option::<T>::deserialize(de).map(Some)
    }
}

/// A member's recorded selection on a poll. Keyed by (poll, member); a
/// resubmission replaces the prior record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    pub poll_id: PollId,
    #[serde(rename = "SAPIN")]
    pub sapin: MemberId,
    /// Chosen option indices, deduplicated and sorted
    pub votes: Vec<usize>,
    pub ts: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_level_ordering() {
        assert!(AccessLevel::None < AccessLevel::ReadOnly);
        assert!(AccessLevel::ReadOnly < AccessLevel::ReadWrite);
        assert!(AccessLevel::ReadWrite < AccessLevel::Admin);
    }

    #[test]
    fn test_voters_type_eligibility() {
        assert!(VotersType::Anyone.is_eligible(MemberStatus::NonVoter));
        assert!(VotersType::Voters.is_eligible(MemberStatus::Voter));
        assert!(VotersType::Voters.is_eligible(MemberStatus::ExOfficio));
        assert!(!VotersType::Voters.is_eligible(MemberStatus::PotentialVoter));
        assert!(!VotersType::Voters.is_eligible(MemberStatus::Aspirant));
        assert!(VotersType::VotersAndPotential.is_eligible(MemberStatus::PotentialVoter));
        assert!(!VotersType::VotersAndPotential.is_eligible(MemberStatus::NonVoter));
    }

    #[test]
    fn test_voters_type_wire_names() {
        assert_eq!(
            serde_json::to_string(&VotersType::Anyone).unwrap(),
            "\"anyone\""
        );
        assert_eq!(
            serde_json::to_string(&VotersType::Voters).unwrap(),
            "\"voters-only\""
        );
        assert_eq!(
            serde_json::to_string(&VotersType::VotersAndPotential).unwrap(),
            "\"voters-and-potential\""
        );
    }

    #[test]
    fn test_guest_member_is_non_voter() {
        let guest = Member::guest(9999, "Visitor");
        assert_eq!(guest.status, MemberStatus::NonVoter);
        assert_eq!(guest.source, MemberSource::Guest);
    }
}
