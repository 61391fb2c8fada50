//! Identity and access seam
//!
//! Membership, per-group permission, and roster records are resolved by an
//! external system; the engine consumes them through this trait. The
//! resolved level is re-read from the group context at command time, so a
//! resolver is only consulted on join.

use crate::types::{AccessLevel, GroupId, Member, MemberId, MemberStatus, MemberSource};
use async_trait::async_trait;
use std::collections::HashMap;

/// Caller identity bound to a connection at upgrade time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub sapin: MemberId,
    pub name: String,
}

#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Permission level of the caller within the group
    async fn group_access(&self, caller: &CallerIdentity, group_id: &GroupId) -> AccessLevel;

    /// Roster record for the member, if one exists
    async fn roster_member(&self, group_id: &GroupId, sapin: MemberId) -> Option<Member>;
}

/// Table-driven resolver, populated at startup (or by tests)
#[derive(Default)]
pub struct StaticResolver {
    access: HashMap<(GroupId, MemberId), AccessLevel>,
    roster: HashMap<(GroupId, MemberId), Member>,
    /// Level granted to callers with no explicit entry
    default_access: AccessLevel,
}

impl StaticResolver {
    pub fn new(default_access: AccessLevel) -> Self {
        Self {
            default_access,
            ..Default::default()
        }
    }

    pub fn grant(&mut self, group_id: impl Into<GroupId>, sapin: MemberId, level: AccessLevel) {
        self.access.insert((group_id.into(), sapin), level);
    }

    pub fn enroll(
        &mut self,
        group_id: impl Into<GroupId>,
        sapin: MemberId,
        name: impl Into<String>,
        status: MemberStatus,
    ) {
        self.roster.insert(
            (group_id.into(), sapin),
            Member {
                sapin,
                name: name.into(),
                status,
                source: MemberSource::Roster,
            },
        );
    }
}

#[async_trait]
impl IdentityResolver for StaticResolver {
    async fn group_access(&self, caller: &CallerIdentity, group_id: &GroupId) -> AccessLevel {
        self.access
            .get(&(group_id.clone(), caller.sapin))
            .copied()
            .unwrap_or(self.default_access)
    }

    async fn roster_member(&self, group_id: &GroupId, sapin: MemberId) -> Option<Member> {
        self.roster.get(&(group_id.clone(), sapin)).cloned()
    }
}
