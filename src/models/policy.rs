//! Access policies attached to stored objects.

use super::category::Visibility;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Owner recorded on objects created by batch jobs rather than a user.
pub const SYSTEM_OWNER: &str = "system";

/// Rule group kind that only ever matches a principal by exact id.
pub const USER_GROUP_KIND: &str = "user";

/// Policy document stored as metadata on exactly one object.
///
/// `acl_rules` are only consulted for private objects. A private object with
/// no rules is unreadable by everyone, including its owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessPolicy {
    pub owner: String,
    pub visibility: Visibility,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub acl_rules: Vec<AclRule>,
}

impl AccessPolicy {
    pub fn public(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            visibility: Visibility::Public,
            acl_rules: Vec::new(),
        }
    }

    pub fn private(owner: impl Into<String>, acl_rules: Vec<AclRule>) -> Self {
        Self {
            owner: owner.into(),
            visibility: Visibility::Private,
            acl_rules,
        }
    }
}

/// A single `{group, id, permission}` grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclRule {
    pub group: AclGroup,
    pub permission: ObjectPermission,
}

impl AclRule {
    pub fn new(kind: impl Into<String>, id: impl Into<String>, permission: ObjectPermission) -> Self {
        Self {
            group: AclGroup {
                kind: kind.into(),
                id: id.into(),
            },
            permission,
        }
    }

    /// The grant applied to private objects by default: administrators may read.
    pub fn admin_read() -> Self {
        Self::new("admin_only", "admin", ObjectPermission::Read)
    }
}

/// Who a rule applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclGroup {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
}

/// Actions an ACL rule can grant. `Write` implies `Read`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectPermission {
    Read,
    Write,
}

impl ObjectPermission {
    /// Whether a rule granting `self` satisfies a request for `requested`.
    pub fn covers(&self, requested: ObjectPermission) -> bool {
        match self {
            ObjectPermission::Write => true,
            ObjectPermission::Read => requested == ObjectPermission::Read,
        }
    }
}

impl FromStr for ObjectPermission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(ObjectPermission::Read),
            "write" => Ok(ObjectPermission::Write),
            other => Err(format!("unknown permission `{other}`")),
        }
    }
}

/// The caller a read or write is evaluated for, as identified by the
/// authentication layer in front of this service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Principal {
    pub id: String,
    pub groups: Vec<String>,
}

impl Principal {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            groups: Vec::new(),
        }
    }

    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups.extend(groups.into_iter().map(Into::into));
        self
    }

    pub fn in_group(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group)
    }
}

/// Outcome of evaluating a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Allow => f.write_str("allow"),
            Decision::Deny => f.write_str("deny"),
        }
    }
}
