//! ACL policies stored as object metadata, and their evaluation.
//!
//! The policy travels with the object (metadata key `custom:aclPolicy`)
//! instead of living in a separate table, so storage and database can never
//! disagree about who may read a file.

use crate::{
    models::{
        category::Visibility,
        metadata::ACL_POLICY_METADATA_KEY,
        policy::{AccessPolicy, Decision, ObjectPermission, Principal, USER_GROUP_KIND},
    },
    services::{
        backend::{BackendError, ObjectBackend},
        path_codec::CloudPath,
    },
};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AclError {
    /// The object stays policy-less (and so unreadable) until the write is retried.
    #[error("failed to write ACL policy on {path}: {source}")]
    MetadataWrite {
        path: String,
        #[source]
        source: BackendError,
    },
    #[error("failed to read ACL policy on {path}: {source}")]
    MetadataRead {
        path: String,
        #[source]
        source: BackendError,
    },
}

/// Attaches and reads `AccessPolicy` metadata through the backing store.
#[derive(Clone)]
pub struct AclStore {
    backend: Arc<dyn ObjectBackend>,
}

impl AclStore {
    pub fn new(backend: Arc<dyn ObjectBackend>) -> Self {
        Self { backend }
    }

    /// Serialize `policy` onto the object. Re-setting identical content leaves
    /// the object unchanged.
    pub async fn set_policy(&self, object: &CloudPath, policy: &AccessPolicy) -> Result<(), AclError> {
        let value = serde_json::to_string(policy).map_err(|e| AclError::MetadataWrite {
            path: object.to_string(),
            source: BackendError::Io(e.into()),
        })?;
        self.backend
            .set_metadata(
                &object.bucket,
                &object.object_name,
                ACL_POLICY_METADATA_KEY,
                &value,
            )
            .await
            .map_err(|source| AclError::MetadataWrite {
                path: object.to_string(),
                source,
            })?;
        tracing::debug!(object = %object, visibility = %policy.visibility, "ACL policy set");
        Ok(())
    }

    /// Policy on the object, or `None` when absent or unparseable.
    pub async fn get_policy(&self, object: &CloudPath) -> Result<Option<AccessPolicy>, AclError> {
        let raw = self
            .backend
            .get_metadata(&object.bucket, &object.object_name, ACL_POLICY_METADATA_KEY)
            .await
            .map_err(|source| AclError::MetadataRead {
                path: object.to_string(),
                source,
            })?;
        Ok(raw.and_then(|json| parse_policy(&json)))
    }
}

fn parse_policy(json: &str) -> Option<AccessPolicy> {
    match serde_json::from_str(json) {
        Ok(policy) => Some(policy),
        Err(err) => {
            tracing::warn!(error = %err, "ignoring malformed ACL policy");
            None
        }
    }
}

/// Decide whether `principal` may perform `action` under `policy`.
///
/// Public objects are always readable. Private objects need a matching rule;
/// the owner gets no implicit access. A missing policy or an anonymous caller
/// on a private object is denied.
pub fn evaluate(
    policy: Option<&AccessPolicy>,
    principal: Option<&Principal>,
    action: ObjectPermission,
) -> Decision {
    let Some(policy) = policy else {
        return Decision::Deny;
    };
    if policy.visibility == Visibility::Public && action == ObjectPermission::Read {
        return Decision::Allow;
    }
    let Some(principal) = principal else {
        return Decision::Deny;
    };

    let granted = policy.acl_rules.iter().any(|rule| {
        let exact = rule.group.id == principal.id;
        let member = rule.group.kind != USER_GROUP_KIND && principal.in_group(&rule.group.id);
        (exact || member) && rule.permission.covers(action)
    });
    if granted { Decision::Allow } else { Decision::Deny }
}

/// [`evaluate`] over untrusted inputs: a raw metadata value and action name.
/// Anything that does not parse is a deny.
pub fn evaluate_raw(policy_json: Option<&str>, principal: Option<&Principal>, action: &str) -> Decision {
    let Ok(action) = action.parse::<ObjectPermission>() else {
        return Decision::Deny;
    };
    let policy = policy_json.and_then(parse_policy);
    evaluate(policy.as_ref(), principal, action)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::policy::AclRule;

    fn admin() -> Principal {
        Principal::new("1").with_groups(["admin"])
    }

    #[test]
    fn public_read_ignores_rules() {
        let mut policy = AccessPolicy::public("owner");
        policy.acl_rules.push(AclRule::new("user", "someone-else", ObjectPermission::Read));
        assert_eq!(evaluate(Some(&policy), None, ObjectPermission::Read), Decision::Allow);
        assert_eq!(
            evaluate(Some(&policy), Some(&Principal::new("x")), ObjectPermission::Read),
            Decision::Allow
        );
    }

    #[test]
    fn public_write_still_needs_a_rule() {
        let policy = AccessPolicy::public("owner");
        assert_eq!(
            evaluate(Some(&policy), Some(&Principal::new("owner")), ObjectPermission::Write),
            Decision::Deny
        );
    }

    #[test]
    fn private_without_rules_denies_everyone_including_owner() {
        let policy = AccessPolicy::private("owner", vec![]);
        for principal in [Principal::new("owner"), admin(), Principal::new("x")] {
            assert_eq!(
                evaluate(Some(&policy), Some(&principal), ObjectPermission::Read),
                Decision::Deny
            );
        }
        assert_eq!(evaluate(Some(&policy), None, ObjectPermission::Read), Decision::Deny);
    }

    #[test]
    fn admin_rule_matches_by_group() {
        let policy = AccessPolicy::private("system", vec![AclRule::admin_read()]);
        assert_eq!(
            evaluate(Some(&policy), Some(&admin()), ObjectPermission::Read),
            Decision::Allow
        );
        assert_eq!(
            evaluate(Some(&policy), Some(&admin()), ObjectPermission::Write),
            Decision::Deny
        );
        assert_eq!(
            evaluate(Some(&policy), Some(&Principal::new("2")), ObjectPermission::Read),
            Decision::Deny
        );
    }

    #[test]
    fn user_rules_only_match_exact_ids() {
        let policy = AccessPolicy::private(
            "system",
            vec![AclRule::new(USER_GROUP_KIND, "42", ObjectPermission::Write)],
        );
        assert_eq!(
            evaluate(Some(&policy), Some(&Principal::new("42")), ObjectPermission::Read),
            Decision::Allow
        );
        let impostor = Principal::new("7").with_groups(["42"]);
        assert_eq!(
            evaluate(Some(&policy), Some(&impostor), ObjectPermission::Read),
            Decision::Deny
        );
    }

    #[test]
    fn missing_or_malformed_inputs_deny() {
        let principal = admin();
        assert_eq!(evaluate(None, Some(&principal), ObjectPermission::Read), Decision::Deny);
        assert_eq!(evaluate_raw(Some("{not json"), Some(&principal), "read"), Decision::Deny);
        assert_eq!(evaluate_raw(None, Some(&principal), "read"), Decision::Deny);

        let json = serde_json::to_string(&AccessPolicy::public("o")).unwrap();
        assert_eq!(evaluate_raw(Some(&json), None, "read"), Decision::Allow);
        assert_eq!(evaluate_raw(Some(&json), None, "delete"), Decision::Deny);
    }
}
