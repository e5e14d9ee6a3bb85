//! Write policies and the gate that enforces them.
//!
//! Every mutating operation on an asset or blob must pass the gate before
//! any side effect happens. The policy is configured per repository; a
//! selector in the storage crate can override it per asset.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A mutation kind checked against a write policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteOperation {
    Create,
    Update,
    Delete,
}

impl fmt::Display for WriteOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        };
        f.write_str(verb)
    }
}

/// Per-repository write policy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WritePolicy {
    /// Create, update and delete are all permitted.
    #[default]
    Allow,
    /// Create is permitted; update and delete are denied (write-once).
    AllowOnce,
    /// Read-only: every mutation is denied.
    Deny,
}

impl WritePolicy {
    /// Check whether the policy permits the given operation.
    pub fn allows(&self, operation: WriteOperation) -> bool {
        match self {
            Self::Allow => true,
            Self::AllowOnce => operation == WriteOperation::Create,
            Self::Deny => false,
        }
    }

    /// Check whether creating new content is allowed.
    pub fn check_create_allowed(&self) -> bool {
        self.allows(WriteOperation::Create)
    }

    /// Check whether updating existing content is allowed.
    pub fn check_update_allowed(&self) -> bool {
        self.allows(WriteOperation::Update)
    }

    /// Check whether deleting existing content is allowed.
    pub fn check_delete_allowed(&self) -> bool {
        self.allows(WriteOperation::Delete)
    }
}

impl fmt::Display for WritePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Allow => "allow",
            Self::AllowOnce => "allow_once",
            Self::Deny => "deny",
        };
        f.write_str(name)
    }
}

/// Pure decision function over (operation, policy).
pub fn check_allowed(operation: WriteOperation, policy: WritePolicy) -> bool {
    policy.allows(operation)
}
