//! Actor identity handed to every workflow operation.
//!
//! The session layer is outside this crate; it supplies a read-only
//! [`ActorContext`] snapshot per request and the engine never reads identity ambiently.

use crate::error::WorkflowError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Member,
    Admin,
    SuperAdmin,
}

impl Role {
    /// Admins and super admins see every record and may approve.
    pub fn is_privileged(self) -> bool {
        matches!(self, Role::Admin | Role::SuperAdmin)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Member => "member",
            Role::Admin => "admin",
            Role::SuperAdmin => "super_admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "member" => Ok(Role::Member),
            "admin" => Ok(Role::Admin),
            "super_admin" => Ok(Role::SuperAdmin),
            other => Err(WorkflowError::invalid(format!("unknown role '{other}'"))),
        }
    }
}

/// The identity attempting an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorContext {
    pub user_id: i64,
    pub role: Role,
    pub is_staff: bool,
}

impl ActorContext {
    pub fn new(user_id: i64, role: Role) -> Self {
        Self {
            user_id,
            role,
            is_staff: false,
        }
    }

    pub fn member(user_id: i64) -> Self {
        Self::new(user_id, Role::Member)
    }

    pub fn admin(user_id: i64) -> Self {
        Self::new(user_id, Role::Admin)
    }

    pub fn with_staff(mut self, is_staff: bool) -> Self {
        self.is_staff = is_staff;
        self
    }

    pub fn is_privileged(&self) -> bool {
        self.role.is_privileged()
    }

    pub fn is_owner(&self, owner_id: i64) -> bool {
        self.user_id == owner_id
    }

    /// Edit/delete gate: owner or privileged.
    pub fn can_mutate(&self, owner_id: i64) -> bool {
        self.is_owner(owner_id) || self.is_privileged()
    }

    /// May submit records on behalf of another member.
    pub fn can_act_for_others(&self) -> bool {
        self.is_staff || self.is_privileged()
    }
}

/// Resolves the actor for a request from the authenticated user id.
pub trait IdentityProvider {
    /// # Errors
    ///
    /// `Forbidden` for unknown or inactive users, `StorageFailure` if the lookup fails.
    fn resolve(&self, user_id: i64) -> Result<ActorContext, WorkflowError>;
}
