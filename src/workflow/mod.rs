//! The approval-workflow engine.
//!
//! [`Engine`] owns the record store, the evidence store and the validation policy.
//! [`Engine::workflow`] hands out a [`RecordWorkflow`] for one record kind; all four kinds
//! share that single implementation and differ only through their descriptors.
//!
//! ```no_run
//! use coffer::{ActorContext, Engine, LocalEvidenceStore, MemoryStore, RecordKind, ValidationPolicy};
//! use coffer::config::MediaConfig;
//!
//! let engine = Engine::new(
//!     MemoryStore::new(),
//!     LocalEvidenceStore::new(&MediaConfig::default()),
//!     ValidationPolicy::default(),
//! );
//! let admin = ActorContext::admin(1);
//! let pending = engine.workflow(RecordKind::Loan).pending_count(&admin)?;
//! # Ok::<(), coffer::WorkflowError>(())
//! ```

mod record_workflow;

pub use record_workflow::RecordWorkflow;

use crate::error::{WorkflowError, WorkflowResult};
use crate::evidence::EvidenceStore;
use crate::identity::{ActorContext, IdentityProvider};
use crate::record::{DashboardTotals, RecordKind, ValidationPolicy};
use crate::store::{RecordStore, Visibility};

pub struct Engine<S, F> {
    store: S,
    evidence: F,
    policy: ValidationPolicy,
}

impl<S: RecordStore, F: EvidenceStore> Engine<S, F> {
    pub fn new(store: S, evidence: F, policy: ValidationPolicy) -> Self {
        Self {
            store,
            evidence,
            policy,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn evidence(&self) -> &F {
        &self.evidence
    }

    pub fn policy(&self) -> &ValidationPolicy {
        &self.policy
    }

    pub fn workflow(&self, kind: RecordKind) -> RecordWorkflow<'_, S, F> {
        RecordWorkflow::new(self, kind.descriptor())
    }

    /// Landing-page totals.
    ///
    /// Privileged actors see the member count and the organisation-wide contribution
    /// total; members see only their own contributions.
    ///
    /// # Errors
    ///
    /// `StorageFailure` if the store cannot be read.
    pub fn dashboard(&self, actor: &ActorContext) -> WorkflowResult<DashboardTotals> {
        let visibility = Visibility::for_actor(actor);
        let contributions = RecordKind::Contribution.descriptor();
        let total_users = if actor.is_privileged() {
            Some(self.store.count_users()?)
        } else {
            None
        };
        Ok(DashboardTotals {
            total_users,
            total_contributions: self.store.sum_amount(contributions, visibility)?,
            pending_contributions: self.store.count_pending(contributions, visibility)?,
        })
    }
}

impl<S: RecordStore, F> IdentityProvider for Engine<S, F> {
    fn resolve(&self, user_id: i64) -> Result<ActorContext, WorkflowError> {
        match self.store.find_user(user_id)? {
            Some(user) if user.is_active => Ok(user.actor()),
            Some(_) => {
                log::warn!("inactive user {user_id} attempted a request");
                Err(WorkflowError::forbidden("This account is inactive."))
            }
            None => Err(WorkflowError::forbidden("Unknown user.")),
        }
    }
}
