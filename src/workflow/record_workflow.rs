//! One workflow implementation, instantiated per record descriptor.

use crate::approval_ids::ApprovalIds;
use crate::error::{WorkflowError, WorkflowResult};
use crate::evidence::{EvidenceStore, EvidenceUpload};
use crate::executor::StoreError;
use crate::identity::ActorContext;
use crate::record::{
    ApprovalOutcome, FinancialRecord, NewRecord, RecordDescriptor, RecordDraft, RecordKind,
    RecordUpdate, SignatureEntry,
};
use crate::store::{RecordStore, Visibility};
use crate::workflow::Engine;
use chrono::{SubsecRound, Utc};

#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;
#[cfg(feature = "metrics")]
use crate::metrics::METRICS;

/// Create, edit, delete, approve and audit records of one kind.
pub struct RecordWorkflow<'a, S, F> {
    engine: &'a Engine<S, F>,
    descriptor: &'static RecordDescriptor,
}

impl<'a, S: RecordStore, F: EvidenceStore> RecordWorkflow<'a, S, F> {
    pub(crate) fn new(engine: &'a Engine<S, F>, descriptor: &'static RecordDescriptor) -> Self {
        Self { engine, descriptor }
    }

    pub fn kind(&self) -> RecordKind {
        self.descriptor.kind
    }

    pub fn descriptor(&self) -> &'static RecordDescriptor {
        self.descriptor
    }

    /// Records visible to `actor`, newest first.
    ///
    /// # Errors
    ///
    /// `StorageFailure` if the store cannot be read.
    pub fn list(&self, actor: &ActorContext) -> WorkflowResult<Vec<FinancialRecord>> {
        let visibility = Visibility::for_actor(actor);
        Ok(self.engine.store().list(self.descriptor, visibility)?)
    }

    /// One record, if `actor` may see it.
    ///
    /// # Errors
    ///
    /// `NotFound` for missing records and for records the actor may not see.
    pub fn get(&self, actor: &ActorContext, id: i64) -> WorkflowResult<FinancialRecord> {
        let visibility = Visibility::for_actor(actor);
        match self.engine.store().load(self.descriptor, id)? {
            Some(record) if visibility.admits(record.user_id) => Ok(record),
            _ => Err(self.not_found(id)),
        }
    }

    /// Submit a new pre-approval record.
    ///
    /// Staff and privileged actors may submit contributions for another member via
    /// `on_behalf_of`. A privileged actor may approve a contribution inline; any other
    /// approval request in the draft is ignored.
    ///
    /// # Errors
    ///
    /// `Forbidden` for on-behalf submissions without staff rights, `NotFound` for an
    /// unknown target member, `InvalidInput` for rejected fields or evidence.
    pub fn create(
        &self,
        actor: &ActorContext,
        draft: &RecordDraft,
        evidence: Option<&EvidenceUpload>,
    ) -> WorkflowResult<FinancialRecord> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::workflow_span(self.kind().as_str(), "create", actor.user_id)
            .entered();

        let owner_id = self.resolve_owner(actor, draft.on_behalf_of)?;
        let fields = self.engine.policy().validate(self.kind(), draft)?;
        let approved = self.inline_approval(actor, draft);

        let evidence_path = self.store_evidence(owner_id, evidence)?;
        let record = NewRecord {
            owner_id,
            created_by: actor.user_id,
            fields,
            evidence: evidence_path.clone(),
            approved,
        };
        let created = self.cleanup_on_error(
            evidence_path.as_deref(),
            self.engine.store().insert(self.descriptor, &record),
        )?;

        log::info!(
            "{} {} created by user {} for user {} (approved: {approved})",
            self.kind(),
            created.id,
            actor.user_id,
            owner_id
        );
        #[cfg(feature = "metrics")]
        METRICS.record_workflow_event(self.kind().as_str(), "create");
        Ok(created)
    }

    /// Replace the mutable fields of a pre-approval record.
    ///
    /// Preconditions are checked in order: the record exists, the actor owns it or is
    /// privileged, and it is still pre-approval. Omitting evidence keeps the stored file.
    ///
    /// # Errors
    ///
    /// `NotFound`, `Forbidden` or `Conflict` per the preconditions, `InvalidInput` for
    /// rejected fields.
    pub fn edit(
        &self,
        actor: &ActorContext,
        id: i64,
        draft: &RecordDraft,
        evidence: Option<&EvidenceUpload>,
    ) -> WorkflowResult<FinancialRecord> {
        #[cfg(feature = "tracing")]
        let _span =
            tracing_helpers::workflow_span(self.kind().as_str(), "edit", actor.user_id).entered();

        let record = self.mutable_record(actor, id, "edited")?;
        let fields = self.engine.policy().validate(self.kind(), draft)?;
        let approve = self.inline_approval(actor, draft);

        let evidence_path = self.store_evidence(record.user_id, evidence)?;
        let update = RecordUpdate {
            fields,
            evidence: evidence_path.clone(),
            approve,
        };
        let updated = self.cleanup_on_error(
            evidence_path.as_deref(),
            self.engine.store().update_pending(self.descriptor, id, &update),
        )?;

        match updated {
            Some(updated) => {
                log::info!("{} {id} edited by user {}", self.kind(), actor.user_id);
                #[cfg(feature = "metrics")]
                METRICS.record_workflow_event(self.kind().as_str(), "edit");
                Ok(updated)
            }
            None => {
                if let Some(path) = evidence_path.as_deref() {
                    self.engine.evidence().discard(path);
                }
                Err(self.processed_concurrently(id))
            }
        }
    }

    /// Hard-delete a pre-approval record.
    ///
    /// # Errors
    ///
    /// `NotFound`, `Forbidden` or `Conflict` as for [`RecordWorkflow::edit`].
    pub fn delete(&self, actor: &ActorContext, id: i64) -> WorkflowResult<()> {
        #[cfg(feature = "tracing")]
        let _span =
            tracing_helpers::workflow_span(self.kind().as_str(), "delete", actor.user_id).entered();

        self.mutable_record(actor, id, "deleted")?;
        if !self.engine.store().delete_pending(self.descriptor, id)? {
            return Err(self.processed_concurrently(id));
        }

        log::info!("{} {id} deleted by user {}", self.kind(), actor.user_id);
        #[cfg(feature = "metrics")]
        METRICS.record_workflow_event(self.kind().as_str(), "delete");
        Ok(())
    }

    /// Approve every pending record among `ids` in one transaction.
    ///
    /// Already-approved and unknown ids are skipped. Signature-bearing kinds get one
    /// signature per transitioned record, all sharing `signed_at`.
    ///
    /// # Errors
    ///
    /// `Forbidden` for non-privileged actors, `StorageFailure` if the transaction failed
    /// (nothing was approved).
    pub fn bulk_approve(
        &self,
        actor: &ActorContext,
        ids: &ApprovalIds,
    ) -> WorkflowResult<ApprovalOutcome> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::workflow_span(self.kind().as_str(), "approve", actor.user_id)
            .entered();

        self.require_privileged(actor, "approve")?;

        let signed_at = Utc::now().trunc_subsecs(6);
        let approved_ids = self
            .engine
            .store()
            .approve_pending(self.descriptor, ids.as_slice(), actor.user_id, signed_at)
            .map_err(|e| {
                log::error!(
                    "bulk approval of {} by user {} rolled back: {e}",
                    self.kind().plural(),
                    actor.user_id
                );
                WorkflowError::from(e)
            })?;

        let outcome = ApprovalOutcome {
            kind: self.kind(),
            requested: ids.len(),
            approved_ids,
            signed_at,
        };
        log::info!(
            "user {} approved {} of {} requested {}",
            actor.user_id,
            outcome.approved(),
            outcome.requested,
            self.kind().plural()
        );
        #[cfg(feature = "metrics")]
        {
            let approved = outcome.approved() as u64;
            let signatures = if self.descriptor.has_signatures() {
                approved
            } else {
                0
            };
            METRICS.record_approval(self.kind().as_str(), approved, signatures);
        }
        Ok(outcome)
    }

    /// Bulk approval straight from a request body, JSON or url-encoded form.
    ///
    /// Privilege is checked before the body is decoded.
    ///
    /// # Errors
    ///
    /// `Forbidden` for non-privileged actors, `InvalidInput` if no usable ids remain,
    /// otherwise as for [`RecordWorkflow::bulk_approve`].
    pub fn approve_request(
        &self,
        actor: &ActorContext,
        content_type: Option<&str>,
        body: &[u8],
    ) -> WorkflowResult<ApprovalOutcome> {
        self.require_privileged(actor, "approve")?;
        let ids = ApprovalIds::decode(content_type, body)?;
        self.bulk_approve(actor, &ids)
    }

    /// Signature audit trail, most recent first.
    ///
    /// # Errors
    ///
    /// `Forbidden` for non-privileged actors, `InvalidInput` for contributions.
    pub fn signatures(&self, actor: &ActorContext) -> WorkflowResult<Vec<SignatureEntry>> {
        self.require_privileged(actor, "view signatures of")?;
        if !self.descriptor.has_signatures() {
            return Err(WorkflowError::invalid(format!(
                "{} have no signature trail.",
                self.kind().plural()
            )));
        }
        Ok(self.engine.store().signatures(self.descriptor)?)
    }

    /// Pre-approval records visible to `actor`.
    ///
    /// # Errors
    ///
    /// `StorageFailure` if the store cannot be read.
    pub fn pending_count(&self, actor: &ActorContext) -> WorkflowResult<u64> {
        let visibility = Visibility::for_actor(actor);
        Ok(self.engine.store().count_pending(self.descriptor, visibility)?)
    }

    fn resolve_owner(&self, actor: &ActorContext, on_behalf_of: Option<i64>) -> WorkflowResult<i64> {
        let Some(target) = on_behalf_of.filter(|target| *target != actor.user_id) else {
            return Ok(actor.user_id);
        };
        if !actor.can_act_for_others() {
            log::warn!(
                "user {} may not submit a {} for user {target}",
                actor.user_id,
                self.kind()
            );
            return Err(WorkflowError::forbidden(
                "You do not have permission to submit records for other members.",
            ));
        }
        if self.kind() != RecordKind::Contribution {
            return Err(WorkflowError::invalid(format!(
                "A {} cannot be submitted on behalf of another member.",
                self.kind()
            )));
        }
        if self.engine.store().find_user(target)?.is_none() {
            return Err(WorkflowError::not_found(format!("Member {target} does not exist.")));
        }
        Ok(target)
    }

    fn inline_approval(&self, actor: &ActorContext, draft: &RecordDraft) -> bool {
        let requested = draft.approved.unwrap_or(false);
        let honoured =
            requested && self.kind() == RecordKind::Contribution && actor.is_privileged();
        if requested && !honoured {
            log::debug!(
                "ignoring approval flag on {} from user {}",
                self.kind(),
                actor.user_id
            );
        }
        honoured
    }

    /// Existence, then ownership, then pre-approval state.
    fn mutable_record(
        &self,
        actor: &ActorContext,
        id: i64,
        verb: &str,
    ) -> WorkflowResult<FinancialRecord> {
        let record = self
            .engine
            .store()
            .load(self.descriptor, id)?
            .ok_or_else(|| self.not_found(id))?;

        if !actor.can_mutate(record.user_id) {
            log::warn!(
                "user {} may not modify {} {id} owned by user {}",
                actor.user_id,
                self.kind(),
                record.user_id
            );
            return Err(WorkflowError::forbidden(format!(
                "You do not have permission to modify this {}.",
                self.kind()
            )));
        }
        if !record.is_pre_approval() {
            return Err(WorkflowError::conflict(format!(
                "This {} is already '{}' and cannot be {verb}.",
                self.kind(),
                record.approval.label()
            )));
        }
        Ok(record)
    }

    fn require_privileged(&self, actor: &ActorContext, action: &str) -> WorkflowResult<()> {
        if actor.is_privileged() {
            return Ok(());
        }
        log::warn!(
            "user {} ({}) may not {action} {}",
            actor.user_id,
            actor.role,
            self.kind().plural()
        );
        Err(WorkflowError::forbidden(format!(
            "You do not have permission to {action} {}.",
            self.kind().plural()
        )))
    }

    fn store_evidence(
        &self,
        owner_id: i64,
        upload: Option<&EvidenceUpload>,
    ) -> WorkflowResult<Option<String>> {
        upload
            .map(|upload| self.engine.evidence().store(self.kind(), owner_id, upload))
            .transpose()
    }

    fn cleanup_on_error<T>(
        &self,
        evidence_path: Option<&str>,
        result: Result<T, StoreError>,
    ) -> WorkflowResult<T> {
        result.map_err(|e| {
            if let Some(path) = evidence_path {
                self.engine.evidence().discard(path);
            }
            WorkflowError::from(e)
        })
    }

    fn not_found(&self, id: i64) -> WorkflowError {
        WorkflowError::not_found(format!("No {} with id {id}.", self.kind()))
    }

    fn processed_concurrently(&self, id: i64) -> WorkflowError {
        WorkflowError::conflict(format!(
            "This {} ({id}) was processed by another request.",
            self.kind()
        ))
    }
}
