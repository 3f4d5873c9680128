//! Approval workflow behaviour against the in-memory record store.

use chrono::{NaiveDate, Utc};
use coffer::config::MediaConfig;
use coffer::record::{ApprovalState, RecordDetails};
use coffer::{
    ActorContext, ApprovalIds, Engine, EvidenceUpload, IdentityProvider, LoanStatus,
    LocalEvidenceStore, MemoryStore, NewUser, RecordDraft, RecordKind, RecordStore, Role,
    ValidationPolicy, WorkflowError,
};
use fake::faker::name::en::{FirstName, LastName};
use fake::Fake;
use rust_decimal::Decimal;
use std::sync::Barrier;
use tempfile::TempDir;

struct Fixture {
    engine: Engine<MemoryStore, LocalEvidenceStore>,
    media: TempDir,
    admin: ActorContext,
    alice: ActorContext,
    bob: ActorContext,
}

fn fixture() -> Fixture {
    let media = tempfile::tempdir().expect("media dir");
    let store = MemoryStore::new();
    let admin = store
        .insert_user(&NewUser::new("treasurer", Role::Admin).named("Tess", "Urer"))
        .expect("admin")
        .actor();
    let alice = store
        .insert_user(&NewUser::new("alice", Role::Member).named("Alice", "Mwangi"))
        .expect("alice")
        .actor();
    let bob = store
        .insert_user(&NewUser::new("bob", Role::Member).named("Bob", "Otieno"))
        .expect("bob")
        .actor();
    let evidence = LocalEvidenceStore::new(&MediaConfig {
        root: media.path().to_path_buf(),
        ..MediaConfig::default()
    });
    Fixture {
        engine: Engine::new(store, evidence, ValidationPolicy::default()),
        media,
        admin,
        alice,
        bob,
    }
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

fn dated(amount: i64) -> RecordDraft {
    RecordDraft {
        amount: Some(Decimal::from(amount)),
        date: Some(today()),
        note: Some("school fees".to_string()),
        ..RecordDraft::default()
    }
}

fn loan(amount: i64) -> RecordDraft {
    RecordDraft {
        amount: Some(Decimal::from(amount)),
        interest_rate: Some(Decimal::from(10)),
        repayment_period: Some(12),
        note: Some("roof repairs".to_string()),
        ..RecordDraft::default()
    }
}

fn contribution(amount: i64) -> RecordDraft {
    RecordDraft {
        contribution_type: Some("monthly".to_string()),
        period: Some("2024-06".to_string()),
        ..dated(amount)
    }
}

fn ids(values: &[i64]) -> ApprovalIds {
    ApprovalIds::from_raw(values.iter().map(i64::to_string)).expect("ids")
}

#[test]
fn test_withdrawal_lifecycle() {
    let fx = fixture();
    let withdrawals = fx.engine.workflow(RecordKind::Withdrawal);

    let created = withdrawals
        .create(&fx.alice, &dated(500), None)
        .expect("created");
    assert_eq!(created.amount, Decimal::from(500));
    assert_eq!(created.record_date, Some(today()));
    assert!(created.is_pre_approval());

    let own: Vec<i64> = withdrawals.list(&fx.alice).expect("list").iter().map(|r| r.id).collect();
    assert_eq!(own, vec![created.id]);
    assert!(withdrawals.list(&fx.bob).expect("list").is_empty());
    assert_eq!(withdrawals.list(&fx.admin).expect("list").len(), 1);

    let outcome = withdrawals
        .bulk_approve(&fx.admin, &ids(&[created.id]))
        .expect("approved");
    assert_eq!(outcome.approved(), 1);
    assert_eq!(outcome.approved_ids, vec![created.id]);

    let audit = withdrawals.signatures(&fx.admin).expect("audit");
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].record_id, created.id);
    assert_eq!(audit[0].signatory_id, fx.admin.user_id);
    assert_eq!(audit[0].requester_id, fx.alice.user_id);
    assert_eq!(audit[0].signatory_name, "Tess Urer");
    assert_eq!(audit[0].requester_name, "Alice Mwangi");

    let err = withdrawals.delete(&fx.admin, created.id).unwrap_err();
    assert!(matches!(err, WorkflowError::Conflict(_)), "{err}");
}

#[test]
fn test_mixed_bulk_approval_counts_only_pending() {
    let fx = fixture();
    let investments = fx.engine.workflow(RecordKind::Investment);
    let first = investments.create(&fx.alice, &dated(100), None).expect("first");
    let second = investments.create(&fx.bob, &dated(200), None).expect("second");
    let third = investments.create(&fx.bob, &dated(300), None).expect("third");
    investments
        .bulk_approve(&fx.admin, &ids(&[first.id]))
        .expect("pre-approve");

    let outcome = investments
        .bulk_approve(&fx.admin, &ids(&[first.id, second.id, 9_999, third.id]))
        .expect("approved");
    assert_eq!(outcome.requested, 4);
    assert_eq!(outcome.approved_ids, vec![second.id, third.id]);
    assert_eq!(outcome.message(), "2 of 4 investments approved.");

    let audit = investments.signatures(&fx.admin).expect("audit");
    assert_eq!(audit.len(), 3);
    let batch: Vec<_> = audit
        .iter()
        .filter(|s| s.record_id == second.id || s.record_id == third.id)
        .collect();
    assert_eq!(batch.len(), 2);
    assert!(batch.iter().all(|s| s.signed_at == outcome.signed_at));
}

#[test]
fn test_bulk_approval_is_idempotent() {
    let fx = fixture();
    let loans = fx.engine.workflow(RecordKind::Loan);
    let a = loans.create(&fx.alice, &loan(1_000), None).expect("a");
    let b = loans.create(&fx.bob, &loan(2_000), None).expect("b");
    let batch = ids(&[a.id, b.id]);

    assert_eq!(loans.bulk_approve(&fx.admin, &batch).expect("first").approved(), 2);
    assert_eq!(loans.bulk_approve(&fx.admin, &batch).expect("second").approved(), 0);
    assert_eq!(fx.engine.store().signature_count(RecordKind::Loan).expect("count"), 2);

    let approved = loans.get(&fx.admin, a.id).expect("loan");
    assert_eq!(approved.approval, ApprovalState::Loan(LoanStatus::Approved));
    match approved.details {
        RecordDetails::Loan { approved_at, .. } => assert!(approved_at.is_some()),
        other => panic!("unexpected details {other:?}"),
    }
}

#[test]
fn test_overlapping_approvals_sign_each_record_once() {
    let fx = fixture();
    let loans = fx.engine.workflow(RecordKind::Loan);
    let created: Vec<i64> = (0..30)
        .map(|n| {
            let owner = if n % 2 == 0 { &fx.alice } else { &fx.bob };
            loans.create(owner, &loan(500 + n), None).expect("loan").id
        })
        .collect();
    let batch = ids(&created);

    let barrier = Barrier::new(4);
    let outcomes: Vec<_> = std::thread::scope(|scope| {
        let runs: Vec<_> = (0..4)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    loans.bulk_approve(&fx.admin, &batch)
                })
            })
            .collect();
        runs.into_iter()
            .map(|run| run.join().expect("thread").expect("approve"))
            .collect()
    });

    let total: usize = outcomes.iter().map(|outcome| outcome.approved()).sum();
    assert_eq!(total, created.len());
    let mut approved: Vec<i64> = outcomes
        .iter()
        .flat_map(|outcome| outcome.approved_ids.iter().copied())
        .collect();
    approved.sort_unstable();
    assert_eq!(approved, created);
    assert_eq!(
        fx.engine.store().signature_count(RecordKind::Loan).expect("count"),
        created.len()
    );
}

#[test]
fn test_members_cannot_touch_others_records() {
    let fx = fixture();
    let investments = fx.engine.workflow(RecordKind::Investment);
    let record = investments.create(&fx.alice, &dated(100), None).expect("created");

    let edit = investments.edit(&fx.bob, record.id, &dated(150), None).unwrap_err();
    assert!(matches!(edit, WorkflowError::Forbidden(_)), "{edit}");
    let delete = investments.delete(&fx.bob, record.id).unwrap_err();
    assert!(matches!(delete, WorkflowError::Forbidden(_)), "{delete}");
    let approve = investments.bulk_approve(&fx.bob, &ids(&[record.id])).unwrap_err();
    assert!(matches!(approve, WorkflowError::Forbidden(_)), "{approve}");
    let approve_own = investments.bulk_approve(&fx.alice, &ids(&[record.id])).unwrap_err();
    assert!(matches!(approve_own, WorkflowError::Forbidden(_)), "{approve_own}");

    assert!(investments.get(&fx.alice, record.id).expect("still there").is_pre_approval());
}

#[test]
fn test_missing_record_is_not_found_before_forbidden() {
    let fx = fixture();
    let err = fx
        .engine
        .workflow(RecordKind::Withdrawal)
        .delete(&fx.bob, 4_242)
        .unwrap_err();
    assert!(matches!(err, WorkflowError::NotFound(_)), "{err}");
}

#[test]
fn test_owner_may_edit_and_delete_only_while_pending() {
    let fx = fixture();
    let withdrawals = fx.engine.workflow(RecordKind::Withdrawal);
    let record = withdrawals.create(&fx.alice, &dated(500), None).expect("created");

    let edited = withdrawals
        .edit(&fx.alice, record.id, &dated(450), None)
        .expect("edited");
    assert_eq!(edited.amount, Decimal::from(450));

    let other = withdrawals.create(&fx.alice, &dated(50), None).expect("other");
    withdrawals.delete(&fx.alice, other.id).expect("deleted");
    assert!(matches!(
        withdrawals.get(&fx.alice, other.id),
        Err(WorkflowError::NotFound(_))
    ));

    withdrawals
        .bulk_approve(&fx.admin, &ids(&[record.id]))
        .expect("approved");
    let edit = withdrawals.edit(&fx.alice, record.id, &dated(1), None).unwrap_err();
    assert!(matches!(edit, WorkflowError::Conflict(_)), "{edit}");
    let delete = withdrawals.delete(&fx.alice, record.id).unwrap_err();
    assert!(matches!(delete, WorkflowError::Conflict(_)), "{delete}");
}

#[test]
fn test_approved_loan_edit_names_status() {
    let fx = fixture();
    let loans = fx.engine.workflow(RecordKind::Loan);
    let record = loans.create(&fx.alice, &loan(800), None).expect("created");
    loans.bulk_approve(&fx.admin, &ids(&[record.id])).expect("approved");

    let err = loans.edit(&fx.alice, record.id, &loan(900), None).unwrap_err();
    assert!(matches!(err, WorkflowError::Conflict(_)), "{err}");
    assert!(err.to_string().contains("'approved'"), "{err}");
}

#[test]
fn test_failed_signature_insert_rolls_back_batch() {
    let fx = fixture();
    let withdrawals = fx.engine.workflow(RecordKind::Withdrawal);
    let a = withdrawals.create(&fx.alice, &dated(10), None).expect("a");
    let b = withdrawals.create(&fx.bob, &dated(20), None).expect("b");

    fx.engine.store().fail_signature_inserts(true);
    let err = withdrawals
        .bulk_approve(&fx.admin, &ids(&[a.id, b.id]))
        .unwrap_err();
    assert!(matches!(err, WorkflowError::StorageFailure(_)), "{err}");
    assert_eq!(err.status_code(), 500);

    assert_eq!(
        fx.engine.store().signature_count(RecordKind::Withdrawal).expect("count"),
        0
    );
    assert_eq!(withdrawals.pending_count(&fx.admin).expect("pending"), 2);
    assert!(withdrawals.get(&fx.admin, a.id).expect("a").is_pre_approval());

    fx.engine.store().fail_signature_inserts(false);
    let outcome = withdrawals
        .bulk_approve(&fx.admin, &ids(&[a.id, b.id]))
        .expect("retry");
    assert_eq!(outcome.approved(), 2);
}

#[test]
fn test_malformed_ids_are_filtered() {
    let fx = fixture();
    let withdrawals = fx.engine.workflow(RecordKind::Withdrawal);
    let record = withdrawals.create(&fx.alice, &dated(75), None).expect("created");

    let body = format!(r#"{{"approved_ids": ["abc", "{}", ""]}}"#, record.id);
    let outcome = withdrawals
        .approve_request(&fx.admin, Some("application/json"), body.as_bytes())
        .expect("approved");
    assert_eq!(outcome.requested, 1);
    assert_eq!(outcome.approved(), 1);

    let err = withdrawals
        .approve_request(&fx.admin, Some("application/json"), br#"{"approved_ids": ["abc", ""]}"#)
        .unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidInput(_)), "{err}");
}

#[test]
fn test_form_and_json_bodies_approve_the_same_way() {
    let fx = fixture();
    let investments = fx.engine.workflow(RecordKind::Investment);
    let a = investments.create(&fx.alice, &dated(10), None).expect("a");
    let b = investments.create(&fx.alice, &dated(20), None).expect("b");

    let form = format!("approved_ids%5B%5D={}", a.id);
    let by_form = investments
        .approve_request(
            &fx.admin,
            Some("application/x-www-form-urlencoded"),
            form.as_bytes(),
        )
        .expect("form");
    let json = format!(r#"{{"approved_ids": [{}]}}"#, b.id);
    let by_json = investments
        .approve_request(&fx.admin, None, json.as_bytes())
        .expect("json");
    assert_eq!(by_form.approved_ids, vec![a.id]);
    assert_eq!(by_json.approved_ids, vec![b.id]);
}

#[test]
fn test_privilege_checked_before_body_is_decoded() {
    let fx = fixture();
    let err = fx
        .engine
        .workflow(RecordKind::Loan)
        .approve_request(&fx.alice, Some("application/json"), b"garbage")
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Forbidden(_)), "{err}");
}

#[test]
fn test_contributions_have_no_signature_trail() {
    let fx = fixture();
    let contributions = fx.engine.workflow(RecordKind::Contribution);
    let record = contributions
        .create(&fx.alice, &contribution(250), None)
        .expect("created");
    let outcome = contributions
        .bulk_approve(&fx.admin, &ids(&[record.id]))
        .expect("approved");
    assert_eq!(outcome.approved(), 1);

    let err = contributions.signatures(&fx.admin).unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidInput(_)), "{err}");
    let err = fx.engine.workflow(RecordKind::Loan).signatures(&fx.alice).unwrap_err();
    assert!(matches!(err, WorkflowError::Forbidden(_)), "{err}");
}

#[test]
fn test_contribution_listing_is_scoped_to_owner() {
    let fx = fixture();
    let contributions = fx.engine.workflow(RecordKind::Contribution);
    contributions.create(&fx.alice, &contribution(10), None).expect("alice");
    contributions.create(&fx.bob, &contribution(20), None).expect("bob");

    assert_eq!(contributions.list(&fx.alice).expect("list").len(), 1);
    assert_eq!(contributions.list(&fx.admin).expect("list").len(), 2);
}

#[test]
fn test_inline_approval_only_for_privileged_contributions() {
    let fx = fixture();
    let contributions = fx.engine.workflow(RecordKind::Contribution);
    let mut draft = contribution(100);
    draft.approved = Some(true);

    let by_member = contributions.create(&fx.alice, &draft, None).expect("member");
    assert!(by_member.is_pre_approval());
    let by_admin = contributions.create(&fx.admin, &draft, None).expect("admin");
    assert_eq!(by_admin.approval, ApprovalState::Flag(true));

    let mut withdrawal = dated(100);
    withdrawal.approved = Some(true);
    let record = fx
        .engine
        .workflow(RecordKind::Withdrawal)
        .create(&fx.admin, &withdrawal, None)
        .expect("withdrawal");
    assert!(record.is_pre_approval());
}

#[test]
fn test_staff_submit_contributions_on_behalf_of_members() {
    let fx = fixture();
    let clerk = fx
        .engine
        .store()
        .insert_user(&NewUser::new("clerk", Role::Member).staff())
        .expect("clerk")
        .actor();
    let contributions = fx.engine.workflow(RecordKind::Contribution);

    let mut draft = contribution(60);
    draft.on_behalf_of = Some(fx.alice.user_id);
    let record = contributions.create(&clerk, &draft, None).expect("created");
    assert_eq!(record.user_id, fx.alice.user_id);
    match record.details {
        RecordDetails::Contribution { created_by, .. } => {
            assert_eq!(created_by, Some(clerk.user_id));
        }
        other => panic!("unexpected details {other:?}"),
    }

    let err = contributions.create(&fx.bob, &draft, None).unwrap_err();
    assert!(matches!(err, WorkflowError::Forbidden(_)), "{err}");

    draft.on_behalf_of = Some(77_777);
    let err = contributions.create(&clerk, &draft, None).unwrap_err();
    assert!(matches!(err, WorkflowError::NotFound(_)), "{err}");
}

#[test]
fn test_invalid_drafts_are_rejected_before_any_write() {
    let fx = fixture();
    let withdrawals = fx.engine.workflow(RecordKind::Withdrawal);
    let mut draft = dated(-5);
    let err = withdrawals.create(&fx.alice, &draft, None).unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidInput(_)), "{err}");

    draft.amount = Some(Decimal::from(5));
    draft.date = None;
    assert!(withdrawals.create(&fx.alice, &draft, None).is_err());
    assert!(withdrawals.list(&fx.admin).expect("list").is_empty());
}

#[test]
fn test_evidence_is_stored_and_cleaned_up_on_failure() {
    let fx = fixture();
    let investments = fx.engine.workflow(RecordKind::Investment);
    let upload = EvidenceUpload::new("deed.pdf", b"%PDF-1.4 deed".to_vec());

    let record = investments
        .create(&fx.alice, &dated(100), Some(&upload))
        .expect("created");
    let path = record.evidence.clone().expect("evidence path");
    assert!(path.starts_with("investments/"), "{path}");
    assert!(fx.media.path().join(&path).exists());

    let edited = investments
        .edit(&fx.alice, record.id, &dated(120), None)
        .expect("edited");
    assert_eq!(edited.evidence.as_deref(), Some(path.as_str()));

    fx.engine.store().fail_record_writes(true);
    let err = investments
        .create(&fx.alice, &dated(100), Some(&upload))
        .unwrap_err();
    assert!(matches!(err, WorkflowError::StorageFailure(_)), "{err}");
    let stored = std::fs::read_dir(fx.media.path().join("investments"))
        .expect("folder")
        .count();
    assert_eq!(stored, 1);
}

#[test]
fn test_pending_count_and_dashboard() {
    let fx = fixture();
    let contributions = fx.engine.workflow(RecordKind::Contribution);
    let a = contributions.create(&fx.alice, &contribution(100), None).expect("a");
    contributions.create(&fx.alice, &contribution(50), None).expect("b");
    contributions.create(&fx.bob, &contribution(25), None).expect("c");
    contributions.bulk_approve(&fx.admin, &ids(&[a.id])).expect("approved");

    assert_eq!(contributions.pending_count(&fx.admin).expect("admin"), 2);
    assert_eq!(contributions.pending_count(&fx.alice).expect("alice"), 1);

    let admin_view = fx.engine.dashboard(&fx.admin).expect("admin dashboard");
    assert_eq!(admin_view.total_users, Some(3));
    assert_eq!(admin_view.total_contributions, Decimal::from(175));
    assert_eq!(admin_view.pending_contributions, 2);

    let member_view = fx.engine.dashboard(&fx.alice).expect("member dashboard");
    assert_eq!(member_view.total_users, None);
    assert_eq!(member_view.total_contributions, Decimal::from(150));
    assert_eq!(member_view.pending_contributions, 1);
}

#[test]
fn test_identity_resolution() {
    let fx = fixture();
    let resolved = fx.engine.resolve(fx.admin.user_id).expect("admin");
    assert!(resolved.is_privileged());

    fx.engine.store().set_active(fx.bob.user_id, false).expect("deactivate");
    assert!(matches!(
        fx.engine.resolve(fx.bob.user_id),
        Err(WorkflowError::Forbidden(_))
    ));
    assert!(matches!(fx.engine.resolve(31_337), Err(WorkflowError::Forbidden(_))));
}

#[test]
fn test_generated_members_totals_and_audit() {
    let fx = fixture();
    let withdrawals = fx.engine.workflow(RecordKind::Withdrawal);
    let mut expected_total = Decimal::ZERO;
    let mut created = Vec::new();

    for i in 0..12 {
        let first: String = FirstName().fake();
        let last: String = LastName().fake();
        let member = fx
            .engine
            .store()
            .insert_user(&NewUser::new(format!("member{i}"), Role::Member).named(&first, &last))
            .expect("member")
            .actor();
        let amount: i64 = (1..50_000).fake();
        expected_total += Decimal::from(amount);
        contributions_for(&fx, &member, amount);
        let record = withdrawals.create(&member, &dated(amount), None).expect("withdrawal");
        created.push((record.id, format!("{first} {last}")));
    }

    let admin_view = fx.engine.dashboard(&fx.admin).expect("dashboard");
    assert_eq!(admin_view.total_contributions, expected_total);
    assert_eq!(admin_view.total_users, Some(15));

    let all: Vec<i64> = created.iter().map(|(id, _)| *id).collect();
    let outcome = withdrawals.bulk_approve(&fx.admin, &ids(&all)).expect("approve");
    assert_eq!(outcome.approved(), created.len());

    let audit = withdrawals.signatures(&fx.admin).expect("audit");
    assert_eq!(audit.len(), created.len());
    for (id, name) in &created {
        let entry = audit.iter().find(|e| e.record_id == *id).expect("signed");
        assert_eq!(&entry.requester_name, name);
        assert_eq!(entry.signed_at, outcome.signed_at);
    }
}

fn contributions_for(fx: &Fixture, member: &ActorContext, amount: i64) {
    fx.engine
        .workflow(RecordKind::Contribution)
        .create(member, &contribution(amount), None)
        .expect("contribution");
}
