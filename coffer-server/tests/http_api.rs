//! End-to-end requests against an in-process server backed by the memory store.

use chrono::Utc;
use coffer::config::MediaConfig;
use coffer::{
    Engine, LocalEvidenceStore, MemoryStore, NewUser, RecordDraft, RecordKind, RecordStore, Role,
    ValidationPolicy,
};
use coffer_server::{serve, Api};
use rust_decimal::Decimal;
use serde_json::Value;
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

struct Server {
    base: String,
    admin: i64,
    member: i64,
    withdrawals: Vec<i64>,
    _media: tempfile::TempDir,
}

fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    listener.local_addr().expect("addr").port()
}

fn start() -> Server {
    let media = tempfile::tempdir().expect("media");
    let store = MemoryStore::new();
    let admin = store
        .insert_user(&NewUser::new("treasurer", Role::Admin).named("Tess", "Urer"))
        .expect("admin");
    let member = store
        .insert_user(&NewUser::new("alice", Role::Member).named("Alice", "Mwangi"))
        .expect("member");
    let evidence = LocalEvidenceStore::new(&MediaConfig {
        root: media.path().to_path_buf(),
        ..MediaConfig::default()
    });
    let engine = Engine::new(store, evidence, ValidationPolicy::default());

    let draft = RecordDraft {
        amount: Some(Decimal::from(250)),
        date: Some(Utc::now().date_naive()),
        note: Some("school fees".to_string()),
        ..RecordDraft::default()
    };
    let workflow = engine.workflow(RecordKind::Withdrawal);
    let withdrawals = (0..2)
        .map(|_| workflow.create(&member.actor(), &draft, None).expect("withdrawal").id)
        .collect();

    let addr = format!("127.0.0.1:{}", free_port());
    serve(Arc::new(Api::new(engine)), addr.as_str()).expect("serve");
    let server = Server {
        base: format!("http://{addr}"),
        admin: admin.id,
        member: member.id,
        withdrawals,
        _media: media,
    };
    wait_until_ready(&server.base);
    server
}

fn wait_until_ready(base: &str) {
    for _ in 0..100 {
        if ureq::get(&format!("{base}/health")).call().is_ok() {
            return;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    panic!("server at {base} did not come up");
}

fn read(result: Result<ureq::Response, ureq::Error>) -> (u16, Value) {
    let response = match result {
        Ok(response) => response,
        Err(ureq::Error::Status(_, response)) => response,
        Err(e) => panic!("transport error: {e}"),
    };
    let status = response.status();
    let text = response.into_string().expect("body");
    (status, serde_json::from_str(&text).unwrap_or(Value::Null))
}

fn get(server: &Server, path: &str, user: i64) -> (u16, Value) {
    read(
        ureq::get(&format!("{}{path}", server.base))
            .set("X-User-Id", &user.to_string())
            .call(),
    )
}

fn post(server: &Server, path: &str, user: i64, content_type: &str, body: &str) -> (u16, Value) {
    read(
        ureq::post(&format!("{}{path}", server.base))
            .set("X-User-Id", &user.to_string())
            .set("Content-Type", content_type)
            .send_string(body),
    )
}

#[test]
fn test_bulk_approval_over_http() {
    let server = start();
    let first = server.withdrawals[0];

    let (status, body) = get(&server, "/withdrawals/pending-count", server.admin);
    assert_eq!(status, 200);
    assert_eq!(body["count"], 2);

    let payload = format!(r#"{{"approved_ids": [{first}, "junk", 424242]}}"#);
    let (status, body) = post(&server, "/withdrawals/approve", server.admin, "application/json", &payload);
    assert_eq!(status, 200, "{body}");
    assert_eq!(body["success"], true);
    assert_eq!(body["approved"], 1);
    assert_eq!(body["requested"], 2);
    assert_eq!(body["message"], "1 of 2 withdrawals approved.");

    let (status, body) = get(&server, "/withdrawals/signatures", server.admin);
    assert_eq!(status, 200);
    let entries = body.as_array().expect("entries");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["record_id"], first);
    assert_eq!(entries[0]["requester_name"], "Alice Mwangi");
}

#[test]
fn test_form_encoded_approval() {
    let server = start();
    let second = server.withdrawals[1];
    let form = format!("approved_ids%5B%5D={second}");
    let (status, body) = post(
        &server,
        "/withdrawals/approve",
        server.admin,
        "application/x-www-form-urlencoded",
        &form,
    );
    assert_eq!(status, 200, "{body}");
    assert_eq!(body["approved_ids"], serde_json::json!([second]));
}

#[test]
fn test_member_requests() {
    let server = start();

    let (status, body) = post(
        &server,
        "/withdrawals/approve",
        server.member,
        "application/json",
        r#"{"approved_ids": [1]}"#,
    );
    assert_eq!(status, 403);
    assert_eq!(body["status"], 403);

    let (status, body) = get(&server, "/withdrawals", server.member);
    assert_eq!(status, 200);
    assert_eq!(body.as_array().map(Vec::len), Some(2));

    let (status, body) = get(&server, "/dashboard", server.member);
    assert_eq!(status, 200);
    assert!(body.get("total_users").is_none());

    let (status, _) = get(&server, "/withdrawals/signatures", server.member);
    assert_eq!(status, 403);
}

#[test]
fn test_routing_errors() {
    let server = start();
    let (status, _) = get(&server, "/pets", server.admin);
    assert_eq!(status, 404);
    let (status, _) = get(&server, "/loans/approve", server.admin);
    assert_eq!(status, 405);
    let (status, body) = read(ureq::get(&format!("{}/loans", server.base)).call());
    assert_eq!(status, 401);
    assert_eq!(body["kind"], "unauthenticated");
}
