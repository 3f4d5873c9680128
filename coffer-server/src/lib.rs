//! HTTP surface for the coffer approval workflow.
//!
//! [`Api`] maps requests onto the workflow engine and renders JSON responses; it knows
//! nothing about sockets, so it can be driven directly in tests. [`service`] adapts it
//! to `may_minihttp`.
//!
//! The acting user is taken from the `X-User-Id` header, which the fronting
//! authentication proxy is expected to set.

pub mod service;

use coffer::{
    ActorContext, Engine, EvidenceStore, IdentityProvider, RecordKind, RecordStore,
    WorkflowError,
};
use serde::Serialize;
use serde_json::json;

pub use service::{serve, CofferService};

pub const USER_HEADER: &str = "x-user-id";

/// Transport-independent view of one request.
#[derive(Debug, Clone, Copy)]
pub struct ApiRequest<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub user_id: Option<&'a str>,
    pub content_type: Option<&'a str>,
    pub body: &'a [u8],
}

impl<'a> ApiRequest<'a> {
    pub fn get(path: &'a str) -> Self {
        Self {
            method: "GET",
            path,
            user_id: None,
            content_type: None,
            body: &[],
        }
    }

    pub fn post(path: &'a str, content_type: &'a str, body: &'a [u8]) -> Self {
        Self {
            method: "POST",
            path,
            user_id: None,
            content_type: Some(content_type),
            body,
        }
    }

    pub fn as_user(mut self, user_id: &'a str) -> Self {
        self.user_id = Some(user_id);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl ApiResponse {
    fn json(status: u16, value: &impl Serialize) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self {
                status,
                content_type: "application/json",
                body,
            },
            Err(e) => {
                log::error!("failed to serialize response: {e}");
                Self::error(500, "internal_error", "Failed to render response.")
            }
        }
    }

    fn error(status: u16, kind: &str, message: &str) -> Self {
        let body = json!({ "error": message, "kind": kind, "status": status });
        Self {
            status,
            content_type: "application/json",
            body: body.to_string().into_bytes(),
        }
    }

    fn workflow_error(err: &WorkflowError) -> Self {
        if let WorkflowError::StorageFailure(e) = err {
            log::error!("request failed in storage: {e}");
        }
        Self::json(err.status_code(), &err.to_payload())
    }

    pub fn json_body(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap_or(serde_json::Value::Null)
    }
}

enum Route {
    Health,
    Metrics,
    Workflow(WorkflowRoute),
}

/// Routes that act on behalf of a resolved user.
enum WorkflowRoute {
    Dashboard,
    List(RecordKind),
    Signatures(RecordKind),
    PendingCount(RecordKind),
    Approve(RecordKind),
}

impl Route {
    fn parse(path: &str) -> Option<Self> {
        let path = path.split('?').next().unwrap_or_default();
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
        let route = match segments.as_slice() {
            ["health"] => Route::Health,
            ["metrics"] => Route::Metrics,
            ["dashboard"] => Route::Workflow(WorkflowRoute::Dashboard),
            [kind] => Route::Workflow(WorkflowRoute::List(RecordKind::from_plural(kind)?)),
            [kind, action] => {
                let kind = RecordKind::from_plural(kind)?;
                Route::Workflow(match *action {
                    "signatures" => WorkflowRoute::Signatures(kind),
                    "pending-count" => WorkflowRoute::PendingCount(kind),
                    "approve" => WorkflowRoute::Approve(kind),
                    _ => return None,
                })
            }
            _ => return None,
        };
        Some(route)
    }

    fn method(&self) -> &'static str {
        match self {
            Route::Workflow(WorkflowRoute::Approve(_)) => "POST",
            _ => "GET",
        }
    }
}

pub struct Api<S, F> {
    engine: Engine<S, F>,
}

impl<S: RecordStore, F: EvidenceStore> Api<S, F> {
    pub fn new(engine: Engine<S, F>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Engine<S, F> {
        &self.engine
    }

    pub fn handle(&self, request: &ApiRequest<'_>) -> ApiResponse {
        let Some(route) = Route::parse(request.path) else {
            return ApiResponse::error(404, "not_found", "No such endpoint.");
        };
        if !request.method.eq_ignore_ascii_case(route.method()) {
            return ApiResponse::error(405, "method_not_allowed", "Method not allowed.");
        }

        match route {
            Route::Health => ApiResponse::json(200, &json!({ "status": "ok" })),
            Route::Metrics => metrics(),
            Route::Workflow(route) => match self.actor(request) {
                Ok(actor) => self.dispatch(route, &actor, request),
                Err(response) => response,
            },
        }
    }

    fn actor(&self, request: &ApiRequest<'_>) -> Result<ActorContext, ApiResponse> {
        let user_id = request
            .user_id
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .ok_or_else(|| {
                ApiResponse::error(401, "unauthenticated", "Authentication required.")
            })?;
        self.engine
            .resolve(user_id)
            .map_err(|e| ApiResponse::workflow_error(&e))
    }

    fn dispatch(
        &self,
        route: WorkflowRoute,
        actor: &ActorContext,
        request: &ApiRequest<'_>,
    ) -> ApiResponse {
        match route {
            WorkflowRoute::Dashboard => respond(self.engine.dashboard(actor)),
            WorkflowRoute::List(kind) => respond(self.engine.workflow(kind).list(actor)),
            WorkflowRoute::Signatures(kind) => {
                respond(self.engine.workflow(kind).signatures(actor))
            }
            WorkflowRoute::PendingCount(kind) => respond(
                self.engine
                    .workflow(kind)
                    .pending_count(actor)
                    .map(|count| json!({ "count": count })),
            ),
            WorkflowRoute::Approve(kind) => respond(
                self.engine
                    .workflow(kind)
                    .approve_request(actor, request.content_type, request.body)
                    .map(|outcome| ApprovalBody {
                        success: true,
                        approved: outcome.approved(),
                        requested: outcome.requested,
                        message: outcome.message(),
                        approved_ids: outcome.approved_ids,
                    }),
            ),
        }
    }
}

#[derive(Serialize)]
struct ApprovalBody {
    success: bool,
    approved: usize,
    requested: usize,
    message: String,
    approved_ids: Vec<i64>,
}

fn respond<T: Serialize>(result: Result<T, WorkflowError>) -> ApiResponse {
    match result {
        Ok(body) => ApiResponse::json(200, &body),
        Err(e) => ApiResponse::workflow_error(&e),
    }
}

#[cfg(feature = "metrics")]
fn metrics() -> ApiResponse {
    match coffer::metrics::METRICS.render() {
        Ok(text) => ApiResponse {
            status: 200,
            content_type: "text/plain; version=0.0.4",
            body: text.into_bytes(),
        },
        Err(e) => {
            log::error!("{e}");
            ApiResponse::error(500, "internal_error", "Failed to render metrics.")
        }
    }
}

#[cfg(not(feature = "metrics"))]
fn metrics() -> ApiResponse {
    ApiResponse::error(404, "not_found", "Metrics are not enabled.")
}

#[cfg(test)]
mod tests {
    use super::*;
    use coffer::config::MediaConfig;
    use coffer::{LocalEvidenceStore, MemoryStore, NewUser, Role, ValidationPolicy};

    fn api() -> (Api<MemoryStore, LocalEvidenceStore>, tempfile::TempDir) {
        let media = tempfile::tempdir().expect("media");
        let store = MemoryStore::new();
        store
            .insert_user(&NewUser::new("admin", Role::Admin))
            .expect("admin");
        store
            .insert_user(&NewUser::new("member", Role::Member))
            .expect("member");
        let evidence = LocalEvidenceStore::new(&MediaConfig {
            root: media.path().to_path_buf(),
            ..MediaConfig::default()
        });
        (
            Api::new(Engine::new(store, evidence, ValidationPolicy::default())),
            media,
        )
    }

    #[test]
    fn test_route_parsing() {
        assert!(matches!(
            Route::parse("/loans"),
            Some(Route::Workflow(WorkflowRoute::List(RecordKind::Loan)))
        ));
        assert!(matches!(
            Route::parse("/withdrawals/approve/"),
            Some(Route::Workflow(WorkflowRoute::Approve(RecordKind::Withdrawal)))
        ));
        assert!(matches!(
            Route::parse("/investments/pending-count?x=1"),
            Some(Route::Workflow(WorkflowRoute::PendingCount(RecordKind::Investment)))
        ));
        assert!(matches!(Route::parse("/health"), Some(Route::Health)));
        assert!(Route::parse("/pets").is_none());
        assert!(Route::parse("/loans/7/edit").is_none());
    }

    #[test]
    fn test_unknown_path_and_wrong_method() {
        let (api, _media) = api();
        assert_eq!(api.handle(&ApiRequest::get("/nope")).status, 404);
        assert_eq!(api.handle(&ApiRequest::get("/loans/approve").as_user("1")).status, 405);
        let post = ApiRequest::post("/loans", "application/json", b"{}").as_user("1");
        assert_eq!(api.handle(&post).status, 405);
    }

    #[test]
    fn test_health_needs_no_user() {
        let (api, _media) = api();
        let response = api.handle(&ApiRequest::get("/health"));
        assert_eq!(response.status, 200);
        assert_eq!(response.json_body()["status"], "ok");
    }

    #[test]
    fn test_missing_or_unknown_user() {
        let (api, _media) = api();
        assert_eq!(api.handle(&ApiRequest::get("/loans")).status, 401);
        assert_eq!(api.handle(&ApiRequest::get("/loans").as_user("abc")).status, 401);
        let unknown = api.handle(&ApiRequest::get("/loans").as_user("999"));
        assert_eq!(unknown.status, 403);
        assert_eq!(unknown.json_body()["kind"], "forbidden");
    }

    #[test]
    fn test_member_cannot_approve() {
        let (api, _media) = api();
        let request =
            ApiRequest::post("/loans/approve", "application/json", br#"{"approved_ids":[1]}"#)
                .as_user("2");
        let response = api.handle(&request);
        assert_eq!(response.status, 403);
        assert_eq!(response.json_body()["status"], 403);
    }

    #[test]
    fn test_empty_approval_is_bad_request() {
        let (api, _media) = api();
        let request =
            ApiRequest::post("/loans/approve", "application/json", br#"{"approved_ids":["x"]}"#)
                .as_user("1");
        let response = api.handle(&request);
        assert_eq!(response.status, 400);
        assert_eq!(response.json_body()["kind"], "invalid_input");
    }

    #[test]
    fn test_contribution_signatures_rejected() {
        let (api, _media) = api();
        let response = api.handle(&ApiRequest::get("/contributions/signatures").as_user("1"));
        assert_eq!(response.status, 400);
    }
}
