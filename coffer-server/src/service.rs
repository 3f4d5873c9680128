//! `may_minihttp` adapter for [`Api`].

use crate::{Api, ApiRequest, ApiResponse, USER_HEADER};
use coffer::{EvidenceStore, RecordStore};
use may::coroutine::JoinHandle;
use may_minihttp::{HttpServer, HttpService, Request, Response};
use std::io::{self, Read};
use std::net::ToSocketAddrs;
use std::sync::Arc;

pub struct CofferService<S, F> {
    api: Arc<Api<S, F>>,
}

impl<S, F> Clone for CofferService<S, F> {
    fn clone(&self) -> Self {
        Self {
            api: Arc::clone(&self.api),
        }
    }
}

impl<S, F> CofferService<S, F> {
    pub fn new(api: Arc<Api<S, F>>) -> Self {
        Self { api }
    }
}

impl<S: RecordStore, F: EvidenceStore> HttpService for CofferService<S, F> {
    fn call(&mut self, req: Request, res: &mut Response) -> io::Result<()> {
        let method = req.method().to_string();
        let path = req.path().to_string();
        let user_id = header(&req, USER_HEADER);
        let content_type = header(&req, "content-type");

        let mut body = Vec::new();
        if method.eq_ignore_ascii_case("POST") {
            req.body().read_to_end(&mut body)?;
        }

        let request = ApiRequest {
            method: &method,
            path: &path,
            user_id: user_id.as_deref(),
            content_type: content_type.as_deref(),
            body: &body,
        };
        let response = self.api.handle(&request);
        log::debug!("{method} {path} -> {}", response.status);
        write_response(res, response);
        Ok(())
    }
}

fn header(req: &Request, name: &str) -> Option<String> {
    req.headers()
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .and_then(|h| std::str::from_utf8(h.value).ok())
        .map(str::to_string)
}

fn write_response(res: &mut Response, response: ApiResponse) {
    match response.status {
        200 => res.status_code(200, "OK"),
        400 => res.status_code(400, "Bad Request"),
        401 => res.status_code(401, "Unauthorized"),
        403 => res.status_code(403, "Forbidden"),
        404 => res.status_code(404, "Not Found"),
        405 => res.status_code(405, "Method Not Allowed"),
        409 => res.status_code(409, "Conflict"),
        _ => res.status_code(500, "Internal Server Error"),
    };
    if response.content_type == "application/json" {
        res.header("Content-Type: application/json");
    } else {
        res.header("Content-Type: text/plain; version=0.0.4; charset=utf-8");
    }
    res.body_vec(response.body);
}

/// Start serving `api` on `addr` in the background.
///
/// # Errors
///
/// Returns the bind error if the address is unavailable.
pub fn serve<S, F>(api: Arc<Api<S, F>>, addr: impl ToSocketAddrs) -> io::Result<JoinHandle<()>>
where
    S: RecordStore + Send + Sync + 'static,
    F: EvidenceStore + Send + Sync + 'static,
{
    HttpServer(CofferService::new(api)).start(addr)
}
