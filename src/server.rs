//! HTTP front end on tiny_http.
//!
//! Routing is a pure function from [`ApiRequest`] to [`ApiResponse`]; the
//! tiny_http loop only reads bodies and writes responses.

use std::io::{self, Cursor, Read};
use std::ffi::OsStr;
use std::path::{Component, Path};
use std::sync::Arc;
use std::thread;

use chrono::Utc;
use tiny_http::{Header, Method, Request, Response, Server, StatusCode};

use crate::catalog::Catalog;
use crate::config::DEFAULT_CONFIG_FILE;
use crate::error::CatalogError;
use crate::ingest::ManualEntry;
use crate::llm::{AiClient, AiReply, AiRequest};
use crate::multipart::{boundary_from_content_type, parse_multipart};

const API_ROUTES: [&str; 5] = ["/api/ping", "/api/upload", "/api/entry", "/api/search", "/api/ai"];

pub(crate) struct ServerContext {
    pub(crate) catalog: Catalog,
    pub(crate) ai: AiClient,
}

impl ServerContext {
    pub(crate) fn new(catalog: Catalog) -> Self {
        let ai = AiClient::new(catalog.config.ai.clone());
        Self { catalog, ai }
    }
}

pub(crate) struct ApiRequest<'a> {
    pub(crate) method: &'a Method,
    pub(crate) url: &'a str,
    pub(crate) content_type: Option<&'a str>,
    pub(crate) body: &'a [u8],
}

#[derive(Debug)]
pub(crate) struct ApiResponse {
    pub(crate) status: u16,
    pub(crate) content_type: String,
    pub(crate) body: Vec<u8>,
}

impl ApiResponse {
    fn json(status: u16, value: serde_json::Value) -> Self {
        Self {
            status,
            content_type: "application/json".to_string(),
            body: value.to_string().into_bytes(),
        }
    }

    fn error(status: u16, message: &str) -> Self {
        Self::json(status, serde_json::json!({ "error": message }))
    }

    fn from_error(err: &CatalogError) -> Self {
        if err.status_code() >= 500 {
            tracing::error!(error = %err, "request failed");
        }
        Self::error(err.status_code(), &err.to_string())
    }

    fn file(path_hint: &str, body: Vec<u8>) -> Self {
        Self {
            status: 200,
            content_type: content_type_for(path_hint),
            body,
        }
    }

    fn into_tiny(self) -> Response<Cursor<Vec<u8>>> {
        let mut response = Response::from_data(self.body).with_status_code(StatusCode(self.status));
        if let Ok(header) = Header::from_bytes(&b"Content-Type"[..], self.content_type.as_bytes()) {
            response = response.with_header(header);
        }
        response
    }
}

// ── Serving loop ─────────────────────────────────────────────────────────

pub(crate) fn run_server(catalog: Catalog) -> Result<(), Box<dyn std::error::Error>> {
    let addr = catalog.config.listen_addr();
    let server = Server::http(&addr)
        .map_err(|e| io::Error::other(format!("server: {e}")))?;
    tracing::info!("research catalog listening on http://{addr}");

    let workers = catalog.config.workers.max(1);
    let server = Arc::new(server);
    let ctx = Arc::new(ServerContext::new(catalog));

    let mut handles = Vec::with_capacity(workers);
    for worker in 0..workers {
        let server = Arc::clone(&server);
        let ctx = Arc::clone(&ctx);
        let handle = thread::Builder::new()
            .name(format!("http-{worker}"))
            .spawn(move || serve_requests(&server, &ctx))?;
        handles.push(handle);
    }
    for handle in handles {
        if handle.join().is_err() {
            tracing::error!("http worker panicked");
        }
    }
    Ok(())
}

fn serve_requests(server: &Server, ctx: &ServerContext) {
    loop {
        match server.recv() {
            Ok(request) => respond(ctx, request),
            Err(err) => {
                tracing::error!(error = %err, "accept failed; worker exiting");
                break;
            }
        }
    }
}

fn respond(ctx: &ServerContext, mut request: Request) {
    let method = request.method().clone();
    let url = request.url().to_string();
    let content_type = request
        .headers()
        .iter()
        .find(|h| h.field.equiv("Content-Type"))
        .map(|h| h.value.as_str().to_string());

    let response = match read_body(&mut request, ctx.catalog.config.max_upload_bytes) {
        Ok(body) => handle(
            ctx,
            &ApiRequest {
                method: &method,
                url: &url,
                content_type: content_type.as_deref(),
                body: &body,
            },
        ),
        Err(response) => response,
    };

    tracing::info!(method = %method, url = %url, status = response.status, "request");
    if let Err(err) = request.respond(response.into_tiny()) {
        tracing::debug!(error = %err, "client went away before the response was sent");
    }
}

fn read_body(request: &mut Request, max: u64) -> Result<Vec<u8>, ApiResponse> {
    let too_large = || ApiResponse::error(413, "request body too large");
    if request.body_length().is_some_and(|len| len as u64 > max) {
        return Err(too_large());
    }
    let mut body = Vec::new();
    request
        .as_reader()
        .take(max + 1)
        .read_to_end(&mut body)
        .map_err(|e| ApiResponse::error(400, &format!("read body: {e}")))?;
    if body.len() as u64 > max {
        return Err(too_large());
    }
    Ok(body)
}

// ── Routing ──────────────────────────────────────────────────────────────

pub(crate) fn handle(ctx: &ServerContext, req: &ApiRequest) -> ApiResponse {
    let (path, query) = req.url.split_once('?').unwrap_or((req.url, ""));

    match (req.method, path) {
        (Method::Get, "/api/ping") => ping(),
        (Method::Post, "/api/upload") => upload(ctx, req),
        (Method::Post, "/api/entry") => add_entry(ctx, req.body),
        (Method::Get, "/api/search") => search(ctx, query),
        (Method::Post, "/api/ai") => ai(ctx, req.body),
        (Method::Get, p) if p.starts_with("/api/entries/") => show_entry(ctx, &p["/api/entries/".len()..]),
        (Method::Get, p) if p.starts_with("/uploads/") => serve_upload(ctx, &p["/uploads/".len()..]),
        (_, p) if API_ROUTES.contains(&p) => ApiResponse::error(405, "method not allowed"),
        (_, p) if p.starts_with("/api/") => ApiResponse::error(404, "not found"),
        (Method::Get | Method::Head, p) => serve_static(ctx, p),
        _ => ApiResponse::error(405, "method not allowed"),
    }
}

fn ping() -> ApiResponse {
    let time = Utc::now().naive_utc().format("%Y-%m-%dT%H:%M:%S%.6f").to_string();
    ApiResponse::json(200, serde_json::json!({ "ok": true, "time": time }))
}

fn upload(ctx: &ServerContext, req: &ApiRequest) -> ApiResponse {
    let missing = || ApiResponse::error(400, "missing file");
    let Some(boundary) = req.content_type.and_then(boundary_from_content_type) else {
        return missing();
    };
    let parts = match parse_multipart(req.body, &boundary) {
        Ok(parts) => parts,
        Err(err) => return ApiResponse::from_error(&err),
    };
    let Some((filename, data)) = parts.into_iter().find_map(|part| match part.filename {
        Some(name) if part.name == "file" && !name.is_empty() => Some((name, part.data)),
        _ => None,
    }) else {
        return missing();
    };

    match ctx.catalog.ingest_upload(&filename, &data) {
        Ok(outcome) => ApiResponse::json(
            200,
            serde_json::json!({ "ok": true, "id": outcome.id, "filename": outcome.filename }),
        ),
        Err(err) => ApiResponse::from_error(&err),
    }
}

fn add_entry(ctx: &ServerContext, body: &[u8]) -> ApiResponse {
    let entry: ManualEntry = match parse_json_body(body) {
        Ok(entry) => entry,
        Err(response) => return response,
    };
    match ctx.catalog.add_entry(entry) {
        Ok(id) => ApiResponse::json(200, serde_json::json!({ "ok": true, "id": id })),
        Err(err) => ApiResponse::from_error(&err),
    }
}

fn search(ctx: &ServerContext, query: &str) -> ApiResponse {
    let q = url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == "q")
        .map(|(_, value)| value.into_owned())
        .unwrap_or_default();
    match ctx.catalog.execute_search(&q) {
        Ok(results) => ApiResponse::json(200, serde_json::json!({ "results": results })),
        Err(err) => ApiResponse::from_error(&err),
    }
}

fn ai(ctx: &ServerContext, body: &[u8]) -> ApiResponse {
    let request: AiRequest = match parse_json_body(body) {
        Ok(request) => request,
        Err(response) => return response,
    };
    match ctx.ai.complete(&request.prompt) {
        Ok(AiReply::Json(value)) => ApiResponse::json(200, value),
        Ok(AiReply::Failed { status, text }) => ApiResponse::json(
            500,
            serde_json::json!({ "error": "AI request failed", "status": status, "text": text }),
        ),
        Err(err) => ApiResponse::from_error(&err),
    }
}

fn show_entry(ctx: &ServerContext, raw_id: &str) -> ApiResponse {
    let Ok(id) = raw_id.parse() else {
        return ApiResponse::error(404, "not found");
    };
    match ctx.catalog.record(id) {
        Ok(record) => match serde_json::to_value(&record) {
            Ok(value) => ApiResponse::json(200, value),
            Err(err) => ApiResponse::error(500, &err.to_string()),
        },
        Err(err) => ApiResponse::from_error(&err),
    }
}

fn serve_upload(ctx: &ServerContext, raw_name: &str) -> ApiResponse {
    let Ok(name) = urlencoding::decode(raw_name) else {
        return ApiResponse::error(404, "not found");
    };
    match ctx.catalog.fetch_upload(&name) {
        Ok(bytes) => ApiResponse::file(&name, bytes),
        Err(err) => ApiResponse::from_error(&err),
    }
}

fn serve_static(ctx: &ServerContext, path: &str) -> ApiResponse {
    let not_found = || ApiResponse::error(404, "not found");
    let Ok(decoded) = urlencoding::decode(path) else {
        return not_found();
    };
    let relative = decoded.trim_start_matches('/');
    let relative = if relative.is_empty() { "index.html" } else { relative };
    if relative.contains('\\')
        || !Path::new(relative)
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
    {
        return not_found();
    }
    let full = ctx.catalog.config.static_dir.join(relative);
    if !full.is_file() || is_private_file(ctx, &full) {
        return not_found();
    }
    match std::fs::read(&full) {
        Ok(bytes) => ApiResponse::file(relative, bytes),
        Err(err) => ApiResponse::from_error(&CatalogError::Io(err)),
    }
}

/// Catalog state that may sit under the static root: the database and its
/// WAL side files, the config file (it can hold the API key), hidden files
/// and staging files.
fn is_private_file(ctx: &ServerContext, full: &Path) -> bool {
    let name = full.file_name().and_then(OsStr::to_str).unwrap_or("");
    if name.is_empty() || name.starts_with('.') || name.ends_with(".tmp") || name == DEFAULT_CONFIG_FILE {
        return true;
    }
    let Ok(canonical) = full.canonicalize() else {
        return true;
    };
    let db_path = &ctx.catalog.config.db_path;
    ["", "-wal", "-shm", "-journal"].iter().any(|suffix| {
        let mut side = db_path.as_os_str().to_owned();
        side.push(suffix);
        Path::new(&side).canonicalize().is_ok_and(|p| p == canonical)
    })
}

/// Empty bodies decode as the type's defaults.
fn parse_json_body<T>(body: &[u8]) -> Result<T, ApiResponse>
where
    T: serde::de::DeserializeOwned + Default,
{
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiResponse::error(400, &format!("invalid JSON body: {e}")))
}

fn content_type_for(path: &str) -> String {
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    let textual = mime.type_() == mime_guess::mime::TEXT || mime.subtype() == "javascript";
    if textual && mime.get_param(mime_guess::mime::CHARSET).is_none() {
        format!("{mime}; charset=utf-8")
    } else {
        mime.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::test_support::temp_catalog;

    fn context(full_text: bool) -> (tempfile::TempDir, ServerContext) {
        let (dir, catalog) = temp_catalog(full_text);
        (dir, ServerContext::new(catalog))
    }

    fn call(ctx: &ServerContext, method: Method, url: &str, content_type: Option<&str>, body: &[u8]) -> ApiResponse {
        handle(
            ctx,
            &ApiRequest {
                method: &method,
                url,
                content_type,
                body,
            },
        )
    }

    fn json_of(response: &ApiResponse) -> serde_json::Value {
        serde_json::from_slice(&response.body).unwrap()
    }

    fn multipart_body(boundary: &str, filename: &str, data: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        body.extend_from_slice(
            format!("Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n")
                .as_bytes(),
        );
        body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
        body
    }

    #[test]
    fn test_ping() {
        let (_dir, ctx) = context(true);
        let response = call(&ctx, Method::Get, "/api/ping", None, b"");
        assert_eq!(response.status, 200);
        let json = json_of(&response);
        assert_eq!(json["ok"], true);
        assert!(json["time"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn test_entry_then_search() {
        let (_dir, ctx) = context(true);
        let response = call(
            &ctx,
            Method::Post,
            "/api/entry",
            Some("application/json"),
            br#"{"title": "Graph Theory Notes", "text": "spanning tree algorithms", "year": "1998"}"#,
        );
        assert_eq!(response.status, 200);
        let created = json_of(&response);
        assert_eq!(created["ok"], true);
        let id = created["id"].as_i64().unwrap();

        let found = json_of(&call(&ctx, Method::Get, "/api/search?q=spanning", None, b""));
        let results = found["results"].as_array().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0]["id"], id);
        assert_eq!(results[0]["title"], "Graph Theory Notes");
        assert_eq!(results[0]["type"], "paper");
        assert_eq!(results[0]["year"], "1998");
        assert!(results[0].get("text").is_none());

        let phrase = json_of(&call(&ctx, Method::Get, "/api/search?q=graph+theory", None, b""));
        assert_eq!(phrase["results"].as_array().unwrap().len(), 1);

        let none = json_of(&call(&ctx, Method::Get, "/api/search?q=nonexistent", None, b""));
        assert!(none["results"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_search_without_query() {
        let (_dir, ctx) = context(true);
        for url in ["/api/search", "/api/search?q=", "/api/search?q=%20%20"] {
            let response = call(&ctx, Method::Get, url, None, b"");
            assert_eq!(response.status, 200);
            assert_eq!(json_of(&response), serde_json::json!({ "results": [] }));
        }
    }

    #[test]
    fn test_search_fallback_mode_over_http() {
        let (_dir, ctx) = context(false);
        call(&ctx, Method::Post, "/api/entry", None, br#"{"abstract": "spectral methods"}"#);
        let found = json_of(&call(&ctx, Method::Get, "/api/search?q=spectral%20meth", None, b""));
        assert_eq!(found["results"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_entry_empty_body_and_bad_json() {
        let (_dir, ctx) = context(true);
        let ok = call(&ctx, Method::Post, "/api/entry", None, b"");
        assert_eq!(ok.status, 200);
        let id = json_of(&ok)["id"].as_i64().unwrap();
        let record = json_of(&call(&ctx, Method::Get, &format!("/api/entries/{id}"), None, b""));
        assert_eq!(record["type"], "paper");
        assert_eq!(record["filename"], "");

        let bad = call(&ctx, Method::Post, "/api/entry", None, b"{not json");
        assert_eq!(bad.status, 400);
        assert!(json_of(&bad)["error"].as_str().unwrap().contains("invalid JSON"));
    }

    #[test]
    fn test_upload_and_fetch() {
        let (_dir, ctx) = context(true);
        let body = multipart_body("b0undary", "beam notes.txt", b"gaussian beam shaping");
        let response = call(
            &ctx,
            Method::Post,
            "/api/upload",
            Some("multipart/form-data; boundary=b0undary"),
            &body,
        );
        assert_eq!(response.status, 200);
        let json = json_of(&response);
        assert_eq!(json["ok"], true);
        assert_eq!(json["filename"], "beam_notes.txt");
        let id = json["id"].as_i64().unwrap();

        let file = call(&ctx, Method::Get, "/uploads/beam_notes.txt", None, b"");
        assert_eq!(file.status, 200);
        assert_eq!(file.body, b"gaussian beam shaping");
        assert_eq!(file.content_type, "text/plain; charset=utf-8");

        let record = json_of(&call(&ctx, Method::Get, &format!("/api/entries/{id}"), None, b""));
        assert_eq!(record["text"], "gaussian beam shaping");
        assert_eq!(record["type"], "file");

        let found = json_of(&call(&ctx, Method::Get, "/api/search?q=gaussian", None, b""));
        assert_eq!(found["results"][0]["filename"], "beam_notes.txt");
    }

    #[test]
    fn test_upload_missing_file() {
        let (_dir, ctx) = context(true);
        let plain = call(&ctx, Method::Post, "/api/upload", Some("application/json"), b"{}");
        assert_eq!(plain.status, 400);
        assert_eq!(json_of(&plain)["error"], "missing file");

        let empty_name = multipart_body("xx", "", b"");
        let response = call(
            &ctx,
            Method::Post,
            "/api/upload",
            Some("multipart/form-data; boundary=xx"),
            &empty_name,
        );
        assert_eq!(response.status, 400);
        assert_eq!(json_of(&response)["error"], "missing file");
    }

    #[test]
    fn test_uploads_not_found_and_traversal() {
        let (_dir, ctx) = context(true);
        assert_eq!(call(&ctx, Method::Get, "/uploads/absent.pdf", None, b"").status, 404);
        assert_eq!(call(&ctx, Method::Get, "/uploads/..%2Fresearch.db", None, b"").status, 404);
        assert_eq!(call(&ctx, Method::Get, "/uploads/", None, b"").status, 404);
    }

    #[test]
    fn test_entries_not_found() {
        let (_dir, ctx) = context(true);
        assert_eq!(call(&ctx, Method::Get, "/api/entries/99", None, b"").status, 404);
        assert_eq!(call(&ctx, Method::Get, "/api/entries/abc", None, b"").status, 404);
    }

    #[test]
    fn test_ai_validation() {
        let (_dir, ctx) = context(true);
        let empty = call(&ctx, Method::Post, "/api/ai", None, br#"{"prompt": ""}"#);
        assert_eq!(empty.status, 400);
        assert_eq!(json_of(&empty)["error"], "missing prompt");

        let no_key = call(&ctx, Method::Post, "/api/ai", None, br#"{"prompt": "keywords?"}"#);
        assert_eq!(no_key.status, 500);
        assert_eq!(json_of(&no_key)["error"], "OPENAI_API_KEY not set on server");
    }

    #[test]
    fn test_method_and_route_errors() {
        let (_dir, ctx) = context(true);
        assert_eq!(call(&ctx, Method::Post, "/api/search", None, b"").status, 405);
        assert_eq!(call(&ctx, Method::Get, "/api/upload", None, b"").status, 405);
        assert_eq!(call(&ctx, Method::Get, "/api/unknown", None, b"").status, 404);
        assert_eq!(call(&ctx, Method::Delete, "/index.html", None, b"").status, 405);
    }

    #[test]
    fn test_static_files() {
        let (dir, ctx) = context(true);
        let static_dir = &ctx.catalog.config.static_dir;
        std::fs::create_dir_all(static_dir.join("js")).unwrap();
        std::fs::write(static_dir.join("index.html"), b"<h1>catalog</h1>").unwrap();
        std::fs::write(static_dir.join("js").join("research.js"), b"// client").unwrap();
        std::fs::write(dir.path().join("secret.txt"), b"nope").unwrap();

        let index = call(&ctx, Method::Get, "/", None, b"");
        assert_eq!(index.status, 200);
        assert_eq!(index.body, b"<h1>catalog</h1>");
        assert_eq!(index.content_type, "text/html; charset=utf-8");

        let script = call(&ctx, Method::Get, "/js/research.js", None, b"");
        assert_eq!(script.status, 200);
        assert!(script.content_type.contains("javascript"));
        assert!(script.content_type.ends_with("charset=utf-8"));

        assert_eq!(call(&ctx, Method::Get, "/../secret.txt", None, b"").status, 404);
        assert_eq!(call(&ctx, Method::Get, "/%2E%2E/secret.txt", None, b"").status, 404);
        assert_eq!(call(&ctx, Method::Get, "/missing.css", None, b"").status, 404);
        assert_eq!(call(&ctx, Method::Get, "/js", None, b"").status, 404);
    }

    #[test]
    fn test_static_root_never_serves_catalog_state() {
        let (dir, mut catalog) = temp_catalog(true);
        catalog.config.static_dir = dir.path().to_path_buf();
        let ctx = ServerContext::new(catalog);
        std::fs::write(dir.path().join("index.html"), b"client").unwrap();
        std::fs::write(
            dir.path().join(DEFAULT_CONFIG_FILE),
            br#"{"ai": {"api_key": "sk-secret"}}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join(".env"), b"OPENAI_API_KEY=sk-secret").unwrap();
        std::fs::write(dir.path().join("half.upload.tmp"), b"partial").unwrap();
        assert!(ctx.catalog.config.db_path.exists());

        assert_eq!(call(&ctx, Method::Get, "/", None, b"").status, 200);
        for url in [
            "/research.db",
            "/research-catalog.json",
            "/.env",
            "/half.upload.tmp",
        ] {
            let response = call(&ctx, Method::Get, url, None, b"");
            assert_eq!(response.status, 404, "{url}");
            assert!(!String::from_utf8_lossy(&response.body).contains("sk-secret"));
        }
    }

    #[test]
    fn test_content_types() {
        assert_eq!(content_type_for("notes.txt"), "text/plain; charset=utf-8");
        assert_eq!(content_type_for("paper.pdf"), "application/pdf");
        assert_eq!(content_type_for("figure.png"), "image/png");
        assert_eq!(content_type_for("data.json"), "application/json");
        assert_eq!(content_type_for("blob"), "application/octet-stream");
    }
}
