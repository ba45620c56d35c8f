//! JSON HTTP API over a plain tokio listener.
//!
//! One request per connection. Each analysis is handed to the blocking pool
//! as a single unit of work, bounded by a semaphore sized to the CPU count.
//!
//! Routes:
//!   GET  /api/health
//!   POST /api/analyze?filename=NAME      raw trace bytes as the body
//!   POST /api/analyze-url                {"url": ...}
//!   POST /api/decode-sharecode           {"sharecode": ...}
//!   GET  /api/faceit/player?nickname=
//!   GET  /api/faceit/matches?player_id=
//!   POST /api/faceit/analyze             {"demo_url": ...}

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;

use crate::analysis::{analyze_path, AnalysisReport};
use crate::cache::ResultCache;
use crate::config::{AnalysisConfig, ServerConfig};
use crate::logging::{self, obj, v_int, v_str, Domain};
use crate::sources::faceit::{enrich_matches, FaceitClient, MatchHistory, DEFAULT_MATCH_LIMIT};
use crate::sources::{is_trace_name, sharecode, Downloader, TRACE_EXTENSIONS};

const MAX_HEAD_BYTES: usize = 16 * 1024;

// =============================================================================
// Request / response
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub query: HashMap<String, String>,
    /// Lowercased names.
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl Request {
    fn param(&self, key: &str) -> &str {
        self.query.get(key).map(|s| s.trim()).unwrap_or("")
    }

    /// String field of a JSON body; missing, non-string or unparsable
    /// bodies all read as empty.
    fn json_field(&self, key: &str) -> String {
        serde_json::from_slice::<Value>(&self.body)
            .ok()
            .and_then(|v| v.get(key).and_then(Value::as_str).map(|s| s.trim().to_string()))
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub body: Value,
}

impl Response {
    pub fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    pub fn error(status: u16, message: impl Into<String>) -> Self {
        Self { status, body: json!({ "error": message.into() }) }
    }

    pub fn render(&self) -> Vec<u8> {
        let body = self.body.to_string();
        format!(
            "HTTP/1.1 {} {}\r\n\
             Content-Type: application/json\r\n\
             Access-Control-Allow-Origin: *\r\n\
             Connection: close\r\n\
             Content-Length: {}\r\n\r\n{}",
            self.status,
            reason(self.status),
            body.len(),
            body
        )
        .into_bytes()
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        413 => "Payload Too Large",
        503 => "Service Unavailable",
        _ => "Internal Server Error",
    }
}

pub fn parse_query(raw: &str) -> HashMap<String, String> {
    url::form_urlencoded::parse(raw.as_bytes()).into_owned().collect()
}

fn parse_head(head: &str) -> Result<(String, String, HashMap<String, String>)> {
    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or("");
    let mut parts = request_line.split_whitespace();
    let (method, target) = match (parts.next(), parts.next(), parts.next()) {
        (Some(m), Some(t), Some(v)) if v.starts_with("HTTP/") => (m.to_string(), t.to_string()),
        _ => return Err(anyhow!("malformed request line")),
    };
    let headers = lines
        .filter_map(|l| l.split_once(':'))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect();
    Ok((method, target, headers))
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Reads one request. Errors come back as the response to send.
pub async fn read_request<R: AsyncRead + Unpin>(reader: &mut R, max_body: u64) -> Result<Request, Response> {
    let mut buf = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];
    let head_end = loop {
        if let Some(i) = find_head_end(&buf) {
            break i;
        }
        if buf.len() > MAX_HEAD_BYTES {
            return Err(Response::error(400, "request head too large"));
        }
        let n = reader
            .read(&mut chunk)
            .await
            .map_err(|e| Response::error(400, format!("read failed: {}", e)))?;
        if n == 0 {
            return Err(Response::error(400, "connection closed mid-request"));
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let (method, target, headers) = parse_head(&head).map_err(|e| Response::error(400, e.to_string()))?;

    let content_length: u64 = match headers.get("content-length") {
        Some(v) => v.parse().map_err(|_| Response::error(400, "invalid Content-Length"))?,
        None => 0,
    };
    if content_length > max_body {
        return Err(Response::error(413, format!("body exceeds {} bytes", max_body)));
    }

    let mut body = buf.split_off(head_end + 4);
    body.truncate(content_length as usize);
    let remaining = content_length as usize - body.len();
    if remaining > 0 {
        let start = body.len();
        body.resize(content_length as usize, 0);
        reader
            .read_exact(&mut body[start..])
            .await
            .map_err(|e| Response::error(400, format!("body read failed: {}", e)))?;
    }

    let (path, query) = match target.split_once('?') {
        Some((p, q)) => (p.to_string(), parse_query(q)),
        None => (target, HashMap::new()),
    };
    Ok(Request { method, path, query, headers, body })
}

// =============================================================================
// Application state and routing
// =============================================================================

pub struct AppState {
    pub config: ServerConfig,
    pub analysis: AnalysisConfig,
    pub cache: ResultCache,
    pub downloader: Downloader,
    pub history: Option<Arc<dyn MatchHistory>>,
    permits: Semaphore,
}

impl AppState {
    pub fn new(config: ServerConfig, analysis: AnalysisConfig) -> Result<Self> {
        let history: Option<Arc<dyn MatchHistory>> = match &config.faceit_api_key {
            Some(key) => Some(Arc::new(FaceitClient::new(&config.faceit_api_base, key)?)),
            None => None,
        };
        Ok(Self {
            cache: ResultCache::new(config.cache_dir.clone()),
            downloader: Downloader::new(config.download_dir.clone())?,
            history,
            permits: Semaphore::new(num_cpus::get().max(1)),
            analysis,
            config,
        })
    }

    pub fn with_history(mut self, history: Arc<dyn MatchHistory>) -> Self {
        self.history = Some(history);
        self
    }

    async fn run_analysis(&self, path: PathBuf) -> Result<AnalysisReport> {
        let _permit = self.permits.acquire().await?;
        let cfg = self.analysis.clone();
        let cache = self.cache.clone();
        let started = std::time::Instant::now();
        let report = tokio::task::spawn_blocking(move || analyze_path(&path, &cfg, Some(&cache))).await??;
        logging::info(
            Domain::Server,
            "analysis_served",
            obj(&[
                ("map", v_str(&report.map)),
                ("players", v_int(report.anticheat.len() as u64)),
                ("elapsed_ms", v_int(started.elapsed().as_millis() as u64)),
            ]),
        );
        Ok(report)
    }
}

fn report_response(result: Result<AnalysisReport>, prefix: &str) -> Response {
    match result.and_then(|r| Ok(serde_json::to_value(r)?)) {
        Ok(v) => Response::ok(v),
        Err(e) => {
            logging::error(Domain::Server, "analysis_failed", obj(&[("error", v_str(&format!("{:#}", e)))]));
            Response::error(500, format!("{}: {}", prefix, e))
        }
    }
}

/// Plain file name with a trace extension, no path components.
fn upload_name(raw: &str) -> Option<&str> {
    let name = raw.trim();
    let plain = !name.is_empty() && !name.contains(['/', '\\']) && !name.starts_with('.');
    (plain && is_trace_name(name)).then_some(name)
}

pub async fn route(state: &AppState, req: Request) -> Response {
    match (req.method.as_str(), req.path.as_str()) {
        ("GET", "/api/health") => Response::ok(json!({
            "status": "ok",
            "faceit": state.history.is_some(),
        })),
        ("POST", "/api/analyze") => analyze_upload(state, &req).await,
        ("POST", "/api/analyze-url") => {
            let url = req.json_field("url");
            if url.is_empty() {
                return Response::error(400, "No URL provided");
            }
            analyze_remote(state, &url, "Failed").await
        }
        ("POST", "/api/decode-sharecode") => {
            let code = req.json_field("sharecode");
            if code.is_empty() {
                return Response::error(400, "No share code provided");
            }
            match sharecode::decode(&code) {
                Ok(c) => Response::ok(json!(c.info())),
                Err(e) => Response::error(400, format!("Invalid share code: {}", e)),
            }
        }
        ("GET", "/api/faceit/player") => {
            let Some(api) = &state.history else {
                return Response::error(503, "Faceit API key not configured");
            };
            let nickname = req.param("nickname");
            if nickname.is_empty() {
                return Response::error(400, "Nickname required");
            }
            match api.player(nickname).await {
                Ok(p) => Response::ok(json!(p)),
                Err(e) => Response::error(500, format!("Faceit lookup failed: {}", e)),
            }
        }
        ("GET", "/api/faceit/matches") => {
            let Some(api) = &state.history else {
                return Response::error(503, "Faceit API key not configured");
            };
            let player_id = req.param("player_id");
            if player_id.is_empty() {
                return Response::error(400, "player_id required");
            }
            match api.matches(player_id, DEFAULT_MATCH_LIMIT).await {
                Ok(list) => {
                    let enriched = enrich_matches(api.as_ref(), list).await;
                    Response::ok(json!({ "matches": enriched }))
                }
                Err(e) => Response::error(500, format!("Faceit matches failed: {}", e)),
            }
        }
        ("POST", "/api/faceit/analyze") => {
            let url = req.json_field("demo_url");
            if url.is_empty() {
                return Response::error(400, "demo_url required");
            }
            analyze_remote(state, &url, "Analysis failed").await
        }
        (_, path) if path.starts_with("/api/") => Response::error(405, "method not allowed"),
        _ => Response::error(404, "not found"),
    }
}

async fn analyze_upload(state: &AppState, req: &Request) -> Response {
    let raw = match req.query.get("filename") {
        Some(n) => n.as_str(),
        None => req.headers.get("x-filename").map(String::as_str).unwrap_or(""),
    };
    if req.body.is_empty() {
        return Response::error(400, "No file provided");
    }
    let Some(name) = upload_name(raw) else {
        return Response::error(400, format!("File must be one of {}", TRACE_EXTENSIONS.join(", ")));
    };

    let dest = state.config.upload_dir.join(name);
    let stored = async {
        tokio::fs::create_dir_all(&state.config.upload_dir).await?;
        tokio::fs::write(&dest, &req.body).await
    };
    if let Err(e) = stored.await {
        return Response::error(500, format!("Upload failed: {}", e));
    }
    logging::info(
        Domain::Server,
        "upload_stored",
        obj(&[("file", v_str(name)), ("bytes", v_int(req.body.len() as u64))]),
    );
    report_response(state.run_analysis(dest).await, "Analysis failed")
}

async fn analyze_remote(state: &AppState, url: &str, prefix: &str) -> Response {
    let result = match state.downloader.fetch(url).await {
        Ok(path) => state.run_analysis(path).await,
        Err(e) => Err(e),
    };
    report_response(result, prefix)
}

// =============================================================================
// Listener
// =============================================================================

async fn handle_connection(state: Arc<AppState>, mut stream: TcpStream) -> Result<()> {
    let max_body = state.config.max_upload_bytes();
    let response = match read_request(&mut stream, max_body).await {
        Ok(req) => {
            let (method, path) = (req.method.clone(), req.path.clone());
            let resp = route(&state, req).await;
            logging::debug(
                Domain::Server,
                "request",
                obj(&[("method", v_str(&method)), ("path", v_str(&path)), ("status", v_int(resp.status as u64))]),
            );
            resp
        }
        Err(resp) => resp,
    };
    stream.write_all(&response.render()).await?;
    stream.shutdown().await?;
    Ok(())
}

pub async fn serve(state: Arc<AppState>) -> Result<()> {
    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = TcpListener::bind(&addr).await?;
    logging::info(
        Domain::Server,
        "listening",
        obj(&[("addr", v_str(&addr)), ("faceit", json!(state.history.is_some()))]),
    );

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                logging::warn(Domain::Server, "accept_failed", obj(&[("error", v_str(&e.to_string()))]));
                continue;
            }
        };
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(state, stream).await {
                logging::warn(
                    Domain::Server,
                    "connection_failed",
                    obj(&[("peer", v_str(&peer.to_string())), ("error", v_str(&e.to_string()))]),
                );
            }
        });
    }
}
