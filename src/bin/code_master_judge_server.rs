//! Minimal HTTP judge service.
//!
//! - `GET  /health`
//! - `POST /api/judge/check` → `CheckOutcome`
//! - `POST /api/judge/run`   → `Execution`
//! - `POST /api/judge/sync`  → `Verdict` for a catalog question
//!
//! `/judge/...` is accepted as an alias of `/api/judge/...`. Failures of the
//! server's own environment answer with a non-2xx status and an `ErrorBody`.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use code_master::config::AppConfig;
use code_master::data::Catalog;
use code_master::error::EvaluationInfrastructureError;
use code_master::judge::wire::{CheckRequest, ErrorBody, RunRequest, SyncRequest};
use code_master::judge::{Judge, RunLimits};
use code_master::model::Submission;
use log::{error, info, warn};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing_subscriber::EnvFilter;

const MAX_HEAD_BYTES: usize = 16 * 1024;
const MAX_BODY_BYTES: usize = 1_000_000;

struct HttpRequest {
    method: String,
    path: String,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

struct Server {
    catalog: Catalog,
    judge: Judge,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("LOG_LEVEL").unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    match std::env::var("LOG_FORMAT").as_deref() {
        Ok("json") => builder.json().init(),
        _ => builder.init(),
    }
}

fn main() {
    init_tracing();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!("{err}");
            std::process::exit(1);
        }
    };

    let catalog = match &config.catalog_path {
        Some(path) => Catalog::from_path(path),
        None => Catalog::embedded(),
    };
    let catalog = match catalog {
        Ok(catalog) => catalog,
        Err(err) => {
            error!("could not load the question catalog: {err}");
            std::process::exit(1);
        }
    };

    // The server always runs submissions locally.
    let mut judge_config = config.judge.clone();
    judge_config.remote_endpoint = None;
    let server = Arc::new(Server {
        catalog,
        judge: Judge::from_config(judge_config),
    });

    let listener = match TcpListener::bind(&config.bind) {
        Ok(listener) => listener,
        Err(err) => {
            error!("could not bind {}: {err}", config.bind);
            std::process::exit(1);
        }
    };
    info!("code_master judge server listening on http://{}", config.bind);

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let server = server.clone();
                thread::spawn(move || {
                    if let Err(err) = handle_connection(&server, stream) {
                        warn!("judge connection error: {err}");
                    }
                });
            }
            Err(err) => warn!("error accepting connection: {err}"),
        }
    }
}

fn handle_connection(server: &Server, mut stream: TcpStream) -> Result<(), String> {
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .map_err(|e| e.to_string())?;

    let parsed = read_http_request(&mut BufReader::new(&stream));
    let request = match parsed {
        Ok(req) => req,
        Err(err) => {
            write_error(&mut stream, 400, format!("bad request: {err}"), false);
            return Ok(());
        }
    };

    if request.method == "OPTIONS" {
        write_http_response(&mut stream, 204, "text/plain", "");
        return Ok(());
    }

    if request.method == "GET" && request.path == "/health" {
        write_http_response(&mut stream, 200, "text/plain; charset=utf-8", "ok");
        return Ok(());
    }

    let operation = request
        .path
        .strip_prefix("/api/judge")
        .or_else(|| request.path.strip_prefix("/judge"));

    match (request.method.as_str(), operation) {
        ("POST", Some("/check")) => handle_check(server, &mut stream, &request),
        ("POST", Some("/run")) => handle_run(server, &mut stream, &request),
        ("POST", Some("/sync")) => handle_sync(server, &mut stream, &request),
        _ => write_http_response(&mut stream, 404, "text/plain; charset=utf-8", "not found"),
    }
    Ok(())
}

fn handle_check(server: &Server, stream: &mut TcpStream, request: &HttpRequest) {
    let Some(payload) = parse_json::<CheckRequest>(stream, request) else {
        return;
    };
    match server.judge.check_source(payload.language, &payload.source) {
        Ok(outcome) => write_json_response(stream, 200, &outcome),
        Err(err) => write_infrastructure_error(stream, err),
    }
}

fn handle_run(server: &Server, stream: &mut TcpStream, request: &HttpRequest) {
    let Some(payload) = parse_json::<RunRequest>(stream, request) else {
        return;
    };
    let config = server.judge.config();
    let limits = RunLimits {
        timeout: Duration::from_millis(payload.timeout_ms.min(config.submission_budget_ms)),
        max_output_bytes: payload.max_output_bytes.min(config.max_output_bytes),
    };
    match server
        .judge
        .run_test(payload.language, &payload.source, &payload.test, &limits)
    {
        Ok(execution) => write_json_response(stream, 200, &execution),
        Err(err) => write_infrastructure_error(stream, err),
    }
}

fn handle_sync(server: &Server, stream: &mut TcpStream, request: &HttpRequest) {
    let Some(payload) = parse_json::<SyncRequest>(stream, request) else {
        return;
    };
    let Some(question) = server.catalog.get_question(payload.question_id) else {
        write_error(stream, 404, format!("unknown question {}", payload.question_id), false);
        return;
    };
    let submission = Submission::new(question, payload.source);
    match server.judge.evaluate(&submission, question) {
        Ok(verdict) => write_json_response(stream, 200, &verdict),
        Err(err) => write_infrastructure_error(stream, err),
    }
}

/// Writes the error response itself when the body is not usable JSON.
fn parse_json<T: DeserializeOwned>(stream: &mut TcpStream, request: &HttpRequest) -> Option<T> {
    let Some(content_type) = request.header("content-type") else {
        write_error(stream, 400, "missing Content-Type header".into(), false);
        return None;
    };

    if !content_type
        .to_ascii_lowercase()
        .contains("application/json")
    {
        write_error(stream, 415, "only Content-Type: application/json is accepted".into(), false);
        return None;
    }

    match serde_json::from_slice(&request.body) {
        Ok(v) => Some(v),
        Err(err) => {
            write_error(stream, 400, format!("invalid JSON: {err}"), false);
            None
        }
    }
}

/// Request line, headers up to the blank line, then exactly `Content-Length`
/// body bytes.
fn read_http_request(reader: &mut impl BufRead) -> Result<HttpRequest, String> {
    let request_line = read_head_line(reader)?;
    let (method, path) = match request_line.split_whitespace().collect::<Vec<_>>()[..] {
        [method, path, ..] => (method.to_string(), path.to_string()),
        _ => return Err(format!("malformed request line {request_line:?}")),
    };

    let mut headers = HashMap::new();
    let mut head_bytes = request_line.len();
    loop {
        let line = read_head_line(reader)?;
        if line.is_empty() {
            break;
        }
        head_bytes += line.len();
        if head_bytes > MAX_HEAD_BYTES {
            return Err("headers too large".into());
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| format!("malformed header {line:?}"))?;
        headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
    }

    let length = match headers.get("content-length") {
        Some(value) => value
            .parse::<usize>()
            .map_err(|_| format!("invalid Content-Length {value:?}"))?,
        None => 0,
    };
    if length > MAX_BODY_BYTES {
        return Err("body too large".into());
    }
    let mut body = vec![0; length];
    reader
        .read_exact(&mut body)
        .map_err(|e| format!("incomplete body: {e}"))?;

    Ok(HttpRequest {
        method,
        path,
        headers,
        body,
    })
}

fn read_head_line(reader: &mut impl BufRead) -> Result<String, String> {
    let mut line = String::new();
    let read = reader
        .by_ref()
        .take(MAX_HEAD_BYTES as u64)
        .read_line(&mut line)
        .map_err(|e| format!("could not read request: {e}"))?;
    if read == 0 {
        return Err("connection closed mid-request".into());
    }
    if !line.ends_with('\n') {
        return Err("header line too long".into());
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

impl HttpRequest {
    fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .get(&key.to_ascii_lowercase())
            .map(|s| s.as_str())
    }
}

fn write_infrastructure_error(stream: &mut TcpStream, err: EvaluationInfrastructureError) {
    error!("judge infrastructure error: {err}");
    let retryable = err.is_retryable();
    let status = if retryable { 503 } else { 422 };
    write_error(stream, status, err.to_string(), retryable);
}

fn write_error(stream: &mut TcpStream, status: u16, error: String, retryable: bool) {
    write_json_response(stream, status, &ErrorBody { error, retryable });
}

fn write_json_response<T: Serialize>(stream: &mut TcpStream, status: u16, body: &T) {
    match serde_json::to_string(body) {
        Ok(json) => write_http_response(stream, status, "application/json", &json),
        Err(err) => write_http_response(
            stream,
            500,
            "text/plain; charset=utf-8",
            &format!("could not serialize JSON response: {err}"),
        ),
    }
}

fn write_http_response(stream: &mut TcpStream, status: u16, content_type: &str, body: &str) {
    let status_text = match status {
        200 => "OK",
        204 => "No Content",
        400 => "Bad Request",
        404 => "Not Found",
        415 => "Unsupported Media Type",
        422 => "Unprocessable Entity",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "OK",
    };

    let response = format!(
        "HTTP/1.1 {status} {status_text}\r\nContent-Type: {content_type}\r\nAccess-Control-Allow-Origin: *\r\nAccess-Control-Allow-Methods: POST, GET, OPTIONS\r\nAccess-Control-Allow-Headers: Content-Type\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );

    let _ = stream.write_all(response.as_bytes());
    let _ = stream.flush();
}
