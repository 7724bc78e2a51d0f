use super::wire::{CheckRequest, RunRequest};
use super::{CancelToken, CheckOutcome, Execution, RunLimits, Runner};
use crate::error::EvaluationInfrastructureError;
use crate::model::{Language, TestCase};
use log::{debug, warn};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

/// Margin on top of the test timeout for the HTTP round trip.
const TRANSPORT_SLACK_MS: u64 = 5_000;
const CHECK_TIMEOUT_MS: u64 = 15_000;

const KNOWN_BASES: [&str; 2] = ["/api/judge", "/judge"];
const OPERATIONS: [&str; 3] = ["/check", "/run", "/sync"];

/// Delegates execution of one language to a judge server.
pub struct RemoteRunner {
    endpoint: String,
    language: Language,
    client: reqwest::blocking::Client,
    resolved: OnceLock<String>,
}

impl RemoteRunner {
    pub fn new(endpoint: &str, language: Language) -> Self {
        Self {
            endpoint: endpoint.trim().to_string(),
            language,
            client: reqwest::blocking::Client::new(),
            resolved: OnceLock::new(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn post<B, R>(&self, operation: &str, body: &B, timeout: Duration) -> Result<R, EvaluationInfrastructureError>
    where
        B: Serialize,
        R: DeserializeOwned,
    {
        let bases = match self.resolved.get() {
            Some(base) => vec![base.clone()],
            None => endpoint_candidates(&self.endpoint),
        };
        let mut last_http_error = None;

        for base in bases {
            let url = format!("{base}{operation}");
            let response = self
                .client
                .post(&url)
                .json(body)
                .timeout(timeout)
                .send()
                .map_err(|err| EvaluationInfrastructureError::Remote(format!("could not reach judge at {url}: {err}")))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().unwrap_or_default();
                let message = format!(
                    "judge returned HTTP {status} at {url}{}",
                    if body.trim().is_empty() {
                        String::new()
                    } else {
                        format!(": {}", body.trim())
                    }
                );
                // Another path may be the right one.
                if matches!(status.as_u16(), 404 | 405) {
                    debug!("{message}");
                    last_http_error = Some(message);
                    continue;
                }
                warn!("{message}");
                return Err(EvaluationInfrastructureError::Remote(message));
            }

            let _ = self.resolved.set(base);
            return response
                .json::<R>()
                .map_err(|err| EvaluationInfrastructureError::Remote(format!("invalid JSON from judge at {url}: {err}")));
        }

        Err(EvaluationInfrastructureError::Remote(
            last_http_error.unwrap_or_else(|| format!("no judge route answered at {}", self.endpoint)),
        ))
    }
}

impl Runner for RemoteRunner {
    fn language(&self) -> Language {
        self.language
    }

    fn check(&self, _sandbox: &Path, source: &str) -> Result<CheckOutcome, EvaluationInfrastructureError> {
        let request = CheckRequest {
            language: self.language,
            source: source.to_string(),
        };
        self.post("/check", &request, Duration::from_millis(CHECK_TIMEOUT_MS))
    }

    // The HTTP call cannot be interrupted; cancellation is honoured around it.
    fn run(
        &self,
        _sandbox: &Path,
        source: &str,
        test: &TestCase,
        limits: &RunLimits,
        cancel: &CancelToken,
    ) -> Result<Execution, EvaluationInfrastructureError> {
        if cancel.is_cancelled() {
            return Ok(Execution::Cancelled);
        }
        let request = RunRequest {
            language: self.language,
            source: source.to_string(),
            test: test.clone(),
            timeout_ms: limits.timeout.as_millis() as u64,
            max_output_bytes: limits.max_output_bytes,
        };
        let timeout = limits.timeout + Duration::from_millis(TRANSPORT_SLACK_MS);
        let execution = self.post("/run", &request, timeout)?;
        if cancel.is_cancelled() {
            return Ok(Execution::Cancelled);
        }
        Ok(execution)
    }
}

/// Base URLs to try, in order, for a configured endpoint. Accepts a bare
/// origin, a judge base (`/api/judge`, `/judge`) or a full operation URL.
fn endpoint_candidates(primary: &str) -> Vec<String> {
    fn push_unique(candidates: &mut Vec<String>, value: String) {
        if !value.trim().is_empty() && !candidates.iter().any(|c| c == &value) {
            candidates.push(value);
        }
    }

    fn trim_trailing_slashes(value: &str) -> String {
        value.trim().trim_end_matches('/').to_string()
    }

    fn split_origin(value: &str) -> Option<(&str, &str)> {
        let scheme = value.find("://")?;
        let path_start = value[scheme + 3..].find('/').map(|i| i + scheme + 3);
        match path_start {
            Some(i) => Some((&value[..i], &value[i..])),
            None => Some((value, "")),
        }
    }

    let mut primary = trim_trailing_slashes(primary);
    for operation in OPERATIONS {
        if let Some(base) = primary.strip_suffix(operation) {
            if KNOWN_BASES.iter().any(|known| base.ends_with(known)) {
                primary = base.to_string();
                break;
            }
        }
    }

    let mut candidates = Vec::new();
    let origin = match split_origin(&primary) {
        Some((origin, path)) if path.is_empty() || KNOWN_BASES.contains(&path) => origin.to_string(),
        Some(_) => {
            push_unique(&mut candidates, primary.clone());
            return candidates;
        }
        None if primary.is_empty() || KNOWN_BASES.contains(&primary.as_str()) => String::new(),
        None => {
            push_unique(&mut candidates, primary.clone());
            return candidates;
        }
    };

    if primary != origin {
        push_unique(&mut candidates, primary.clone());
    }
    for base in KNOWN_BASES {
        push_unique(&mut candidates, format!("{origin}{base}"));
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::endpoint_candidates;

    #[test]
    fn endpoint_candidates_include_common_paths_for_origin() {
        let candidates = endpoint_candidates("http://127.0.0.1:8787");
        assert_eq!(
            candidates,
            vec!["http://127.0.0.1:8787/api/judge", "http://127.0.0.1:8787/judge"]
        );
    }

    #[test]
    fn endpoint_candidates_strip_operation_and_trailing_slash() {
        let candidates = endpoint_candidates("http://judge.local/judge/run/");
        assert_eq!(candidates[0], "http://judge.local/judge");
        assert!(candidates.iter().any(|c| c == "http://judge.local/api/judge"));
    }

    #[test]
    fn endpoint_candidates_keep_custom_paths() {
        assert_eq!(
            endpoint_candidates("https://example.org/custom/base"),
            vec!["https://example.org/custom/base"]
        );
        assert_eq!(endpoint_candidates("/api/judge/sync"), vec!["/api/judge", "/judge"]);
    }
}
