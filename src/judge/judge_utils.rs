use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

/// Line written by the harnesses right before the literal of the returned value.
pub const RESULT_MARKER: &str = "__CODE_MASTER_RESULT__";

pub fn normalize_newlines(value: &str) -> String {
    value.replace("\r\n", "\n")
}

/// Newline style and trailing whitespace do not count as output.
pub fn normalize_stdout(value: &str) -> String {
    let normalized = normalize_newlines(value);
    normalized
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim_end()
        .to_string()
}

pub fn stdout_matches(received: &str, expected: &str) -> bool {
    normalize_stdout(received) == normalize_stdout(expected)
}

pub fn line_diff(expected: &str, received: &str) -> String {
    let expected_norm = normalize_stdout(expected);
    let received_norm = normalize_stdout(received);
    let exp: Vec<&str> = expected_norm.split('\n').collect();
    let rec: Vec<&str> = received_norm.split('\n').collect();
    let max_lines = exp.len().max(rec.len());

    for i in 0..max_lines {
        let e = exp.get(i).copied().unwrap_or("<no line>");
        let r = rec.get(i).copied().unwrap_or("<no line>");
        if e != r {
            return format!("Line {}\n- expected: {:?}\n+ received: {:?}", i + 1, e, r);
        }
    }

    "No differing line found (possibly an invisible character).".into()
}

/// Splits harness output into the program's own stdout and the result literal.
pub fn split_result(stdout: &str) -> Option<(String, String)> {
    let stdout = normalize_newlines(stdout);
    let needle = format!("\n{RESULT_MARKER}\n");
    let pos = stdout.rfind(&needle)?;
    let program_out = stdout[..pos].to_string();
    let value = stdout[pos + needle.len()..].trim_end_matches('\n').to_string();
    Some((program_out, value))
}

/// Picks the exception line out of a Python traceback or a Node.js stack trace.
pub fn error_summary(stderr: &str, sandbox: &Path) -> String {
    let cleaned = strip_sandbox(stderr, sandbox);
    let lines: Vec<&str> = cleaned
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    lines
        .iter()
        .rev()
        .find(|line| looks_like_exception(line))
        .or_else(|| lines.last())
        .map(|line| line.to_string())
        .unwrap_or_else(|| "program exited with an error".to_string())
}

fn looks_like_exception(line: &str) -> bool {
    if line.starts_with("at ") || line.starts_with("File ") {
        return false;
    }
    let head = line.split(':').next().unwrap_or(line).trim();
    let name = head.rsplit('.').next().unwrap_or(head);
    !name.is_empty()
        && name.chars().all(|c| c.is_alphanumeric() || c == '_')
        && (name.ends_with("Error") || name.ends_with("Exception") || name == "KeyboardInterrupt")
}

/// Interpreters print absolute script paths; users only care about the file name.
pub fn strip_sandbox(text: &str, sandbox: &Path) -> String {
    let prefix = format!("{}{}", sandbox.display(), std::path::MAIN_SEPARATOR);
    text.replace(&prefix, "")
}

pub fn build_script_path(sandbox: &Path, source: &str, input: &str, ext: &str) -> PathBuf {
    let mut hasher = DefaultHasher::new();
    source.hash(&mut hasher);
    input.hash(&mut hasher);
    let key = format!("{:016x}", hasher.finish());
    sandbox.join(format!("case_{key}.{ext}"))
}

/// The harness templates hold two placeholders. The user's code goes in last
/// so nothing inside it is ever substituted.
pub fn apply_harness(harness: &str, user_code: &str, input: &str) -> String {
    harness
        .replace("{{INPUT}}", input.trim())
        .replace("{{MARKER}}", RESULT_MARKER)
        .replace("{{USER_CODE}}", user_code)
}
