//! Child-process execution with a wall-clock limit, an output cap and
//! cooperative cancellation.
//!
//! stdout and stderr are drained by reader threads so a chatty program can
//! never block on a full pipe while we are polling it. On unix every run gets
//! its own process group, killed as a whole once the direct child is done.

use super::judge_utils::{error_summary, split_result};
use super::{CancelToken, Execution, RunLimits};
use crate::error::EvaluationInfrastructureError;
use log::debug;
use std::io::{self, Read};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

const POLL_MS: u64 = 10;

#[derive(Debug)]
pub struct ProcessOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[derive(Debug)]
pub enum ProcessOutcome {
    Exited(ProcessOutput),
    TimedOut { elapsed: Duration },
    OutputLimitExceeded,
    Cancelled,
}

impl ProcessOutcome {
    /// Interprets the output of a harness run: a clean exit must end with the
    /// result marker, anything else is an error raised by the submission.
    pub fn into_execution(self, limits: &RunLimits, sandbox: &Path) -> Execution {
        match self {
            ProcessOutcome::Exited(output) if output.success() => match split_result(&output.stdout) {
                Some((stdout, value)) => Execution::Returned { value, stdout },
                None => Execution::Raised {
                    message: "program exited before returning a value".to_string(),
                    stdout: output.stdout,
                },
            },
            ProcessOutcome::Exited(output) => Execution::Raised {
                message: error_summary(&output.stderr, sandbox),
                stdout: output.stdout,
            },
            ProcessOutcome::TimedOut { .. } => Execution::TimedOut {
                limit_ms: limits.timeout.as_millis() as u64,
            },
            ProcessOutcome::OutputLimitExceeded => Execution::OutputLimitExceeded {
                limit_bytes: limits.max_output_bytes,
            },
            ProcessOutcome::Cancelled => Execution::Cancelled,
        }
    }
}

pub fn run_process(
    command: &mut Command,
    limits: &RunLimits,
    cancel: &CancelToken,
) -> Result<ProcessOutcome, EvaluationInfrastructureError> {
    let program = command.get_program().to_string_lossy().into_owned();
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    // Own process group, so background children die with the run.
    #[cfg(unix)]
    std::os::unix::process::CommandExt::process_group(command, 0);

    let mut child = command.spawn().map_err(|source| EvaluationInfrastructureError::Spawn {
        program: program.clone(),
        source,
    })?;

    let overflow = Arc::new(AtomicBool::new(false));
    let (tx, rx) = mpsc::channel();
    spawn_reader(Stream::Stdout, child.stdout.take(), limits.max_output_bytes, overflow.clone(), tx.clone());
    spawn_reader(Stream::Stderr, child.stderr.take(), limits.max_output_bytes, overflow.clone(), tx);

    let start = Instant::now();
    let deadline = start
        .checked_add(limits.timeout)
        .unwrap_or_else(|| start + Duration::from_secs(u32::MAX.into()));
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                kill_group(&child);
                let (stdout, stderr) = match collect_output(&rx, start, deadline, cancel) {
                    Ok(output) => output,
                    Err(outcome) => return Ok(outcome),
                };
                if overflow.load(Ordering::SeqCst) {
                    return Ok(ProcessOutcome::OutputLimitExceeded);
                }
                let elapsed = start.elapsed();
                debug!("{program} exited with {:?} after {} ms", status.code(), elapsed.as_millis());
                return Ok(ProcessOutcome::Exited(ProcessOutput {
                    exit_code: status.code(),
                    stdout: String::from_utf8_lossy(&stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&stderr).into_owned(),
                    elapsed,
                }));
            }
            Ok(None) => {
                if cancel.is_cancelled() {
                    kill(&mut child);
                    return Ok(ProcessOutcome::Cancelled);
                }
                if overflow.load(Ordering::SeqCst) {
                    kill(&mut child);
                    return Ok(ProcessOutcome::OutputLimitExceeded);
                }
                let elapsed = start.elapsed();
                if elapsed > limits.timeout {
                    kill(&mut child);
                    return Ok(ProcessOutcome::TimedOut { elapsed });
                }
                thread::sleep(Duration::from_millis(POLL_MS));
            }
            Err(err) => {
                kill(&mut child);
                return Err(EvaluationInfrastructureError::Process(err));
            }
        }
    }
}

/// Waits for both readers, bounded by the run's deadline. A process that
/// escaped the group can keep the pipes open; that counts as a timeout.
fn collect_output(
    rx: &Receiver<(Stream, Vec<u8>)>,
    start: Instant,
    deadline: Instant,
    cancel: &CancelToken,
) -> Result<(Vec<u8>, Vec<u8>), ProcessOutcome> {
    let (mut stdout, mut stderr) = (None, None);
    while stdout.is_none() || stderr.is_none() {
        if cancel.is_cancelled() {
            return Err(ProcessOutcome::Cancelled);
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(ProcessOutcome::TimedOut {
                elapsed: now.duration_since(start),
            });
        }
        let wait = (deadline - now).min(Duration::from_millis(POLL_MS));
        match rx.recv_timeout(wait) {
            Ok((Stream::Stdout, buf)) => stdout = Some(buf),
            Ok((Stream::Stderr, buf)) => stderr = Some(buf),
            Err(RecvTimeoutError::Timeout) => {}
            // A reader panicked; keep what arrived.
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    Ok((stdout.unwrap_or_default(), stderr.unwrap_or_default()))
}

fn kill(child: &mut Child) {
    kill_group(child);
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(unix)]
fn kill_group(child: &Child) {
    let Ok(pgid) = libc::pid_t::try_from(child.id()) else {
        return;
    };
    // Safety: kill(2) with a negative pid only signals that process group.
    unsafe {
        libc::kill(-pgid, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_group(_child: &Child) {}

#[derive(Clone, Copy, Debug)]
enum Stream {
    Stdout,
    Stderr,
}

fn spawn_reader<R>(stream: Stream, pipe: Option<R>, cap: usize, overflow: Arc<AtomicBool>, tx: Sender<(Stream, Vec<u8>)>)
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(pipe) = pipe {
            let mut limited = pipe.take(cap as u64 + 1);
            let _ = limited.read_to_end(&mut buf);
            if buf.len() > cap {
                overflow.store(true, Ordering::SeqCst);
                buf.truncate(cap);
                let _ = io::copy(&mut limited.into_inner(), &mut io::sink());
            }
        }
        let _ = tx.send((stream, buf));
    });
}
