//! Out-of-process CSV analysis.
//!
//! The external tool is a strict boundary: dataset path and request string
//! in via argv, one JSON object out on stdout, diagnostics on stderr, exit
//! code zero on success. Nothing else about its internals is assumed, and
//! the contract is pinned by the tests in this module.

use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{info, warn};

use penny_core::domain::analysis::AnalysisResult;
use penny_core::domain::dataset::DatasetHandle;
use penny_core::routing::simplify_request;

/// Boundary interface for running the external analysis, so orchestration
/// can be exercised without spawning real processes.
#[async_trait]
pub trait AnalysisRunner: Send + Sync {
    async fn run(&self, dataset: &DatasetHandle, user_text: &str) -> AnalysisResult;
}

/// Invokes the configured executable under a hard wall-clock timeout.
/// Invocations are serialized through an internal slot: a second request
/// queues behind the one in flight instead of running concurrently.
pub struct SubprocessAnalysisDelegate {
    executable: String,
    timeout: Duration,
    stderr_truncate_bytes: usize,
    slot: tokio::sync::Mutex<()>,
}

impl SubprocessAnalysisDelegate {
    pub fn new(executable: String, timeout: Duration, stderr_truncate_bytes: usize) -> Self {
        Self { executable, timeout, stderr_truncate_bytes, slot: tokio::sync::Mutex::new(()) }
    }
}

#[async_trait]
impl AnalysisRunner for SubprocessAnalysisDelegate {
    async fn run(&self, dataset: &DatasetHandle, user_text: &str) -> AnalysisResult {
        let _slot = self.slot.lock().await;

        let request = simplify_request(user_text);
        let started = Instant::now();

        let child = Command::new(&self.executable)
            .arg("--input")
            .arg(&dataset.path)
            .arg("--prompt")
            .arg(&request)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Dropping the future (timeout or session teardown) must not
            // leak a running process.
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(error) => {
                warn!(
                    event_name = "analysis.spawn_failed",
                    executable = %self.executable,
                    error = %error,
                    "failed to spawn analysis subprocess"
                );
                return AnalysisResult::failed(
                    format!("failed to start analysis tool: {error}"),
                    None,
                    elapsed_ms(started),
                );
            }
        };

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(error)) => {
                return AnalysisResult::failed(
                    format!("failed to collect analysis output: {error}"),
                    None,
                    elapsed_ms(started),
                );
            }
            Err(_) => {
                warn!(
                    event_name = "analysis.timeout",
                    timeout_secs = self.timeout.as_secs(),
                    dataset = %dataset.name,
                    "analysis subprocess exceeded its deadline and was killed"
                );
                return AnalysisResult::timeout(elapsed_ms(started));
            }
        };

        let duration_ms = elapsed_ms(started);

        if !output.status.success() {
            let mut stderr = String::from_utf8_lossy(&output.stderr).to_string();
            truncate_on_char_boundary(&mut stderr, self.stderr_truncate_bytes);
            return AnalysisResult::failed(stderr, output.status.code(), duration_ms);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        match parse_output(&stdout) {
            Some(rendered) => {
                info!(
                    event_name = "analysis.succeeded",
                    dataset = %dataset.name,
                    duration_ms,
                    "analysis subprocess completed"
                );
                AnalysisResult::success(rendered, duration_ms)
            }
            None => AnalysisResult::failed(
                "malformed output".to_string(),
                output.status.code(),
                duration_ms,
            ),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AnalysisOutput {
    summary: String,
    #[serde(default)]
    calls: Vec<ApiCall>,
}

#[derive(Debug, Deserialize)]
struct ApiCall {
    api_call: String,
    count: u32,
}

/// Parse the subprocess's structured stdout and render it as reply-ready
/// text. Anything that is not one well-formed JSON object is rejected;
/// exit-zero garbage must never pass as a successful analysis.
fn parse_output(stdout: &str) -> Option<String> {
    let output: AnalysisOutput = serde_json::from_str(stdout.trim()).ok()?;
    if output.summary.trim().is_empty() {
        return None;
    }

    let mut rendered = output.summary.trim().to_string();
    for call in &output.calls {
        let plural = if call.count == 1 { "call" } else { "calls" };
        rendered.push_str(&format!("\n• {} — {} {plural}", call.api_call, call.count));
    }
    Some(rendered)
}

/// Cap diagnostic text at `limit` bytes without splitting a multi-byte
/// character; `String::truncate` panics mid-character.
fn truncate_on_char_boundary(text: &mut String, limit: usize) {
    if text.len() <= limit {
        return;
    }
    let mut cut = limit;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
