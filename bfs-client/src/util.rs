//! Small helpers: slow-operation timer, request sequence ids and path handling.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Logs a warning when dropped later than `threshold` after creation.
pub struct AutoTimer {
    op: &'static str,
    target: String,
    threshold: Duration,
    started: Instant,
}

impl AutoTimer {
    pub fn new(threshold: Duration, op: &'static str, target: impl Into<String>) -> Self {
        Self {
            op,
            target: target.into(),
            threshold,
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

impl Drop for AutoTimer {
    fn drop(&mut self) {
        let elapsed = self.started.elapsed();
        if elapsed > self.threshold {
            tracing::warn!(
                op = self.op,
                target = %self.target,
                elapsed_ms = elapsed.as_millis() as u64,
                "slow operation"
            );
        }
    }
}

/// Microseconds since the epoch; tags block writes so both ends can correlate logs.
pub fn sequence_id() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or_default()
}

/// Collapse repeated separators and make the path absolute. Empty input is the root.
pub fn norm_path(p: &str) -> String {
    let parts: Vec<&str> = p.split('/').filter(|s| !s.is_empty()).collect();
    let mut out = String::from("/");
    out.push_str(&parts.join("/"));
    out
}

/// Split a normalized path into parent directory and final component.
pub fn split_dir_file(path: &str) -> (String, String) {
    let n = path.rfind('/').unwrap_or(0);
    if n == 0 {
        ("/".into(), path[1..].into())
    } else {
        (path[..n].into(), path[n + 1..].into())
    }
}
