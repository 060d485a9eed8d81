//! Submit-then-poll protocol shared by every long-running platform operation.
//!
//! Platform jobs and workflows report a `status` string and a `progress`
//! value. A job is finished once its status is terminal:
//!
//! | Status | Terminal | In progress |
//! |--------|----------|-------------|
//! | `QUEUED`, `PENDING`, `RUNNING` | | yes |
//! | `CANCEL_REQUESTED`, `CANCELLING` | | yes |
//! | `FINISHED`, `FAILED`, `CANCELLED` | yes | |
//!
//! Statuses outside this table are kept verbatim and count as neither, so a
//! single poll keeps waiting on them while a batch poll treats them as settled.
//!
//! Elapsed time is measured from the first poll. The timeout is checked only
//! after a non-terminal poll, before sleeping for the interval.

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tracing::{error, info};

use crate::error::{IrpError, Result, ValidationError};

/// Status reported by platform jobs and workflows.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Queued,
    Pending,
    Running,
    CancelRequested,
    Cancelling,
    Finished,
    Failed,
    Cancelled,
    Other(String),
}

impl JobStatus {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "QUEUED" => Self::Queued,
            "PENDING" => Self::Pending,
            "RUNNING" => Self::Running,
            "CANCEL_REQUESTED" => Self::CancelRequested,
            "CANCELLING" => Self::Cancelling,
            "FINISHED" => Self::Finished,
            "FAILED" => Self::Failed,
            "CANCELLED" => Self::Cancelled,
            other => Self::Other(other.to_owned()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Queued => "QUEUED",
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::CancelRequested => "CANCEL_REQUESTED",
            Self::Cancelling => "CANCELLING",
            Self::Finished => "FINISHED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
            Self::Other(raw) => raw,
        }
    }

    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed | Self::Cancelled)
    }

    pub const fn is_in_progress(&self) -> bool {
        matches!(
            self,
            Self::Queued | Self::Pending | Self::Running | Self::CancelRequested | Self::Cancelling
        )
    }

    /// Status of a job body; a missing or non-string field reads as empty.
    pub fn of(body: &Value) -> Self {
        Self::parse(body.get("status").and_then(Value::as_str).unwrap_or_default())
    }
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Interval and deadline for a polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self::single()
    }
}

impl PollConfig {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600_000);

    pub fn new(interval: Duration, timeout: Duration) -> std::result::Result<Self, ValidationError> {
        if interval.is_zero() {
            return Err(ValidationError::NonPositive { field: "interval" });
        }
        if timeout.is_zero() {
            return Err(ValidationError::NonPositive { field: "timeout" });
        }
        Ok(Self { interval, timeout })
    }

    /// Defaults for polling one job: every 10 s.
    pub const fn single() -> Self {
        Self {
            interval: Duration::from_secs(10),
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    /// Defaults for polling a batch of jobs: every 20 s.
    pub const fn batch() -> Self {
        Self {
            interval: Duration::from_secs(20),
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        Self::new(self.interval, self.timeout).map(|_| ())
    }
}

/// How strictly a poll response must carry `status` and `progress`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFields {
    /// Both fields must be present; their absence is an API error.
    Required,
    /// `status` must be present; `progress` may be missing.
    StatusOnly,
    /// Missing fields read as empty.
    Lenient,
}

fn read_status(body: &Value, fields: StatusFields, label: &str) -> Result<(JobStatus, String)> {
    let status = body.get("status");
    let progress = body.get("progress");
    match fields {
        StatusFields::Required if status.is_none() || progress.is_none() => {
            return Err(IrpError::api(format!(
                "Missing 'status' or 'progress' in job response for {label}"
            )));
        }
        StatusFields::StatusOnly if status.is_none() => {
            return Err(IrpError::api(format!(
                "Missing 'status' in job response for {label}"
            )));
        }
        _ => {}
    }
    let status = JobStatus::parse(status.and_then(Value::as_str).unwrap_or_default());
    let progress = match progress {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };
    Ok((status, progress))
}

/// Repeatedly call `fetch` until the returned body carries a terminal status.
///
/// `on_timeout` receives the last status seen and builds the error returned
/// once `config.timeout` has elapsed.
pub async fn poll_until_terminal<F, Fut>(
    label: &str,
    config: &PollConfig,
    fields: StatusFields,
    mut fetch: F,
    on_timeout: impl FnOnce(JobStatus) -> IrpError,
) -> Result<Value>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Value>>,
{
    config.validate()?;
    let start = Instant::now();
    loop {
        info!(job = label, "polling");
        let body = fetch().await?;
        let (status, progress) = read_status(&body, fields, label)?;
        info!(job = label, %status, %progress, "poll status");

        if status.is_terminal() {
            return Ok(body);
        }
        if start.elapsed() > config.timeout {
            error!(job = label, timeout_secs = config.timeout.as_secs(), %status, "poll timed out");
            return Err(on_timeout(status));
        }
        tokio::time::sleep(config.interval).await;
    }
}

/// A fetched batch of jobs.
pub trait BatchSnapshot {
    fn jobs(&self) -> &[Value];

    fn in_progress(&self) -> usize {
        self.jobs()
            .iter()
            .filter(|job| JobStatus::of(job).is_in_progress())
            .count()
    }
}

impl BatchSnapshot for Vec<Value> {
    fn jobs(&self) -> &[Value] {
        self
    }
}

/// Repeatedly call `fetch_all` until no job in the batch is in progress.
pub async fn poll_batch_until_settled<T, F, Fut>(
    label: &str,
    config: &PollConfig,
    mut fetch_all: F,
    on_timeout: impl FnOnce(usize) -> IrpError,
) -> Result<T>
where
    T: BatchSnapshot,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    config.validate()?;
    let start = Instant::now();
    loop {
        info!(batch = label, "polling batch");
        let snapshot = fetch_all().await?;
        let pending = snapshot.in_progress();
        info!(
            batch = label,
            total = snapshot.jobs().len(),
            in_progress = pending,
            "batch status"
        );

        if pending == 0 {
            return Ok(snapshot);
        }
        if start.elapsed() > config.timeout {
            error!(batch = label, timeout_secs = config.timeout.as_secs(), "batch poll timed out");
            return Err(on_timeout(pending));
        }
        tokio::time::sleep(config.interval).await;
    }
}

/// `jobId IN ("1", "2")` filter used by job search endpoints.
pub fn job_id_filter(ids: &[i64]) -> String {
    let quoted: Vec<String> = ids
        .iter()
        .map(|id| Value::String(id.to_string()).to_string())
        .collect();
    format!("jobId IN ({})", quoted.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[test]
    fn statuses_classify_into_terminal_and_in_progress() {
        for raw in ["FINISHED", "FAILED", "CANCELLED"] {
            assert!(JobStatus::parse(raw).is_terminal(), "{raw}");
        }
        for raw in ["QUEUED", "PENDING", "RUNNING", "CANCEL_REQUESTED", "CANCELLING"] {
            let status = JobStatus::parse(raw);
            assert!(status.is_in_progress(), "{raw}");
            assert!(!status.is_terminal(), "{raw}");
        }
        let unknown = JobStatus::parse("ARCHIVED");
        assert!(!unknown.is_terminal() && !unknown.is_in_progress());
        assert_eq!(unknown.as_str(), "ARCHIVED");
    }

    #[test]
    fn poll_config_rejects_zero_values() {
        assert!(PollConfig::new(Duration::ZERO, Duration::from_secs(1)).is_err());
        assert!(PollConfig::new(Duration::from_secs(1), Duration::ZERO).is_err());
    }

    #[test]
    fn job_id_filter_quotes_each_id() {
        assert_eq!(job_id_filter(&[1, 22]), r#"jobId IN ("1", "22")"#);
    }

    fn scripted(bodies: Vec<Value>) -> Mutex<VecDeque<Value>> {
        Mutex::new(bodies.into_iter().collect())
    }

    #[tokio::test(start_paused = true)]
    async fn single_poll_returns_first_terminal_body() {
        let bodies = scripted(vec![
            json!({"status": "QUEUED", "progress": 0}),
            json!({"status": "RUNNING", "progress": 50}),
            json!({"status": "FINISHED", "progress": 100, "id": 7}),
        ]);
        let config = PollConfig::single();

        let body = poll_until_terminal(
            "job 7",
            &config,
            StatusFields::Required,
            || {
                let next = bodies.lock().unwrap().pop_front();
                async move { next.ok_or_else(|| IrpError::api("exhausted")) }
            },
            |status| IrpError::job(format!("last status {status}")),
        )
        .await
        .expect("terminal body");

        assert_eq!(body["id"], 7);
        assert!(bodies.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn single_poll_times_out_with_last_status() {
        let config = PollConfig::new(Duration::from_secs(10), Duration::from_secs(25)).unwrap();

        let error = poll_until_terminal(
            "job 9",
            &config,
            StatusFields::Required,
            || async { Ok(json!({"status": "RUNNING", "progress": 10})) },
            |status| IrpError::job(format!("last status {status}")),
        )
        .await
        .expect_err("never finishes");

        assert_eq!(error.to_string(), "last status RUNNING");
    }

    #[tokio::test(start_paused = true)]
    async fn required_fields_missing_is_api_error() {
        let error = poll_until_terminal(
            "workflow 3",
            &PollConfig::single(),
            StatusFields::Required,
            || async { Ok(json!({"status": "RUNNING"})) },
            |_| IrpError::job("unreachable"),
        )
        .await
        .expect_err("progress missing");

        assert_eq!(error.code(), "irp.api");
    }

    #[tokio::test(start_paused = true)]
    async fn batch_poll_waits_until_nothing_in_progress() {
        let rounds = Mutex::new(VecDeque::from(vec![
            vec![json!({"status": "RUNNING"}), json!({"status": "FINISHED"})],
            vec![json!({"status": "FAILED"}), json!({"status": "FINISHED"})],
        ]));

        let jobs: Vec<Value> = poll_batch_until_settled(
            "jobs 1,2",
            &PollConfig::batch(),
            || {
                let next = rounds.lock().unwrap().pop_front();
                async move { next.ok_or_else(|| IrpError::api("exhausted")) }
            },
            |pending| IrpError::job(format!("{pending} pending")),
        )
        .await
        .expect("settled");

        assert_eq!(jobs.len(), 2);
        assert_eq!(JobStatus::of(&jobs[0]), JobStatus::Failed);
    }
}
