use crate::handler::{SubscriptionEvent, SubscriptionSpec};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use tokio::sync::mpsc;

pub const JOB_UPDATE_QUERY: &str = "subscription OnJobUpdate($jobId: ID!) { onJobUpdate(jobId: $jobId) { jobId status progress result error updatedAt } }";
pub const JOB_UPDATE_PATH: &str = "data.onJobUpdate";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
    #[serde(other)]
    Unknown,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
            JobStatus::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobUpdate {
    pub job_id: String,
    pub status: JobStatus,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl JobUpdate {
    pub fn from_value(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}

/// Subscription following status updates of one AI job.
pub fn job_subscription(
    job_id: &str,
) -> (SubscriptionSpec, mpsc::UnboundedReceiver<SubscriptionEvent>) {
    let (spec, rx) = SubscriptionSpec::channel(JOB_UPDATE_QUERY, json!({ "jobId": job_id }));
    (spec.with_path(JOB_UPDATE_PATH), rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_spec_targets_the_job() {
        let (spec, _rx) = job_subscription("job-42");
        assert_eq!(spec.variables, json!({"jobId": "job-42"}));
        assert_eq!(spec.path.as_deref(), Some(JOB_UPDATE_PATH));
        assert!(spec.query.contains("onJobUpdate"));
    }

    #[test]
    fn updates_parse_with_terminal_detection() {
        let update = JobUpdate::from_value(&json!({
            "jobId": "job-42",
            "status": "COMPLETED",
            "result": {"summary": "done"}
        }))
        .expect("update");
        assert!(update.status.is_terminal());
        assert_eq!(update.progress, None);

        let running = JobUpdate::from_value(&json!({"jobId": "job-42", "status": "PROCESSING", "progress": 0.5}))
            .expect("update");
        assert!(!running.status.is_terminal());

        let odd = JobUpdate::from_value(&json!({"jobId": "j", "status": "QUEUED_REMOTE"})).expect("update");
        assert_eq!(odd.status, JobStatus::Unknown);
        assert!(JobUpdate::from_value(&json!({"status": "FAILED"})).is_none());
    }
}
