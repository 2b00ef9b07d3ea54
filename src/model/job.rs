//! Per-attachment conversion job and its state machine.
//!
//! ```text
//! Pending → Converting → Succeeded
//!                      → Retrying → Converting → …
//!                      → Failed
//! ```

use serde::Serialize;

/// Lifecycle state of one attachment conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Converting,
    Succeeded,
    Retrying,
    Failed,
}

/// Tracks one attachment's conversion attempts.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionJob {
    pub attachment_index: usize,
    pub filename: String,
    status: JobStatus,
    attempts: u32,
    history: Vec<JobStatus>,
    error: Option<String>,
}

impl ConversionJob {
    pub fn new(attachment_index: usize, filename: impl Into<String>) -> Self {
        Self {
            attachment_index,
            filename: filename.into(),
            status: JobStatus::Pending,
            attempts: 0,
            history: vec![JobStatus::Pending],
            error: None,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    /// Number of times the job entered `Converting`.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Every state the job has been in, oldest first.
    pub fn history(&self) -> &[JobStatus] {
        &self.history
    }

    /// Message of the last failed attempt.
    pub fn last_error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, JobStatus::Succeeded | JobStatus::Failed)
    }

    /// `Pending | Retrying → Converting`. Returns `false` on an illegal transition.
    pub fn start_attempt(&mut self) -> bool {
        match self.status {
            JobStatus::Pending | JobStatus::Retrying => {
                self.attempts += 1;
                self.transition(JobStatus::Converting);
                true
            }
            _ => {
                debug_assert!(false, "start_attempt from {:?}", self.status);
                false
            }
        }
    }

    /// `Converting → Succeeded`.
    pub fn succeed(&mut self) -> bool {
        if self.status != JobStatus::Converting {
            debug_assert!(false, "succeed from {:?}", self.status);
            return false;
        }
        self.transition(JobStatus::Succeeded);
        true
    }

    /// `Converting → Retrying` while retries remain, `Converting → Failed` otherwise.
    ///
    /// `retries` is the number of extra attempts allowed after the first one.
    pub fn fail_attempt(&mut self, reason: impl std::fmt::Display, retries: u32) -> JobStatus {
        if self.status != JobStatus::Converting {
            debug_assert!(false, "fail_attempt from {:?}", self.status);
            return self.status;
        }
        self.error = Some(reason.to_string());
        let next = if self.attempts <= retries {
            JobStatus::Retrying
        } else {
            JobStatus::Failed
        };
        self.transition(next);
        next
    }

    fn transition(&mut self, next: JobStatus) {
        tracing::debug!(
            attachment = %self.filename,
            from = ?self.status,
            to = ?next,
            "Job state change"
        );
        self.status = next;
        self.history.push(next);
    }
}
