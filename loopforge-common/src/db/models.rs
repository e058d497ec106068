//! Database models
//!
//! All state that needs to survive restarts lives here. Rows are mapped by
//! hand from sqlx rows; config/output maps and slice data are JSON text
//! columns.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

/// Lifecycle status of a background job.
///
/// Transitions: PENDING → RUNNING → {COMPLETED, FAILED, CANCELLED}.
/// CANCELLED is terminal and sticky: a completing or failing worker must not
/// overwrite it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
        };
        write!(f, "{s}")
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(JobStatus::Pending),
            "RUNNING" => Ok(JobStatus::Running),
            "COMPLETED" => Ok(JobStatus::Completed),
            "FAILED" => Ok(JobStatus::Failed),
            "CANCELLED" => Ok(JobStatus::Cancelled),
            other => Err(Error::BadInput(format!("unknown job status: {other}"))),
        }
    }
}

/// Kind of background work a job performs. One processor per type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    Separation,
    Analysis,
    Slicing,
    Moments,
    StemAnalysis,
    Peaks,
}

impl JobType {
    /// Processor time budget in seconds before the job is failed with a
    /// timeout reason.
    pub fn timeout_seconds(&self) -> u64 {
        match self {
            JobType::Separation => 600,
            JobType::Analysis => 30,
            _ => 300,
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobType::Separation => "SEPARATION",
            JobType::Analysis => "ANALYSIS",
            JobType::Slicing => "SLICING",
            JobType::Moments => "MOMENTS",
            JobType::StemAnalysis => "STEM_ANALYSIS",
            JobType::Peaks => "PEAKS",
        };
        write!(f, "{s}")
    }
}

impl FromStr for JobType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "SEPARATION" => Ok(JobType::Separation),
            "ANALYSIS" => Ok(JobType::Analysis),
            "SLICING" => Ok(JobType::Slicing),
            "MOMENTS" => Ok(JobType::Moments),
            "STEM_ANALYSIS" => Ok(JobType::StemAnalysis),
            "PEAKS" => Ok(JobType::Peaks),
            other => Err(Error::BadInput(format!("unknown job type: {other}"))),
        }
    }
}

/// Role of a separated stem (and of the slice bank built from it).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StemRole {
    Drums,
    Bass,
    Vocals,
    Other,
    Unknown,
}

impl StemRole {
    /// Map a stem filename to its role.
    pub fn from_stem_name(name: &str) -> Self {
        let lower = name.to_ascii_lowercase();
        if lower.contains("drum") {
            StemRole::Drums
        } else if lower.contains("bass") {
            StemRole::Bass
        } else if lower.contains("vocal") {
            StemRole::Vocals
        } else if lower.contains("other") {
            StemRole::Other
        } else {
            StemRole::Unknown
        }
    }
}

impl fmt::Display for StemRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StemRole::Drums => "drums",
            StemRole::Bass => "bass",
            StemRole::Vocals => "vocals",
            StemRole::Other => "other",
            StemRole::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

impl FromStr for StemRole {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "drums" => Ok(StemRole::Drums),
            "bass" => Ok(StemRole::Bass),
            "vocals" => Ok(StemRole::Vocals),
            "other" => Ok(StemRole::Other),
            "unknown" => Ok(StemRole::Unknown),
            other => Err(Error::BadInput(format!("unknown stem role: {other}"))),
        }
    }
}

/// Root aggregate for one user workflow. Created on upload, survives until
/// explicitly deleted (delete cascades to jobs, assets and slice banks).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub source_filename: String,
    pub duration_seconds: Option<f64>,
    pub bpm: Option<f64>,
    pub key: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(source_filename: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_filename: source_filename.into(),
            duration_seconds: None,
            bpm: None,
            key: None,
            created_at: Utc::now(),
        }
    }
}

/// One unit of background work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub session_id: Uuid,
    pub job_type: JobType,
    pub status: JobStatus,
    pub input_path: Option<String>,
    /// Opaque, job-type-specific configuration
    pub config: serde_json::Value,
    pub output_paths: HashMap<String, String>,
    pub progress: f64,
    pub stage: String,
    pub retry_count: i64,
    pub max_retries: i64,
    pub error_message: Option<String>,
    pub error_traceback: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(
        session_id: Uuid,
        job_type: JobType,
        input_path: Option<String>,
        config: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            job_type,
            status: JobStatus::Pending,
            input_path,
            config,
            output_paths: HashMap::new(),
            progress: 0.0,
            stage: String::new(),
            retry_count: 0,
            max_retries: 3,
            error_message: None,
            error_traceback: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }
}

/// A produced file: stem, slice export, bounce. Owned by its Session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    pub id: Uuid,
    pub session_id: Uuid,
    pub filename: String,
    pub file_path: String,
    pub asset_type: String,
    pub stem_role: Option<StemRole>,
    pub detected_key: Option<String>,
    pub detected_bpm: Option<f64>,
    pub key_confidence: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl Asset {
    pub fn stem(
        session_id: Uuid,
        filename: impl Into<String>,
        file_path: impl Into<String>,
        stem_role: StemRole,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            filename: filename.into(),
            file_path: file_path.into(),
            asset_type: "stem".to_string(),
            stem_role: Some(stem_role),
            detected_key: None,
            detected_bpm: None,
            key_confidence: None,
            created_at: Utc::now(),
        }
    }
}

/// Durable record of a slicing result.
///
/// `slice_data` holds the serialized slice array exactly as the slice engine
/// produced it; the field-wise round-trip law is tested against it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SliceBankRecord {
    pub id: Uuid,
    pub session_id: Uuid,
    pub source_path: String,
    pub source_filename: String,
    pub stem_role: StemRole,
    pub sample_rate: u32,
    pub total_samples: i64,
    pub total_duration: f64,
    pub bpm: Option<f64>,
    pub key: Option<String>,
    pub mean_energy: f64,
    pub max_energy: f64,
    pub energy_variance: f64,
    pub slice_data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Persisted trigger sequence: events plus the parameters and seed that
/// generated it, so `(bank, source, rules, seed) → sequence` is reproducible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerSequenceRecord {
    pub id: Uuid,
    pub session_id: Uuid,
    /// Weak reference: the sequence survives bank deletion
    pub slice_bank_id: Uuid,
    pub events: serde_json::Value,
    pub params: serde_json::Value,
    pub seed: i64,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            assert_eq!(status.to_string().parse::<JobStatus>().unwrap(), status);
        }
        assert!("bogus".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_job_type_timeouts() {
        assert_eq!(JobType::Separation.timeout_seconds(), 600);
        assert_eq!(JobType::Analysis.timeout_seconds(), 30);
        assert_eq!(JobType::Slicing.timeout_seconds(), 300);
        assert_eq!(JobType::Peaks.timeout_seconds(), 300);
    }

    #[test]
    fn test_stem_role_from_name() {
        assert_eq!(StemRole::from_stem_name("drums"), StemRole::Drums);
        assert_eq!(StemRole::from_stem_name("Lead Vocals"), StemRole::Vocals);
        assert_eq!(StemRole::from_stem_name("sub_bass"), StemRole::Bass);
        assert_eq!(StemRole::from_stem_name("pads"), StemRole::Unknown);
    }

    #[test]
    fn test_new_job_defaults() {
        let session_id = Uuid::new_v4();
        let job = Job::new(session_id, JobType::Slicing, None, serde_json::json!({}));
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 0.0);
        assert_eq!(job.retry_count, 0);
        assert_eq!(job.max_retries, 3);
        assert!(job.started_at.is_none());
    }
}
