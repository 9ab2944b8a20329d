use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// The two durable job kinds. `convert` is enqueued per upload;
/// `update-tips` is a scheduled singleton.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum JobPayload {
    Convert {
        repository: String,
        commit: String,
        root: String,
        filename: PathBuf,
    },
    UpdateTips,
}

impl JobPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            JobPayload::Convert { .. } => "convert",
            JobPayload::UpdateTips => "update-tips",
        }
    }
}

/// A claimed job. `attempts` already counts the in-flight execution.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: i64,
    pub payload: JobPayload,
    pub attempts: i64,
    pub max_attempts: i64,
}
