// ABOUTME: Append-only audit log of correlation-tagged JSON lines.
// ABOUTME: One record per externally observable state-changing action.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use uuid::Uuid;

/// One audit record. Written for traceability, never read back to drive
/// control flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub correlation_id: Uuid,
    pub actor: String,
    pub action: String,
    pub at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Append-only JSON-lines audit sink. Failures to write are logged and
/// swallowed; auditing must never fail a deployment.
pub struct AuditLog {
    actor: String,
    file: Option<Mutex<File>>,
}

impl AuditLog {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            actor: default_actor(),
            file: Some(Mutex::new(file)),
        })
    }

    /// A sink that records nothing. Used by pre-flight-only commands.
    pub fn disabled() -> Self {
        Self {
            actor: default_actor(),
            file: None,
        }
    }

    pub fn record(&self, correlation_id: Uuid, action: &str) {
        self.write(AuditRecord {
            correlation_id,
            actor: self.actor.clone(),
            action: action.to_string(),
            at: Utc::now(),
            reason: None,
        });
    }

    pub fn record_with_reason(&self, correlation_id: Uuid, action: &str, reason: &str) {
        self.write(AuditRecord {
            correlation_id,
            actor: self.actor.clone(),
            action: action.to_string(),
            at: Utc::now(),
            reason: Some(reason.to_string()),
        });
    }

    fn write(&self, record: AuditRecord) {
        let Some(ref file) = self.file else {
            return;
        };

        let line = match serde_json::to_string(&record) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("failed to serialize audit record: {e}");
                return;
            }
        };

        let mut file = file.lock();
        if let Err(e) = writeln!(file, "{line}") {
            tracing::warn!("failed to append audit record: {e}");
        }
    }
}

fn default_actor() -> String {
    let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    let host = gethostname::gethostname().to_string_lossy().into_owned();
    format!("{user}@{host}")
}
