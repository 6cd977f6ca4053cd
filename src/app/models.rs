use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Outcome of one device-bridge invocation. Synthetic results (timeout,
/// cancel, spawn failure) carry no exit code and always fail.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandResult {
    pub succeeded: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
}

impl CommandResult {
    pub fn from_exit(stdout: String, stderr: String, exit_code: Option<i32>) -> Self {
        let stdout = stdout.trim().to_string();
        let stderr = stderr.trim().to_string();
        let stderr = if stderr.is_empty() {
            "no error".to_string()
        } else {
            stderr
        };
        Self {
            succeeded: exit_code == Some(0),
            stdout,
            stderr,
            exit_code,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
            error: Some(error.into()),
        }
    }

    pub fn timed_out() -> Self {
        Self::failure("Command timed out")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Device {
    pub id: String,
    pub status: String,
    pub is_online: bool,
    pub model: Option<String>,
    pub device_name: Option<String>,
    pub product: Option<String>,
    pub transport_id: Option<String>,
}

impl Device {
    pub fn display_name(&self) -> &str {
        self.model
            .as_deref()
            .or(self.device_name.as_deref())
            .unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CommandStatus {
    Starting,
    Success,
    Failed,
    Timeout,
    Exception,
}

/// One audit record. Identified by `(command, start_time)`; updated in place
/// exactly once when the command reaches a terminal status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLogEntry {
    pub command: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration: Option<Duration>,
    pub status: CommandStatus,
    pub output: Option<String>,
    pub error: Option<String>,
    pub exit_code: Option<i32>,
}

/// Lifecycle record emitted by the runner; same shape as a log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandEvent {
    pub command: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration: Option<Duration>,
    pub status: CommandStatus,
    pub output: Option<String>,
    pub error: Option<String>,
    pub exit_code: Option<i32>,
}

impl CommandEvent {
    pub fn into_entry(self) -> CommandLogEntry {
        CommandLogEntry {
            command: self.command,
            start_time: self.start_time,
            end_time: self.end_time,
            duration: self.duration,
            status: self.status,
            output: self.output,
            error: self.error,
            exit_code: self.exit_code,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct StorageInfo {
    pub total_bytes: i64,
    pub used_bytes: i64,
    pub available_bytes: i64,
}

impl StorageInfo {
    pub fn used_percent(&self) -> f64 {
        if self.total_bytes <= 0 {
            return 0.0;
        }
        self.used_bytes as f64 / self.total_bytes as f64 * 100.0
    }

    pub fn total_gb(&self) -> f64 {
        self.total_bytes as f64 / 1_073_741_824.0
    }

    pub fn used_gb(&self) -> f64 {
        self.used_bytes as f64 / 1_073_741_824.0
    }

    pub fn available_gb(&self) -> f64 {
        self.available_bytes as f64 / 1_073_741_824.0
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CopyKind {
    Bios,
    Rom,
}

/// One pending transfer in a batch; consumed once by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCopyTask {
    pub kind: CopyKind,
    pub source_path: PathBuf,
    pub file_name: String,
    pub system_code: String,
    pub system_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_zero_means_success() {
        let result = CommandResult::from_exit("ok\n".to_string(), String::new(), Some(0));
        assert!(result.succeeded);
        assert_eq!(result.stdout, "ok");
        assert_eq!(result.stderr, "no error");
    }

    #[test]
    fn nonzero_exit_means_failure() {
        let result = CommandResult::from_exit(String::new(), "boom\n".to_string(), Some(1));
        assert!(!result.succeeded);
        assert_eq!(result.stderr, "boom");
    }

    #[test]
    fn synthetic_results_have_no_exit_code() {
        let result = CommandResult::timed_out();
        assert!(!result.succeeded);
        assert_eq!(result.exit_code, None);
        assert_eq!(result.error.as_deref(), Some("Command timed out"));
    }

    #[test]
    fn display_name_falls_back_to_id() {
        let mut device = Device {
            id: "ABC123".to_string(),
            status: "device".to_string(),
            is_online: true,
            model: None,
            device_name: None,
            product: None,
            transport_id: None,
        };
        assert_eq!(device.display_name(), "ABC123");
        device.device_name = Some("trimui".to_string());
        assert_eq!(device.display_name(), "trimui");
        device.model = Some("Smart_Pro".to_string());
        assert_eq!(device.display_name(), "Smart_Pro");
    }

    #[test]
    fn storage_percent_and_gb_views() {
        let info = StorageInfo {
            total_bytes: 1_024_000_000,
            used_bytes: 409_600_000,
            available_bytes: 614_400_000,
        };
        assert!((info.used_percent() - 40.0).abs() < 0.001);
        assert!(info.total_gb() > 0.95 && info.total_gb() < 0.96);
    }
}
