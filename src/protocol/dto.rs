use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostInfo {
    pub name: String,
}

impl HostInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct ProjectInfo {
    pub project_name: String,
    pub master_url: String,
    pub user_name: String,
    pub team_name: Option<String>,
}

/// State of the science application process behind a task.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ActiveTaskState {
    Uninitialized = 0,
    Executing = 1,
    Exited = 2,
    WasSignaled = 3,
    ExitUnknown = 4,
    AbortPending = 5,
    Aborted = 6,
    CouldntStart = 7,
    QuitPending = 8,
    Suspended = 9,
    CopyPending = 10,
}

impl TryFrom<i64> for ActiveTaskState {
    type Error = i64;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Uninitialized,
            1 => Self::Executing,
            2 => Self::Exited,
            3 => Self::WasSignaled,
            4 => Self::ExitUnknown,
            5 => Self::AbortPending,
            6 => Self::Aborted,
            7 => Self::CouldntStart,
            8 => Self::QuitPending,
            9 => Self::Suspended,
            10 => Self::CopyPending,
            other => return Err(other),
        })
    }
}

impl Display for ActiveTaskState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ActiveTaskState::Uninitialized => write!(f, "waiting"),
            ActiveTaskState::Executing => write!(f, "running"),
            ActiveTaskState::Exited => write!(f, "exited"),
            ActiveTaskState::WasSignaled => write!(f, "signaled"),
            ActiveTaskState::ExitUnknown => write!(f, "exit unknown"),
            ActiveTaskState::AbortPending => write!(f, "aborting"),
            ActiveTaskState::Aborted => write!(f, "aborted"),
            ActiveTaskState::CouldntStart => write!(f, "couldn't start"),
            ActiveTaskState::QuitPending => write!(f, "quitting"),
            ActiveTaskState::Suspended => write!(f, "suspended"),
            ActiveTaskState::CopyPending => write!(f, "copying"),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ResultState {
    New = 0,
    FilesDownloading = 1,
    FilesDownloaded = 2,
    ComputeError = 3,
    FilesUploading = 4,
    FilesUploaded = 5,
    Aborted = 6,
    UploadFailed = 7,
}

impl TryFrom<i64> for ResultState {
    type Error = i64;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::New,
            1 => Self::FilesDownloading,
            2 => Self::FilesDownloaded,
            3 => Self::ComputeError,
            4 => Self::FilesUploading,
            5 => Self::FilesUploaded,
            6 => Self::Aborted,
            7 => Self::UploadFailed,
            other => return Err(other),
        })
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct ActiveTask {
    pub active_task_state: ActiveTaskState,
    pub fraction_done: f64,
    pub elapsed_time: f64,
}

impl Display for ActiveTask {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {:.1}% ({:.0}s)",
            self.active_task_state,
            self.fraction_done * 100.0,
            self.elapsed_time
        )
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct ResultInfo {
    pub name: String,
    pub wu_name: String,
    pub platform: String,
    pub project_url: String,
    pub final_cpu_time: f64,
    pub final_elapsed_time: f64,
    pub estimated_cpu_time_remaining: f64,
    pub state: ResultState,
    pub received_time: DateTime<Utc>,
    pub report_deadline: DateTime<Utc>,
    pub active_task: Option<ActiveTask>,
}

/// Everything a dashboard needs about one host, as sent on `/results`.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct SimpleGuiInfo {
    pub host: HostInfo,
    pub projects: Vec<ProjectInfo>,
    pub results: Vec<ResultInfo>,
}

impl SimpleGuiInfo {
    pub fn test() -> Self {
        let received_time = DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_default();
        let report_deadline = DateTime::from_timestamp(1_701_000_000, 0).unwrap_or_default();
        let result = |name: &str, active_task| ResultInfo {
            name: name.to_string(),
            wu_name: format!("{name}_wu"),
            platform: "x86_64-pc-linux-gnu".to_string(),
            project_url: "https://tests.example.org/".to_string(),
            final_cpu_time: 0.0,
            final_elapsed_time: 0.0,
            estimated_cpu_time_remaining: 3600.0,
            state: ResultState::FilesDownloaded,
            received_time,
            report_deadline,
            active_task,
        };
        Self {
            host: HostInfo::new("tests-host"),
            projects: vec![ProjectInfo {
                project_name: "tests-project".to_string(),
                master_url: "https://tests.example.org/".to_string(),
                user_name: "tests-user".to_string(),
                team_name: None,
            }],
            results: vec![
                result(
                    "tests-result-running",
                    Some(ActiveTask {
                        active_task_state: ActiveTaskState::Executing,
                        fraction_done: 0.25,
                        elapsed_time: 120.0,
                    }),
                ),
                result("tests-result-queued", None),
            ],
        }
    }
}
