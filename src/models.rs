use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    Completed,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Conclusion {
    Success,
    Failure,
    Cancelled,
    #[serde(other)]
    Other,
}

/// One CI run as reported by the backend. Snapshots are replaced, never patched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: u64,
    pub name: String,
    pub status: RunStatus,
    #[serde(default)]
    pub conclusion: Option<Conclusion>,
    pub created_at: String,
    #[serde(alias = "repo")]
    pub repository: String,
}

impl WorkflowRun {
    /// Conclusion only counts once the run has completed.
    pub fn effective_conclusion(&self) -> Option<Conclusion> {
        match self.status {
            RunStatus::Completed => self.conclusion,
            _ => None,
        }
    }
}

/// Raw workflow snapshot returned by the realtime endpoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeDashboard {
    #[serde(default)]
    pub workflows: Vec<WorkflowRun>,
    #[serde(default)]
    pub last_updated: String,
    #[serde(default)]
    pub total_workflows: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_repositories: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RealtimeDashboard {
    pub fn is_consistent(&self) -> bool {
        self.error.is_some() || self.total_workflows == self.workflows.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryStatus {
    Success,
    Error,
    Offline,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildStats {
    pub total_success_rate: u32,
    pub total_builds: usize,
    pub successful_builds: usize,
    pub failed_builds: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertType {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Critical,
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertData {
    pub id: u64,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub message: String,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_id: Option<u64>,
}

/// One row per repository present in the current snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineData {
    pub id: u64,
    pub name: String,
    pub repository: String,
    pub success_rate: f64,
    pub total_builds: usize,
    pub successful_builds: usize,
    pub failed_builds: usize,
    pub last_build_status: Option<Conclusion>,
    pub last_build_time: Option<String>,
}

/// Derived view handed to every consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardSummary {
    pub timestamp: String,
    pub status: SummaryStatus,
    pub total_pipelines: usize,
    pub overview: BuildStats,
    pub recent_activity: BuildStats,
    #[serde(default)]
    pub active_alerts: Vec<AlertData>,
    #[serde(default)]
    pub pipelines: Vec<PipelineData>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub date: String,
    pub value: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrendsData {
    #[serde(default, alias = "successRateTrend")]
    pub success_rate_trend: Vec<TrendPoint>,
    #[serde(default, alias = "buildVolumeTrend")]
    pub build_volume_trend: Vec<TrendPoint>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    #[serde(default)]
    pub status: String,
}

/// Inbound push message. Carries no structured delta, only a "something changed" hint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_id: Option<u64>,
}
