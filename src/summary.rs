//! Pure conversion from a raw workflow snapshot to the summary consumers render.
//!
//! Nothing here touches the clock or the network: the same snapshot always
//! yields the same summary.

use std::cmp::Reverse;

use chrono::{DateTime, Duration, Utc};
use indexmap::IndexMap;

use crate::models::{
    AlertData, AlertSeverity, AlertType, BuildStats, Conclusion, DashboardSummary, PipelineData,
    RealtimeDashboard, SummaryStatus, WorkflowRun,
};

const RECENT_WINDOW_HOURS: i64 = 24;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Deterministic identifier for a string key (64-bit FNV-1a).
pub fn stable_id(value: &str) -> u64 {
    value.bytes().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME)
    })
}

pub fn derive_summary(raw: &RealtimeDashboard) -> DashboardSummary {
    let overview = calculate_stats(raw.workflows.iter());
    let recent_activity = calculate_stats(recent_runs(&raw.workflows).into_iter());
    let pipelines = group_pipelines(&raw.workflows);

    let (status, active_alerts) = match &raw.error {
        Some(message) => (
            SummaryStatus::Error,
            vec![synthesize_alert(message, &raw.last_updated)],
        ),
        None => (SummaryStatus::Success, Vec::new()),
    };

    DashboardSummary {
        timestamp: raw.last_updated.clone(),
        status,
        total_pipelines: pipelines.len(),
        overview,
        recent_activity,
        active_alerts,
        pipelines,
    }
}

/// Zero-valued summary shown while the backend cannot be reached.
pub fn offline_summary(timestamp: &str) -> DashboardSummary {
    DashboardSummary {
        timestamp: timestamp.to_string(),
        status: SummaryStatus::Offline,
        total_pipelines: 0,
        overview: BuildStats::default(),
        recent_activity: BuildStats::default(),
        active_alerts: Vec::new(),
        pipelines: Vec::new(),
    }
}

fn calculate_stats<'a>(runs: impl Iterator<Item = &'a WorkflowRun>) -> BuildStats {
    let mut stats = BuildStats::default();

    for run in runs {
        stats.total_builds += 1;
        match run.effective_conclusion() {
            Some(Conclusion::Success) => stats.successful_builds += 1,
            Some(Conclusion::Failure) => stats.failed_builds += 1,
            _ => {}
        }
    }

    stats.total_success_rate = rounded_rate(stats.successful_builds, stats.total_builds);
    stats
}

fn rounded_rate(successful: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    let rate = ((successful as f64 / total as f64) * 100.0).round() as u32;
    rate
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

// Window is anchored at the newest run so the derivation stays clock-free.
fn recent_runs(runs: &[WorkflowRun]) -> Vec<&WorkflowRun> {
    let Some(newest) = runs.iter().filter_map(|r| parse_timestamp(&r.created_at)).max() else {
        return Vec::new();
    };
    let window_start = newest - Duration::hours(RECENT_WINDOW_HOURS);

    runs.iter()
        .filter(|r| parse_timestamp(&r.created_at).is_some_and(|ts| ts > window_start))
        .collect()
}

fn group_pipelines(runs: &[WorkflowRun]) -> Vec<PipelineData> {
    let mut groups: IndexMap<&str, Vec<&WorkflowRun>> = IndexMap::new();
    for run in runs {
        groups.entry(run.repository.as_str()).or_default().push(run);
    }

    groups
        .into_iter()
        .map(|(repository, runs)| build_pipeline(repository, runs))
        .collect()
}

fn build_pipeline(repository: &str, mut runs: Vec<&WorkflowRun>) -> PipelineData {
    // Newest first; unparseable timestamps sink to the end in source order.
    runs.sort_by_key(|r| Reverse(parse_timestamp(&r.created_at)));

    let stats = calculate_stats(runs.iter().copied());

    #[allow(clippy::cast_precision_loss)]
    let success_rate = (stats.successful_builds as f64 / stats.total_builds.max(1) as f64) * 100.0;

    let latest = runs.first();
    let name = repository
        .rsplit('/')
        .next()
        .unwrap_or(repository)
        .to_string();

    PipelineData {
        id: stable_id(repository),
        name,
        repository: repository.to_string(),
        success_rate,
        total_builds: stats.total_builds,
        successful_builds: stats.successful_builds,
        failed_builds: stats.failed_builds,
        last_build_status: latest.and_then(|r| r.effective_conclusion()),
        last_build_time: latest.map(|r| r.created_at.clone()),
    }
}

fn synthesize_alert(message: &str, timestamp: &str) -> AlertData {
    AlertData {
        id: stable_id(&format!("alert:{message}")),
        alert_type: AlertType::Error,
        severity: AlertSeverity::High,
        message: message.to_string(),
        timestamp: timestamp.to_string(),
        pipeline_id: None,
    }
}
