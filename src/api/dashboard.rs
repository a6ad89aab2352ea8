use log::{debug, info, warn};

use super::client::ApiClient;
use crate::auth::UserId;
use crate::error::{CIPulseError, Result};
use crate::models::{DashboardSummary, HealthStatus, RealtimeDashboard, TrendsData};
use crate::summary::derive_summary;

impl ApiClient {
    pub async fn fetch_realtime_dashboard(&self, user: &UserId) -> Result<RealtimeDashboard> {
        let url = self.endpoint(&["api", "realtime", "dashboard", user.as_str()])?;
        debug!("Fetching realtime dashboard from {url}");

        let dashboard: RealtimeDashboard = self.send_json(self.client.get(url)).await?;
        log_snapshot(&dashboard);
        Ok(dashboard)
    }

    pub async fn force_refresh_dashboard(&self, user: &UserId) -> Result<RealtimeDashboard> {
        let url = self.endpoint(&["api", "realtime", "refresh", user.as_str()])?;
        info!("Requesting forced dashboard refresh for user {user}");

        let dashboard: RealtimeDashboard = self.send_json(self.client.post(url)).await?;
        log_snapshot(&dashboard);
        Ok(dashboard)
    }

    pub async fn fetch_trends(&self, user: &UserId) -> Result<TrendsData> {
        let url = self.endpoint(&["api", "analytics", "trends", user.as_str()])?;
        debug!("Fetching trends from {url}");

        self.send_json(self.client.get(url)).await
    }

    /// Precomputed summary served by the backend's older endpoint.
    pub async fn fetch_dashboard_summary(&self) -> Result<DashboardSummary> {
        let url = self.endpoint(&["api", "dashboard", "summary"])?;
        debug!("Fetching legacy dashboard summary from {url}");

        self.send_json(self.client.get(url)).await
    }

    /// Fetches a snapshot (forced or not) and derives its summary.
    pub async fn fetch_live_summary(
        &self,
        user: &UserId,
        force: bool,
    ) -> Result<(RealtimeDashboard, DashboardSummary)> {
        let raw = if force {
            self.force_refresh_dashboard(user).await?
        } else {
            self.fetch_realtime_dashboard(user).await?
        };
        let summary = derive_summary(&raw);
        Ok((raw, summary))
    }

    /// Backend-reported liveness. Fails with `Decode` when a 2xx body is not the JSON status.
    pub async fn fetch_health(&self) -> Result<HealthStatus> {
        let url = self.endpoint(&["health"])?;
        debug!("Probing backend health at {url}");

        self.send_json(self.client.get(url)).await
    }

    /// Any 2xx answer counts as healthy. Never fails.
    pub async fn check_health(&self) -> bool {
        match self.fetch_health().await {
            Ok(_) | Err(CIPulseError::Decode(_)) => true,
            Err(e) => {
                debug!("Health check failed: {e}");
                false
            }
        }
    }
}

fn log_snapshot(dashboard: &RealtimeDashboard) {
    info!(
        "Received {} workflow runs (last updated {})",
        dashboard.workflows.len(),
        dashboard.last_updated
    );

    if !dashboard.is_consistent() {
        warn!(
            "Snapshot reports {} workflows but carries {}",
            dashboard.total_workflows,
            dashboard.workflows.len()
        );
    }
}
