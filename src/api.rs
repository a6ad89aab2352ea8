mod client;
mod dashboard;

use async_trait::async_trait;

use crate::auth::UserId;
use crate::error::Result;
use crate::models::RealtimeDashboard;

pub use client::ApiClient;

/// Where the controller gets its raw snapshots from.
#[async_trait]
pub trait DashboardSource: Send + Sync {
    async fn fetch_realtime_dashboard(&self, user: &UserId) -> Result<RealtimeDashboard>;

    /// Asks the backend to drop any cached snapshot before answering.
    async fn force_refresh_dashboard(&self, user: &UserId) -> Result<RealtimeDashboard>;
}

#[async_trait]
impl DashboardSource for ApiClient {
    async fn fetch_realtime_dashboard(&self, user: &UserId) -> Result<RealtimeDashboard> {
        ApiClient::fetch_realtime_dashboard(self, user).await
    }

    async fn force_refresh_dashboard(&self, user: &UserId) -> Result<RealtimeDashboard> {
        ApiClient::force_refresh_dashboard(self, user).await
    }
}
