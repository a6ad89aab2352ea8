use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use serde::Serialize;

use cipulse::api::ApiClient;
use cipulse::auth::{ApiToken, UserId};
use cipulse::channel::{ErrorHandler, MessageHandler, PushChannel, WsConnector};
use cipulse::config::{ChannelConfig, ClientConfig, ControllerConfig, DEFAULT_API_URL};
use cipulse::controller::{DashboardController, RefreshSignal};
use cipulse::error::CIPulseError;
use cipulse::models::PushEnvelope;

#[derive(Parser)]
#[command(name = "cipulse")]
#[command(author, version, about = "Live CI/CD dashboard client", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Dashboard backend URL
    #[arg(long, global = true, env = "NEXT_PUBLIC_API_URL", default_value = DEFAULT_API_URL)]
    api_url: String,

    /// Backend bearer token (optional)
    #[arg(short, long, global = true, env = "CIPULSE_TOKEN")]
    token: Option<String>,

    /// Request timeout in seconds
    #[arg(long, global = true, default_value_t = 30)]
    timeout: u64,

    /// Output file path (defaults to stdout)
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    /// Pretty print JSON output
    #[arg(short, long, global = true, default_value_t = false)]
    pretty: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the current workflow snapshot and print its summary
    Summary {
        /// User id the dashboard belongs to
        #[arg(short, long, env = "CIPULSE_USER")]
        user: String,

        /// Ask the backend to bypass its cache
        #[arg(short, long, default_value_t = false)]
        force: bool,
    },
    /// Print historical success-rate trends
    Trends {
        #[arg(short, long, env = "CIPULSE_USER")]
        user: String,
    },
    /// Print the backend's precomputed summary
    LegacySummary,
    /// Check that the backend is reachable
    Health,
    /// Keep the dashboard in sync and print every state change
    Watch {
        #[arg(short, long, env = "CIPULSE_USER")]
        user: String,

        /// Force one refresh right after the initial load
        #[arg(long, default_value_t = false)]
        refresh: bool,

        /// Also follow these pipeline ids on the push channel
        #[arg(long = "pipeline")]
        pipelines: Vec<u64>,
    },
    /// Print raw push-channel envelopes as they arrive
    Listen {
        #[arg(long = "pipeline")]
        pipelines: Vec<u64>,
    },
}

#[derive(Serialize)]
struct HealthReport<'a> {
    api_url: &'a str,
    healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<String>,
}

impl Cli {
    pub async fn execute(&self) -> Result<()> {
        let config = ClientConfig::new(&self.api_url)?
            .with_token(self.token.as_deref().map(ApiToken::from))
            .with_timeout(Duration::from_secs(self.timeout));

        match &self.command {
            Commands::Summary { user, force } => {
                let user: UserId = user.parse()?;
                info!("Fetching dashboard summary for user: {user}");

                let client = ApiClient::new(&config)?;
                let (_, summary) = client.fetch_live_summary(&user, *force).await?;
                self.emit(&summary)
            }
            Commands::Trends { user } => {
                let user: UserId = user.parse()?;
                let trends = ApiClient::new(&config)?.fetch_trends(&user).await?;
                self.emit(&trends)
            }
            Commands::LegacySummary => {
                let summary = ApiClient::new(&config)?.fetch_dashboard_summary().await?;
                self.emit(&summary)
            }
            Commands::Health => {
                let (healthy, status) = match ApiClient::new(&config)?.fetch_health().await {
                    Ok(health) => (true, Some(health.status)),
                    Err(CIPulseError::Decode(_)) => (true, None),
                    Err(e) => {
                        warn!("Health check failed: {e}");
                        (false, None)
                    }
                };
                self.emit(&HealthReport {
                    api_url: config.api_url.as_str(),
                    healthy,
                    status,
                })?;
                if !healthy {
                    bail!("Backend at {} is not healthy", config.api_url);
                }
                Ok(())
            }
            Commands::Watch {
                user,
                refresh,
                pipelines,
            } => self.watch(&config, user, *refresh, pipelines).await,
            Commands::Listen { pipelines } => self.listen(&config, pipelines).await,
        }
    }

    async fn watch(
        &self,
        config: &ClientConfig,
        user: &str,
        refresh: bool,
        pipelines: &[u64],
    ) -> Result<()> {
        let user: UserId = user.parse()?;
        let channel = PushChannel::new(
            Arc::new(WsConnector),
            ChannelConfig::from_api_url(&config.api_url)?,
        );
        let controller = DashboardController::start(
            user,
            Arc::new(ApiClient::new(config)?),
            channel,
            ControllerConfig::default(),
        );

        let mut signal = if refresh {
            RefreshSignal::pending()
        } else {
            RefreshSignal::default()
        };
        controller.consume_refresh_signal(&mut signal);

        let mut states = controller.subscribe();
        let mut unsubscribed = pipelines.to_vec();
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    if !unsubscribed.is_empty() && controller.push_connected() {
                        unsubscribed.retain(|id| !controller.subscribe_to_pipeline(*id));
                    }
                }
                changed = states.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = states.borrow_and_update().clone();
                    println!("{}", self.render(&state)?);
                }
            }
        }

        info!("Shutting down dashboard session");
        controller.shutdown().await;
        Ok(())
    }

    async fn listen(&self, config: &ClientConfig, pipelines: &[u64]) -> Result<()> {
        let channel = PushChannel::new(
            Arc::new(WsConnector),
            ChannelConfig::from_api_url(&config.api_url)?,
        );

        let pretty = self.pretty;
        let on_message: MessageHandler = Arc::new(move |envelope: PushEnvelope| {
            let rendered = if pretty {
                serde_json::to_string_pretty(&envelope)
            } else {
                serde_json::to_string(&envelope)
            };
            match rendered {
                Ok(json) => println!("{json}"),
                Err(e) => warn!("Cannot render envelope: {e}"),
            }
        });
        let on_error: ErrorHandler =
            Arc::new(|e: &CIPulseError| warn!("Push channel error: {e}"));
        channel.connect(on_message, Some(on_error));

        let mut unsubscribed = pipelines.to_vec();
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    if !unsubscribed.is_empty() && channel.is_connected() {
                        unsubscribed.retain(|id| !channel.subscribe_to_pipeline(*id));
                    }
                }
            }
        }

        channel.disconnect();
        Ok(())
    }

    fn render<T: Serialize>(&self, value: &T) -> Result<String> {
        let json = if self.pretty {
            serde_json::to_string_pretty(value)?
        } else {
            serde_json::to_string(value)?
        };
        Ok(json)
    }

    fn emit<T: Serialize>(&self, value: &T) -> Result<()> {
        let json_output = self.render(value)?;

        if let Some(output_path) = &self.output {
            std::fs::write(output_path, json_output)?;
            info!("Output written to: {}", output_path.display());
        } else {
            println!("{json_output}");
        }

        Ok(())
    }
}
