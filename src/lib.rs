//! linkspeed -- Bandwidth and latency measurement against speedtest servers.
//!
//! This crate provides server discovery and selection, latency probing,
//! and the concurrent download/upload transfer engine behind the
//! `linkspeed` binary.

pub mod config;
pub mod directory;
pub mod probes;
pub mod report;
pub mod selection;
pub mod server;
pub mod throughput;
pub mod transport;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use config::AppConfig;
use directory::{ClientInfo, Directory, HttpDirectory, StaticDirectory};
use probes::{HttpLatencyProber, LatencyProbe};
use report::{RunReport, SelectedServer};
use selection::ServerSelector;
use server::Endpoint;
use throughput::engine::TransferEngine;
use throughput::{Direction, TransferConfig};
use transport::{HttpTransport, Transport};

/// Worker counts used when the target is given explicitly.
const EXPLICIT_DOWNLOAD_WORKERS: usize = 4;
const EXPLICIT_UPLOAD_WORKERS: usize = 2;
const EXPLICIT_UPLOAD_LENGTH: usize = 3;

/// Everything a run needs, built once at startup.
pub struct RunContext {
    pub config: AppConfig,
    transport: Arc<dyn Transport>,
    directory: Arc<dyn Directory>,
    prober: Arc<dyn LatencyProbe>,
}

impl RunContext {
    /// Wire up the HTTP stack described by `config`. A non-empty
    /// `[[directory.servers]]` list replaces the online directory.
    pub fn from_config(config: AppConfig) -> Result<Self> {
        let http = HttpTransport::new(&config.http).context("failed to build HTTP client")?;

        let directory: Arc<dyn Directory> = if config.directory.servers.is_empty() {
            Arc::new(HttpDirectory::new(http.client().clone(), &config.directory))
        } else {
            info!(
                servers = config.directory.servers.len(),
                "using server list from configuration"
            );
            Arc::new(StaticDirectory::new(config.directory.servers.clone()))
        };

        let transport: Arc<dyn Transport> = Arc::new(http);
        let prober = Arc::new(HttpLatencyProber::new(Arc::clone(&transport)));

        Ok(Self::with_parts(config, transport, directory, prober))
    }

    pub fn with_parts(
        config: AppConfig,
        transport: Arc<dyn Transport>,
        directory: Arc<dyn Directory>,
        prober: Arc<dyn LatencyProbe>,
    ) -> Self {
        Self {
            config,
            transport,
            directory,
            prober,
        }
    }
}

/// Per-invocation overrides, usually from the command line.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Skip discovery and selection and test against this URL.
    pub server: Option<String>,
    /// Random pick among the N closest servers.
    pub randomize: Option<usize>,
    /// Single upload tier of this many bytes.
    pub upsize: Option<u64>,
    /// Download passes per worker.
    pub downtimes: Option<u32>,
    /// Per-worker deadline for both directions.
    pub timeout: Option<Duration>,
}

impl RunOptions {
    /// Effective download and upload session configs.
    pub fn transfer_configs(&self, config: &AppConfig) -> (TransferConfig, TransferConfig) {
        let mut download = config.download_config();
        let mut upload = config.upload_config();

        if self.server.is_some() {
            download.workers = EXPLICIT_DOWNLOAD_WORKERS;
            upload.workers = EXPLICIT_UPLOAD_WORKERS;
            upload.length = EXPLICIT_UPLOAD_LENGTH;
        }
        if let Some(size) = self.upsize {
            upload.sizes = vec![size];
            upload.length = 1;
        }
        if let Some(times) = self.downtimes {
            download.repeat = times;
        }
        if let Some(timeout) = self.timeout {
            download.timeout = Some(timeout);
            upload.timeout = Some(timeout);
        }

        (download, upload)
    }
}

/// One full measurement: pick a target, then download, then upload.
pub async fn run(ctx: &RunContext, opts: &RunOptions) -> Result<RunReport> {
    let (download_cfg, upload_cfg) = opts.transfer_configs(&ctx.config);
    // Fail on bad flags before touching the network.
    download_cfg.validate(Direction::Download)?;
    upload_cfg.validate(Direction::Upload)?;

    let (client, selected, endpoint) = match &opts.server {
        Some(url) => {
            let endpoint = Endpoint::parse(url).context("invalid --server URL")?;
            info!(%endpoint, "using explicit server");
            (ClientInfo::default(), SelectedServer::explicit(url), endpoint)
        }
        None => pick_server(ctx, opts).await?,
    };

    let engine = TransferEngine::new(Arc::clone(&ctx.transport));
    let download = engine
        .run_session(Direction::Download, &endpoint, &download_cfg)
        .await
        .context("download test failed")?;
    let upload = engine
        .run_session(Direction::Upload, &endpoint, &upload_cfg)
        .await
        .context("upload test failed")?;

    Ok(RunReport::new(client, selected, download, upload))
}

async fn pick_server(
    ctx: &RunContext,
    opts: &RunOptions,
) -> Result<(ClientInfo, SelectedServer, Endpoint)> {
    let client = ctx
        .directory
        .client_info()
        .await
        .context("failed to look up client information")?;

    let exclude: HashSet<String> = ctx
        .config
        .directory
        .ignore_ids
        .iter()
        .chain(client.ignore_ids.iter())
        .cloned()
        .collect();

    let servers = ctx
        .directory
        .servers(&client, &exclude)
        .await
        .context("failed to fetch server list")?;

    let window = opts.randomize.unwrap_or(ctx.config.selection.randomize);
    let selector = ServerSelector::new(Arc::clone(&ctx.prober), &ctx.config.selection);
    let server = selector.select(servers, window).await?;

    let endpoint = server
        .endpoint()
        .with_context(|| format!("server {} has an unusable URL", server.id))?;
    Ok((client, SelectedServer::from(&server), endpoint))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransferSettings;

    #[test]
    fn test_transfer_configs_follow_config_file() {
        let mut config = AppConfig::default();
        config.download = TransferSettings {
            workers: Some(8),
            ..TransferSettings::default()
        };
        let (download, upload) = RunOptions::default().transfer_configs(&config);
        assert_eq!(download.workers, 8);
        assert_eq!(upload, TransferConfig::upload_defaults());
    }

    #[test]
    fn test_explicit_server_uses_fixed_worker_counts() {
        let mut config = AppConfig::default();
        config.download.workers = Some(16);
        config.upload.length = Some(5);
        let opts = RunOptions {
            server: Some("http://fixed.example.net/speedtest/upload.php".into()),
            ..RunOptions::default()
        };
        let (download, upload) = opts.transfer_configs(&config);
        assert_eq!(download.workers, 4);
        assert_eq!(upload.workers, 2);
        assert_eq!(upload.length, 3);
    }

    #[test]
    fn test_flag_overrides() {
        let opts = RunOptions {
            upsize: Some(65_536),
            downtimes: Some(3),
            timeout: Some(Duration::from_secs(20)),
            ..RunOptions::default()
        };
        let (download, upload) = opts.transfer_configs(&AppConfig::default());
        assert_eq!(upload.tiers(), &[65_536]);
        assert_eq!(download.repeat, 3);
        assert_eq!(download.timeout, Some(Duration::from_secs(20)));
        assert_eq!(upload.timeout, Some(Duration::from_secs(20)));
    }
}
