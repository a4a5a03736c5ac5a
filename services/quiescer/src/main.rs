//! Quiesce thrasher
//!
//! Stress tests a clustered filesystem by periodically quiescing and releasing
//! it while a workload runs alongside.
//!
//! ## Flow
//!
//! - **Steady state**: wait until every MDS is active or standby
//! - **Discovery**: one quiescer per filesystem (or per `--fs`)
//! - **Run**: until `--run-for` elapses or Ctrl-C
//! - **Join**: stop all quiescers; any captured failure fails the process

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use qa_quiescer::ceph::{CephCli, DEFAULT_ONE_SHOT_TIMEOUT};
use qa_quiescer::config::{ActorSettings, Config};
use qa_quiescer::shutdown::StopSignal;
use qa_quiescer::{CommandTransport, Quiescer, ThrasherGroup};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Json,
    Pretty,
}

/// Periodically quiesce clustered filesystems to stress components that must
/// tolerate pause/resume cycles.
#[derive(Debug, Parser)]
#[command(name = "quiescer", version)]
struct Cli {
    /// Cluster CLI binary.
    #[arg(long, env = "QUIESCER_CEPH_BIN", default_value = "ceph")]
    ceph_bin: String,

    /// Cluster name.
    #[arg(long, env = "QUIESCER_CLUSTER", default_value = "ceph")]
    cluster: String,

    /// Filesystem to thrash; repeat for several. Defaults to all filesystems.
    #[arg(long = "fs", env = "QUIESCER_FS", value_delimiter = ',')]
    filesystems: Vec<String>,

    /// JSON file with actor settings.
    #[arg(long, env = "QUIESCER_CONFIG")]
    config: Option<PathBuf>,

    /// Deadline for the quiesce command, in seconds.
    #[arg(long, env = "QUIESCER_QUIESCE_TIMEOUT")]
    quiesce_timeout: Option<u64>,

    /// Fraction of time to stay quiesced, clamped to [0.005, 0.5].
    #[arg(long, env = "QUIESCER_QUIESCE_FACTOR")]
    quiesce_factor: Option<f64>,

    /// Minimum quiesce duration, in seconds.
    #[arg(long, env = "QUIESCER_MIN_QUIESCE")]
    min_quiesce: Option<u64>,

    /// Maximum quiesce duration, in seconds.
    #[arg(long, env = "QUIESCER_MAX_QUIESCE")]
    max_quiesce: Option<u64>,

    /// Delay before the first quiesce, in seconds.
    #[arg(long, env = "QUIESCER_INITIAL_DELAY")]
    initial_delay: Option<u64>,

    /// Path to quiesce.
    #[arg(long, env = "QUIESCER_PATH")]
    path: Option<String>,

    /// Seed for quiesce durations.
    #[arg(long, env = "QUIESCER_SEED")]
    seed: Option<u64>,

    /// Stop after this many seconds instead of waiting for Ctrl-C.
    #[arg(long, env = "QUIESCER_RUN_FOR")]
    run_for: Option<u64>,

    /// Bound on a single cluster command, in seconds.
    #[arg(long, env = "QUIESCER_ONE_SHOT_TIMEOUT", default_value_t = DEFAULT_ONE_SHOT_TIMEOUT.as_secs())]
    one_shot_timeout: u64,

    /// Log output format.
    #[arg(long, env = "QUIESCER_LOG_FORMAT", value_enum, default_value = "json")]
    log_format: LogFormat,
}

impl Cli {
    fn into_config(self) -> Result<Config> {
        let mut settings = match &self.config {
            Some(path) => ActorSettings::from_file(path)?,
            None => ActorSettings::default(),
        };

        // flags override the file
        settings.quiesce_timeout = self.quiesce_timeout.or(settings.quiesce_timeout);
        settings.quiesce_factor = self.quiesce_factor.or(settings.quiesce_factor);
        settings.min_quiesce = self.min_quiesce.or(settings.min_quiesce);
        settings.max_quiesce = self.max_quiesce.or(settings.max_quiesce);
        settings.initial_delay = self.initial_delay.or(settings.initial_delay);
        settings.path = self.path.or(settings.path);
        settings.seed = self.seed.or(settings.seed);

        Ok(Config {
            ceph_bin: self.ceph_bin,
            cluster: self.cluster,
            filesystems: self.filesystems,
            actor: settings.build()?,
            run_for: self.run_for.map(Duration::from_secs),
            one_shot_timeout: Duration::from_secs(self.one_shot_timeout),
            steady_poll_interval: Duration::from_secs(2),
        })
    }
}

fn init_tracing(format: LogFormat) {
    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()));

    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    info!("Starting quiesce thrasher");

    let config = cli.into_config()?;
    info!(
        cluster = %config.cluster,
        filesystems = ?config.filesystems,
        quiesce_timeout = config.actor.quiesce_timeout,
        quiesce_factor = config.actor.quiesce_factor,
        min_quiesce = config.actor.min_quiesce,
        max_quiesce = config.actor.max_quiesce,
        initial_delay = config.actor.initial_delay,
        "Configuration loaded"
    );

    let interrupt = Arc::new(StopSignal::new());
    tokio::spawn({
        let interrupt = Arc::clone(&interrupt);
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received shutdown signal");
                interrupt.stop();
            }
        }
    });

    let ceph = CephCli::new(&config.ceph_bin, &config.cluster)
        .with_one_shot_timeout(config.one_shot_timeout);

    if !ceph
        .wait_for_steady_state(config.steady_poll_interval, interrupt.listener())
        .await?
    {
        info!("Interrupted before quiescing started");
        return Ok(());
    }

    let filesystems = if config.filesystems.is_empty() {
        ceph.list_filesystems().await?
    } else {
        config.filesystems.clone()
    };
    if filesystems.is_empty() {
        anyhow::bail!("no filesystems to quiesce");
    }

    let transport: Arc<dyn CommandTransport> = Arc::new(ceph.clone());
    let mut group = ThrasherGroup::new();
    for (index, fs) in filesystems.into_iter().enumerate() {
        // distinct sequences per filesystem under one seed
        let seed = config.actor.seed.map(|s| s.wrapping_add(index as u64));
        let actor_config = config.actor.clone().with_seed(seed);
        let topology = Arc::new(ceph.filesystem(fs.clone()));

        let handle = Quiescer::new(fs, actor_config, Arc::clone(&transport), topology).start();
        group.push(handle);
    }
    info!(thrashers = ?group.names(), "Quiesce thrashing started");

    let mut listener = interrupt.listener();
    match config.run_for {
        Some(run_for) => {
            if listener.sleep(run_for).await {
                warn!("Interrupted before the configured run time elapsed");
            }
        }
        None => listener.stopped().await,
    }

    group
        .stop_all()
        .await
        .context("quiesce thrashing failed")?;

    info!("Quiesce thrasher shutdown complete");
    Ok(())
}
