pub mod models {
    pub mod point;
    pub mod representation;
    pub mod role;
    pub mod stat;
    pub mod status;
}

pub mod client;
pub mod config;
pub mod services {
    pub mod demo;
    pub mod events;
    pub mod runtime;
    pub mod scheduler;
    pub mod snapshot;
    pub mod sync;
}

use crate::client::{EwebClient, Gateway};
use crate::config::{CliArgs, Config, GatewayConfig};
use crate::models::stat::{Stat, friendly_stat_name};
use crate::models::status::SyncStatus;
use crate::services::demo::{DEMO_STAT_NAME, DemoGateway};
use crate::services::{runtime, snapshot};
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug)]
struct LoadedEnvFile {
    path: PathBuf,
    explicit: bool,
    applied: usize,
}

pub fn run(cli: &CliArgs) -> Result<(), String> {
    // 1) Load config
    let cfg = Config::from_env(cli)?;
    info!(
        "Config loaded (poll_interval={}ms, write_debounce={}ms, post_write_refresh={}ms, retry_budget={}, snapshot={})",
        cfg.sync.poll_interval.as_millis(),
        cfg.sync.write_debounce.as_millis(),
        cfg.sync.post_write_refresh.as_millis(),
        cfg.sync.retry_budget,
        cfg.snapshot_file.display()
    );

    // 2) Connect to the gateway
    let (gateway, stat_name): (Arc<dyn Gateway>, Option<String>) = match &cfg.gateway {
        GatewayConfig::Demo => {
            info!("Demo mode: using the built-in stat");
            (
                Arc::new(DemoGateway::new()),
                Some(cfg.stat_name.clone().unwrap_or_else(|| DEMO_STAT_NAME.to_string())),
            )
        }
        GatewayConfig::Eweb {
            url,
            username,
            password,
            request_timeout,
        } => {
            let client = EwebClient::new(url, username, password, *request_timeout);
            client
                .connect()
                .map_err(|e| format!("Connecting to {} failed: {} ({})", client.base_url(), e, e.code()))?;
            info!("Connected to {}", client.base_url());
            (Arc::new(client), cfg.stat_name.clone())
        }
    };

    // 3) Load the stat: fresh from the gateway, else the last snapshot
    let stat = load_stat(gateway.as_ref(), stat_name.as_deref(), &cfg)?;
    info!(
        "Stat \"{}\" ready with {} point(s)",
        friendly_stat_name(stat.name(), None),
        stat.get_points(false).len()
    );

    // 4) Sync until quit
    runtime::run(gateway, stat, cfg.sync, cfg.snapshot_file.clone())
}

fn load_stat(gateway: &dyn Gateway, name: Option<&str>, cfg: &Config) -> Result<Stat, String> {
    let mut stat = Stat::new();

    if let Some(name) = name {
        match gateway.get_stat(name) {
            Ok(doc) => {
                report_load_status(stat.load_from_representation(&doc));
                return Ok(stat);
            }
            Err(e) => warn!("Fetching stat \"{}\" failed: {}; trying the snapshot", name, e),
        }
    }

    match snapshot::load(&cfg.snapshot_file) {
        Ok(Some(saved)) => {
            info!("Using snapshot saved at {}", saved.saved_at.format("%Y-%m-%d %H:%M:%S UTC"));
            report_load_status(stat.load_from_representation(&saved.stat));
            Ok(stat)
        }
        Ok(None) => Err("No stat available: set STAT_NAME (or --stat) or provide a snapshot".to_string()),
        Err(e) => Err(format!("Reading snapshot {} failed: {}", cfg.snapshot_file.display(), e)),
    }
}

fn report_load_status(status: SyncStatus) {
    if !status.is_ok() {
        warn!("Stat loaded with errors: {} ({})", status.describe(), status);
    }
}

fn configure_env(cli: &CliArgs) -> Result<Option<LoadedEnvFile>, String> {
    let (path, explicit) = match &cli.env_file {
        Some(path) => {
            if !path.is_file() {
                return Err(format!("env file not found: {}", path.display()));
            }
            (path.clone(), true)
        }
        None => {
            let cwd = std::env::current_dir().map_err(|e| format!("unable to read current directory: {}", e))?;
            let default_path = cwd.join(".env");
            if !default_path.is_file() {
                return Ok(None);
            }
            (default_path, false)
        }
    };
    let applied = config::apply_env_file(&path).map_err(|e| e.to_string())?;
    Ok(Some(LoadedEnvFile { path, explicit, applied }))
}

fn main() {
    let setup = CliArgs::parse(std::env::args().skip(1)).and_then(|cli| configure_env(&cli).map(|env| (cli, env)));
    let (cli, loaded_env) = match setup {
        Ok(v) => v,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };

    // Init logging after environment so RUST_LOG from .env is respected.
    let default_filter = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(default_filter)
        .format_timestamp_secs()
        .init();

    if let Some(info) = loaded_env.as_ref() {
        let origin = if info.explicit { "CLI-specified" } else { "default" };
        info!(
            "Environment loaded from {} .env file: {} ({} variable(s) applied)",
            origin,
            info.path.display(),
            info.applied
        );
    }

    info!(
        "virtual-stat {} (git {}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME_GIT_HASH")
    );
    if let Err(e) = run(&cli) {
        error!("fatal: {}", e);
        std::process::exit(1);
    }
}
