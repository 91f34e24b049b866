//! Command-line surface for the `hermod` worker binary (spec §6).

use clap::{Parser, ValueEnum};
use hermod_cli_common::LogArgs;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Runs the supervisor and engines locally with no platform connection;
    /// useful for development and single-binary deployments.
    Standalone,
    /// Runs the reconcile loop against `--platform-url`, owning and driving
    /// whatever workflows rendezvous hashing or weighted placement assigns.
    Worker,
    /// Serves only the health/metrics endpoints documented in spec.md §6.
    /// The administrative API server itself lives outside this crate.
    Api,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ServiceAction {
    Install,
    Uninstall,
    Start,
    Stop,
    Restart,
    Status,
}

#[derive(Debug, Parser)]
#[command(name = "hermod", about = "Hermod worker and health-server binary")]
pub struct Args {
    #[command(flatten)]
    pub logging: LogArgs,

    #[arg(long, env = "HERMOD_MODE", value_enum, default_value = "standalone")]
    pub mode: Mode,

    /// Installs/controls the binary as an OS service instead of running it.
    #[arg(long, value_enum)]
    pub service: Option<ServiceAction>,

    #[arg(long, env = "HERMOD_PLATFORM_URL")]
    pub platform_url: Option<String>,

    #[arg(long, env = "HERMOD_WORKER_GUID")]
    pub worker_guid: Option<String>,

    #[arg(long, env = "HERMOD_WORKER_TOKEN")]
    pub worker_token: Option<String>,

    #[arg(long, env = "HERMOD_WORKER_ID")]
    pub worker_id: Option<u32>,

    #[arg(long, env = "HERMOD_TOTAL_WORKERS", default_value_t = 1)]
    pub total_workers: u32,

    #[arg(long, env = "HERMOD_WORKER_HOST", default_value = "0.0.0.0")]
    pub worker_host: String,

    #[arg(long, env = "HERMOD_WORKER_PORT", default_value_t = 7_800)]
    pub worker_port: u16,
}

/// Env-only toggles (spec.md §6) that aren't exposed as flags: read directly
/// rather than bound through `clap` so they can change without a restart of
/// the argument parser (some, like the sample rate, are re-read on SIGHUP by
/// a future revision; none of that is implemented here).
#[derive(Debug, Clone)]
pub struct EnvToggles {
    pub idempotency_required: bool,
    pub idempotency_ttl_secs: u64,
    pub idempotency_namespace: String,
    pub sqlite_busy_timeout_ms: u64,
    pub worker_reg_token: Option<String>,
    pub cors_allow_origins: Option<String>,
    pub hsts_enable: bool,
    pub ready_leases_required: bool,
}

impl EnvToggles {
    pub fn from_env() -> Self {
        Self {
            idempotency_required: env_bool("HERMOD_IDEMPOTENCY_REQUIRED", false),
            idempotency_ttl_secs: env_parse("HERMOD_IDEMPOTENCY_TTL", 86_400),
            idempotency_namespace: std::env::var("HERMOD_IDEMPOTENCY_NAMESPACE")
                .unwrap_or_else(|_| "default".to_string()),
            sqlite_busy_timeout_ms: env_parse("HERMOD_SQLITE_BUSY_TIMEOUT_MS", 15_000),
            worker_reg_token: std::env::var("HERMOD_WORKER_REG_TOKEN").ok(),
            cors_allow_origins: std::env::var("HERMOD_CORS_ALLOW_ORIGINS").ok(),
            hsts_enable: env_bool("HERMOD_HSTS_ENABLE", false),
            ready_leases_required: env_bool("HERMOD_READY_LEASES_REQUIRED", false),
        }
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
