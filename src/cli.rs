use clap::Parser;

use crate::config::AppConfig;

#[derive(Parser, Debug)]
#[command(name = "bbbsupervisor")]
#[command(version = "0.1.0")]
#[command(
    about = "Watches systemd logs (via journalctl) and queries Prometheus to detect potential issues and take action",
    long_about = None
)]
pub struct Cli {
    /// Configuration directory (reads default.toml and $SUPERVISOR_ENV)
    #[arg(short, long, default_value = "config")]
    pub config: String,

    /// Redis connection address
    #[arg(long, env = "SUPERVISOR_REDIS_ADDR")]
    pub redis_addr: Option<String>,

    /// Redis password
    #[arg(long, env = "SUPERVISOR_REDIS_PASS", hide_env_values = true)]
    pub redis_pass: Option<String>,

    /// Redis database number
    #[arg(long)]
    pub redis_db: Option<i64>,

    /// Prometheus server, e.g. http://localhost:9090
    #[arg(long)]
    pub prometheus_url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Emit JSON formatted logs
    #[arg(long)]
    pub json_logs: bool,
}

impl Cli {
    /// Command-line flags win over file and environment configuration
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(addr) = &self.redis_addr {
            config.redis.addr = addr.clone();
        }
        if let Some(pass) = &self.redis_pass {
            config.redis.password = Some(pass.clone());
        }
        if let Some(db) = self.redis_db {
            config.redis.db = db;
        }
        if let Some(url) = &self.prometheus_url {
            config.prometheus.url = url.clone();
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if self.json_logs {
            config.logging.json = true;
        }
    }
}
