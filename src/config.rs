use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Kindred real-time messaging server
#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(name = "kindred-server", version, about = "Kindred real-time messaging server")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "KINDRED_PORT", default_value = "5000")]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "KINDRED_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Path to TOML config file
    #[arg(long, default_value = "./kindred.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "KINDRED_JSON_LOGS")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Data directory for persistent state (DB, keys)
    #[arg(long, env = "KINDRED_DATA_DIR", default_value = "./data")]
    pub data_dir: String,

    /// Seconds between liveness supervisor sweeps
    #[arg(long, env = "KINDRED_HEARTBEAT_INTERVAL_SECS", default_value = "30")]
    pub heartbeat_interval_secs: u64,

    /// Capacity of each connection's outbound send queue
    #[arg(long, env = "KINDRED_SEND_QUEUE_CAPACITY", default_value = "64")]
    pub send_queue_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5000,
            bind_address: "0.0.0.0".to_string(),
            config: "./kindred.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            heartbeat_interval_secs: 30,
            send_queue_capacity: 64,
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (KINDRED_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Config::parse();
        let config_path = cli.config.clone();

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("KINDRED_"))
            .merge(Serialized::defaults(cli))
            .extract()
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Kindred Messaging Server Configuration
# Place this file at ./kindred.toml or specify with --config <path>
# All settings can be overridden via environment variables (KINDRED_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 5000)
# port = 5000

# Bind address (default: 0.0.0.0 — all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for SQLite database and JWT signing key
# data_dir = "./data"

# Seconds between liveness supervisor sweeps (default: 30).
# A connection that misses two consecutive sweeps is evicted.
# heartbeat_interval_secs = 30

# Outbound send queue capacity per connection (default: 64).
# A full queue counts as a failed push and falls back to a notification.
# send_queue_capacity = 64
"#
    .to_string()
}
