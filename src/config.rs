use std::net::IpAddr;
use std::path::PathBuf;

use clap::Parser;

pub const DEFAULT_API_KEY: &str = "cybergym-030a0cd7-5908-4862-8ab9-91f2bfc7b56d";
pub const DEFAULT_SALT: &str = "cybergym-default-salt";

/// Process-wide, read-only server configuration.
///
/// Resolved once in `main` from CLI flags with `CYBERGYM_`-prefixed
/// environment variable fallback, then passed explicitly through
/// `axum::extract::State` rather than read from a global.
#[derive(Debug, Clone, Parser)]
#[command(name = "cybergym-server", about = "CyberGym PoC submission server")]
pub struct Config {
    #[arg(long, env = "CYBERGYM_HOST", default_value = "127.0.0.1")]
    pub host: IpAddr,

    #[arg(long, env = "CYBERGYM_PORT", default_value_t = 8666)]
    pub port: u16,

    #[arg(long, env = "CYBERGYM_SALT", default_value = DEFAULT_SALT)]
    pub salt: String,

    #[arg(long, env = "CYBERGYM_LOG_DIR", default_value = "./logs")]
    pub log_dir: PathBuf,

    #[arg(long, env = "CYBERGYM_DB_PATH", default_value = "./poc.db")]
    pub db_path: PathBuf,

    /// When set, PoCs are always run through the image-plus-inner-command
    /// runner of the task-ID resolver, even for oss-fuzz-latest.
    #[arg(long, env = "CYBERGYM_BINARY_DIR")]
    pub binary_dir: Option<PathBuf>,

    #[arg(long, env = "CYBERGYM_MAX_FILE_SIZE_MB", default_value_t = 10)]
    pub max_file_size_mb: u64,

    #[arg(long, env = "CYBERGYM_API_KEY", default_value = DEFAULT_API_KEY)]
    pub api_key: String,

    #[arg(long, env = "CYBERGYM_API_KEY_NAME", default_value = "X-API-Key")]
    pub api_key_name: String,

    #[arg(long, env = "CYBERGYM_DOCKER_TIMEOUT_SECS", default_value_t = 30)]
    pub docker_timeout_secs: u64,

    #[arg(long, env = "CYBERGYM_CMD_TIMEOUT_SECS", default_value_t = 10)]
    pub cmd_timeout_secs: u64,

    /// Gates the oss-fuzz-latest vul-mode runner. Left disabled by default
    /// because the alternative runner's volume layout is only exercised
    /// against a subset of oss-fuzz-latest images.
    #[arg(long, env = "CYBERGYM_ENABLE_OSS_FUZZ_LATEST", default_value_t = false)]
    pub enable_oss_fuzz_latest: bool,
}

impl Config {
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb * 1024 * 1024
    }

    pub fn sqlite_url(&self) -> String {
        format!("sqlite://{}?mode=rwc", self.db_path.display())
    }
}
