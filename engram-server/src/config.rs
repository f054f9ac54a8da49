//! Bootstrap configuration: host, port, database path, debug flag.
//! Loaded once from the environment (optionally via a `.env` file) with
//! hardcoded defaults, so the process never refuses to start for lack of
//! an env var.

use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_path: PathBuf,
    pub staging_path: PathBuf,
    pub rip_tool_path: PathBuf,
    pub ffmpeg_path: PathBuf,
    pub tmdb_api_key: Option<String>,
    pub debug: bool,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            host: env::var("ENGRAM_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("ENGRAM_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8080),
            database_path: env::var("ENGRAM_DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("engram.db")),
            staging_path: env::var("ENGRAM_STAGING_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| default_staging_path()),
            rip_tool_path: env::var("ENGRAM_RIP_TOOL_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("makemkvcon")),
            ffmpeg_path: env::var("ENGRAM_FFMPEG_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("ffmpeg")),
            tmdb_api_key: env::var("ENGRAM_TMDB_API_KEY").ok(),
            debug: env::var("ENGRAM_DEBUG")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(target_os = "windows")]
fn default_staging_path() -> PathBuf {
    PathBuf::from(r"C:\ProgramData\engram\staging")
}

#[cfg(not(target_os = "windows"))]
fn default_staging_path() -> PathBuf {
    PathBuf::from("/var/tmp/engram/staging")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_addr_joins_host_and_port() {
        let config = ServerConfig {
            host: "0.0.0.0".to_string(),
            port: 9000,
            database_path: PathBuf::from("x.db"),
            staging_path: PathBuf::from("/tmp/staging"),
            rip_tool_path: PathBuf::from("makemkvcon"),
            ffmpeg_path: PathBuf::from("ffmpeg"),
            tmdb_api_key: None,
            debug: false,
        };
        assert_eq!(config.bind_addr(), "0.0.0.0:9000");
    }
}
