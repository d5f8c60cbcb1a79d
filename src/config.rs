use std::net::SocketAddr;
use std::path::PathBuf;

pub const WORKER_DIR_ENV: &str = "SKILLBRIDGE_WORKER_DIR";
pub const WORKER_PORT_ENV: &str = "SKILLBRIDGE_PORT";

pub const DEFAULT_PORT: u16 = 5555;

/// Fixed, per-session worker configuration. The address is agreed with the
/// worker at start time; there is no runtime negotiation.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub program: String,
    pub args: Vec<String>,
    pub build_program: String,
    pub build_args: Vec<String>,
    pub worker_dir: PathBuf,
    pub skills_dir: PathBuf,
    pub port: u16,
}

impl WorkerConfig {
    pub fn for_worker_dir(worker_dir: impl Into<PathBuf>) -> Self {
        let worker_dir = worker_dir.into();
        let skills_dir = worker_dir.join("src").join("skill");
        Self {
            program: "node".to_string(),
            args: vec!["build/main.js".to_string()],
            build_program: "npx".to_string(),
            build_args: vec!["tsc".to_string()],
            worker_dir,
            skills_dir,
            port: DEFAULT_PORT,
        }
    }

    pub fn address(&self) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], self.port))
    }
}

pub fn worker_dir_from_env() -> Option<PathBuf> {
    std::env::var_os(WORKER_DIR_ENV)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

pub fn port_from_env() -> Result<Option<u16>, String> {
    let Ok(value) = std::env::var(WORKER_PORT_ENV) else {
        return Ok(None);
    };
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    parse_port(trimmed).map(Some)
}

pub fn parse_port(value: &str) -> Result<u16, String> {
    value
        .trim()
        .parse::<u16>()
        .map_err(|_| format!("invalid port: {value} (expected 1-65535)"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_worker_contract() {
        let config = WorkerConfig::for_worker_dir("/opt/worker");
        assert_eq!(config.program, "node");
        assert_eq!(config.args, vec!["build/main.js".to_string()]);
        assert_eq!(config.build_program, "npx");
        assert_eq!(config.build_args, vec!["tsc".to_string()]);
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.skills_dir, PathBuf::from("/opt/worker/src/skill"));
        assert_eq!(config.address().to_string(), "127.0.0.1:5555");
    }

    #[test]
    fn port_parsing_rejects_garbage() {
        assert_eq!(parse_port("5556"), Ok(5556));
        assert!(parse_port("sixty").is_err());
        assert!(parse_port("70000").is_err());
    }
}
