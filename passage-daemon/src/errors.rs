use std::path::PathBuf;
use thiserror::Error;

/// Format a YAML error for user-friendly display, including the field path.
fn format_yaml_error(e: &serde_path_to_error::Error<serde_yaml::Error>) -> String {
    let path = e.path().to_string();
    let inner = e.inner();
    let msg = inner.to_string();

    let located = if let Some(loc) = inner.location() {
        format!("Line {}, Column {}: {}", loc.line(), loc.column(), msg)
    } else {
        msg
    };

    if path.is_empty() {
        located
    } else {
        format!("{}: {}", path, located)
    }
}

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to parse config file '{path}':\n  {}", format_yaml_error(.source))]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_path_to_error::Error<serde_yaml::Error>,
    },

    #[error("Config file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("Failed to read config file '{path}': {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unknown proxy: {0}")]
    ProxyNotFound(String),

    #[error("unknown host: {0}")]
    HostNotFound(String),

    #[error("login '{login}' not found for host '{host}'")]
    LoginNotFound { login: String, host: String },

    #[error("no backend registered with name: {0}")]
    BackendNotFound(String),

    #[error("no default host set for proxy '{0}'")]
    NoDefaultHost(String),

    #[error("Failed to spawn tunnel for proxy {proxy}: {source}")]
    TunnelSpawn {
        proxy: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to signal process group {pgid} for proxy {proxy}: {source}")]
    TunnelSignal {
        proxy: String,
        pgid: i32,
        #[source]
        source: std::io::Error,
    },

    #[error("all attempts failed for proxy '{proxy}': {last}")]
    AllHostsFailed { proxy: String, last: String },

    #[error("invalid permission '{permission}' in role '{role}'")]
    InvalidPermission { permission: String, role: String },

    #[error("invalid user '{user}' in group '{group}'")]
    UnknownGroupMember { user: String, group: String },

    #[error("cannot bind control instance '{instance}' on {listen}: {source}")]
    ControlBind {
        instance: String,
        listen: String,
        #[source]
        source: std::io::Error,
    },

    #[error("stale socket at {socket_path} cannot be deleted: {source}")]
    StaleSocket {
        socket_path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, DaemonError>;
