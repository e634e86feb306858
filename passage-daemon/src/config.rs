//! Configuration schema and loading.
//!
//! The daemon reads one YAML file describing logins, hosts, proxies, control
//! instances, per-backend defaults, the ACL tables and logging. All
//! cross-references (proxy → host, host → login) are validated at load time;
//! a violation is fatal at startup.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Deserialize;

use crate::errors::{DaemonError, Result};

/// Backend method used when a host omits the `backend` field.
pub const DEFAULT_BACKEND: &str = "ssh";

const CONFIG_FILE_NAME: &str = "passaged.yaml";
const CONFIG_PATH_ENV: &str = "PASSAGE_CONFIG";

/// Free-form backend options, passed through to the backend untouched.
pub type BackendOptions = HashMap<String, serde_yaml::Value>;

/// Credential pair referenced by hosts.
#[derive(Debug, Clone, Deserialize)]
pub struct Login {
    pub user: String,
    pub password: String,
}

/// A remote endpoint a proxy can tunnel through.
#[derive(Debug, Clone, Deserialize)]
pub struct Host {
    pub address: String,
    pub port: u16,
    pub login: String,
    #[serde(default)]
    pub backend: String,
    #[serde(default)]
    pub config: BackendOptions,
    /// When non-empty, only the named proxies may use this host.
    #[serde(default)]
    pub allowed_proxies: Vec<String>,
}

impl Host {
    /// The backend method for this host, falling back to the default.
    pub fn backend_method(&self) -> &str {
        if self.backend.is_empty() {
            DEFAULT_BACKEND
        } else {
            &self.backend
        }
    }
}

/// One named local SOCKS endpoint and its upstream selection.
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    pub port: u16,
    pub default: String,
    /// Ordered fallback hosts tried after the default.
    #[serde(default)]
    pub allowed: Vec<String>,
    #[serde(default)]
    pub autostart: bool,
    #[serde(default)]
    pub acls: AclRuleSet,
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

/// All proxies plus the shared local bind address.
#[derive(Debug, Clone, Deserialize)]
pub struct ProxiesConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(flatten)]
    pub proxies: HashMap<String, ProxyConfig>,
}

impl Default for ProxiesConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            proxies: HashMap::new(),
        }
    }
}

/// Transport mode of a control instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlMode {
    Unix,
    Tcp,
}

fn default_true() -> bool {
    true
}

/// One configured control listener.
#[derive(Debug, Clone, Deserialize)]
pub struct ControlInstance {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub mode: ControlMode,
    /// Socket path in unix mode, `host:port` in tcp mode.
    pub listen: String,
    /// Whether requests on this instance must authenticate.
    #[serde(default)]
    pub auth: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ControlConfig {
    #[serde(default)]
    pub instances: Vec<ControlInstance>,
}

/// A user known to the ACL engine. `name` defaults to the map key.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AclUser {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AclGroup {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AclRole {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub permissions: Vec<String>,
}

/// Ordered allow/deny rules attached to an object (currently: proxies).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AclRuleSet {
    #[serde(default)]
    pub rules: Vec<AclRule>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AclRule {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub subjects: Vec<String>,
    /// Empty matches every permission.
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub deny: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AclConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub users: HashMap<String, AclUser>,
    #[serde(default)]
    pub groups: HashMap<String, AclGroup>,
    #[serde(default)]
    pub roles: HashMap<String, AclRole>,
}

fn default_level() -> String {
    "info".to_string()
}

/// Logging sink selection. Rotation fields are accepted for compatibility
/// with external rotation tooling and are not interpreted by the daemon.
#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default = "default_true")]
    pub to_stdout: bool,
    #[serde(default)]
    pub to_stderr: bool,
    #[serde(default)]
    pub to_file: bool,
    #[serde(default)]
    pub file: Option<PathBuf>,
    #[serde(default)]
    pub max_size: Option<u64>,
    #[serde(default)]
    pub max_age: Option<u64>,
    #[serde(default)]
    pub max_backups: Option<u64>,
    #[serde(default)]
    pub compress: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            to_stdout: true,
            to_stderr: false,
            to_file: false,
            file: None,
            max_size: None,
            max_age: None,
            max_backups: None,
            compress: false,
        }
    }
}

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logins: HashMap<String, Login>,
    #[serde(default)]
    pub hosts: HashMap<String, Host>,
    #[serde(default)]
    pub proxies: ProxiesConfig,
    #[serde(default)]
    pub control: ControlConfig,
    /// Global per-method backend defaults, overridden by host-local config.
    #[serde(default)]
    pub backends: HashMap<String, BackendOptions>,
    #[serde(default)]
    pub acl: AclConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    /// Parse a config file and validate its cross-references.
    pub fn load(path: &Path) -> Result<Config> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                DaemonError::ConfigNotFound(path.to_path_buf())
            } else {
                DaemonError::ConfigRead {
                    path: path.to_path_buf(),
                    source: e,
                }
            }
        })?;
        Self::parse(&contents, path)
    }

    /// Parse config text. Split out from `load` so tests can feed strings.
    pub fn parse(contents: &str, path: &Path) -> Result<Config> {
        let deserializer = serde_yaml::Deserializer::from_str(contents);
        let config: Config =
            serde_path_to_error::deserialize(deserializer).map_err(|e| DaemonError::ConfigParse {
                path: path.to_path_buf(),
                source: e,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-references between sections.
    pub fn validate(&self) -> Result<()> {
        for (name, proxy) in &self.proxies.proxies {
            if proxy.default.is_empty() {
                return Err(DaemonError::Config(format!(
                    "no default host set for proxy '{name}'"
                )));
            }
            if !self.hosts.contains_key(&proxy.default) {
                return Err(DaemonError::Config(format!(
                    "proxy '{name}' references unknown default host '{}'",
                    proxy.default
                )));
            }
            for host in &proxy.allowed {
                if !self.hosts.contains_key(host) {
                    return Err(DaemonError::Config(format!(
                        "proxy '{name}' references unknown fallback host '{host}'"
                    )));
                }
            }
        }
        for (name, host) in &self.hosts {
            if !self.logins.contains_key(&host.login) {
                return Err(DaemonError::Config(format!(
                    "host '{name}' references unknown login '{}'",
                    host.login
                )));
            }
        }
        Ok(())
    }

    /// Resolve the config file path: explicit flag, then `PASSAGE_CONFIG`,
    /// then the working directory, the user config dir, and `/etc/passage`.
    pub fn resolve_path(explicit: Option<PathBuf>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            return Ok(path);
        }
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            return Ok(PathBuf::from(path));
        }

        let mut candidates = vec![PathBuf::from(CONFIG_FILE_NAME)];
        if let Some(config_dir) = dirs::config_dir() {
            candidates.push(config_dir.join("passage").join(CONFIG_FILE_NAME));
        }
        candidates.push(PathBuf::from("/etc/passage").join(CONFIG_FILE_NAME));

        for candidate in &candidates {
            if candidate.is_file() {
                return Ok(candidate.clone());
            }
        }
        Err(DaemonError::ConfigNotFound(PathBuf::from(CONFIG_FILE_NAME)))
    }

    pub fn proxy(&self, name: &str) -> Result<&ProxyConfig> {
        self.proxies
            .proxies
            .get(name)
            .ok_or_else(|| DaemonError::ProxyNotFound(name.to_string()))
    }

    pub fn host(&self, name: &str) -> Result<&Host> {
        self.hosts
            .get(name)
            .ok_or_else(|| DaemonError::HostNotFound(name.to_string()))
    }

    pub fn login_for(&self, host_name: &str, host: &Host) -> Result<&Login> {
        self.logins
            .get(&host.login)
            .ok_or_else(|| DaemonError::LoginNotFound {
                login: host.login.clone(),
                host: host_name.to_string(),
            })
    }

    /// Merge global backend defaults with host-local options; host keys win.
    pub fn merged_backend_options(&self, host: &Host) -> BackendOptions {
        let mut merged = self
            .backends
            .get(host.backend_method())
            .cloned()
            .unwrap_or_default();
        for (key, value) in &host.config {
            merged.insert(key.clone(), value.clone());
        }
        merged
    }
}

/// The in-memory config is shared between the control plane and the
/// lifecycle manager; `proxy.setactive` mutates a proxy's default host.
pub type SharedConfig = Arc<RwLock<Config>>;

pub fn new_shared_config(config: Config) -> SharedConfig {
    Arc::new(RwLock::new(config))
}
