//! SSH tunnel backend.
//!
//! Spawns `sshpass ssh -N -D <bind>:<port>` as an external process, one per
//! proxy. The child runs in its own process group; `stop` TERMs the whole
//! group. Each spawn gets a reaper task that waits on the child and fires
//! the exit handler unless the exit was requested through `stop`.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::{BackendOptions, Config, ProxyConfig};
use crate::errors::{DaemonError, Result};

use super::{ExitHandler, RunningInstance, TunnelBackend};

/// Method name this backend registers under.
pub const METHOD: &str = "ssh";

const DEFAULT_CONNECT_TIMEOUT: &str = "5";
const DEFAULT_SSH_BINARY: &str = "ssh";
const DEFAULT_SSHPASS_BINARY: &str = "sshpass";

#[derive(Default)]
struct SshState {
    /// proxy name → pid of the tracked tunnel (process group leader)
    procs: HashMap<String, u32>,
    /// proxy name → stored options from the last `configure`
    settings: HashMap<String, BackendOptions>,
    /// set by `stop` so the reaper suppresses the exit callback
    stop_flags: HashMap<String, bool>,
}

pub struct SshBackend {
    state: Arc<Mutex<SshState>>,
    exit_handler: Arc<Mutex<Option<ExitHandler>>>,
}

impl SshBackend {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SshState::default())),
            exit_handler: Arc::new(Mutex::new(None)),
        }
    }
}

impl Default for SshBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Render a scalar option value the way it appears in YAML.
fn option_string(options: &BackendOptions, key: &str, fallback: &str) -> String {
    match options.get(key) {
        Some(serde_yaml::Value::String(s)) => s.clone(),
        Some(serde_yaml::Value::Number(n)) => n.to_string(),
        Some(serde_yaml::Value::Bool(b)) => b.to_string(),
        _ => fallback.to_string(),
    }
}

/// Build the full argv for one tunnel attempt. Split out for testability.
fn build_argv(
    name: &str,
    proxy: &ProxyConfig,
    config: &Config,
    options: &BackendOptions,
) -> Result<Vec<String>> {
    let host_name = &proxy.default;
    let host = config.host(host_name)?;
    let login = config.login_for(host_name, host)?;

    let local_addr = format!("{}:{}", config.proxies.bind, proxy.port);
    let remote = format!("{}@{}", login.user, host.address);

    let connect_timeout = option_string(options, "connect_timeout", DEFAULT_CONNECT_TIMEOUT);
    let ssh_binary = option_string(options, "ssh_binary", DEFAULT_SSH_BINARY);
    let sshpass_binary = option_string(options, "sshpass_binary", DEFAULT_SSHPASS_BINARY);

    let mut argv = vec![
        sshpass_binary,
        "-p".to_string(),
        login.password.clone(),
        ssh_binary,
        "-N".to_string(),
        "-oStrictHostKeyChecking=no".to_string(),
        "-oUserKnownHostsFile=/dev/null".to_string(),
        format!("-oConnectTimeout={connect_timeout}"),
        "-p".to_string(),
        host.port.to_string(),
        "-D".to_string(),
        local_addr,
        remote,
    ];

    if let Some(serde_yaml::Value::Sequence(flags)) = options.get("additional_flags") {
        for flag in flags {
            if let serde_yaml::Value::String(s) = flag {
                argv.push(s.clone());
            } else {
                debug!("[{METHOD}] Ignoring non-string additional flag for '{name}': {flag:?}");
            }
        }
    }

    Ok(argv)
}

impl TunnelBackend for SshBackend {
    fn configure(&self, name: &str, options: BackendOptions) -> Result<()> {
        self.state.lock().settings.insert(name.to_string(), options);
        Ok(())
    }

    fn start(&self, name: &str, proxy: &ProxyConfig, config: &Config) -> Result<()> {
        let options = self
            .state
            .lock()
            .settings
            .get(name)
            .cloned()
            .unwrap_or_default();

        let argv = build_argv(name, proxy, config, &options)?;

        info!(
            "[{METHOD}] Launching SOCKS proxy '{}' on {}:{} via '{}'",
            name, config.proxies.bind, proxy.port, proxy.default
        );

        let mut command = Command::new(&argv[0]);
        command
            .args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0);

        let mut child = command.spawn().map_err(|e| DaemonError::TunnelSpawn {
            proxy: name.to_string(),
            source: e,
        })?;

        let pid = child.id().ok_or_else(|| {
            DaemonError::Internal(format!("spawned tunnel for '{name}' has no pid"))
        })?;

        {
            let mut state = self.state.lock();
            state.procs.insert(name.to_string(), pid);
            state.stop_flags.insert(name.to_string(), false);
        }

        let state = Arc::clone(&self.state);
        let exit_handler = Arc::clone(&self.exit_handler);
        let proxy_name = name.to_string();
        tokio::spawn(async move {
            let status = child.wait().await;
            debug!(
                "[{METHOD}] Tunnel '{}' exited ({:?})",
                proxy_name,
                status.as_ref().ok().and_then(|s| s.code())
            );

            let intentional = {
                let mut state = state.lock();
                let flag = state.stop_flags.remove(&proxy_name).unwrap_or(false);
                state.procs.remove(&proxy_name);
                flag
            };

            if !intentional {
                warn!("[{METHOD}] Tunnel '{}' exited unexpectedly", proxy_name);
                let handler = exit_handler.lock().clone();
                if let Some(handler) = handler {
                    handler(&proxy_name);
                }
            }
        });

        info!("[{METHOD}] Proxy '{}' started (PID {})", name, pid);
        Ok(())
    }

    fn stop(&self, name: &str) -> Result<()> {
        let pid = {
            let mut state = self.state.lock();
            state.stop_flags.insert(name.to_string(), true);
            state.procs.get(name).copied()
        };

        let Some(pid) = pid else {
            debug!("[{METHOD}] No active process found for proxy '{name}'");
            return Ok(());
        };

        info!("[{METHOD}] Stopping proxy '{}' (PID {})", name, pid);

        killpg(Pid::from_raw(pid as i32), Signal::SIGTERM).map_err(|errno| {
            DaemonError::TunnelSignal {
                proxy: name.to_string(),
                pgid: pid as i32,
                source: std::io::Error::from(errno),
            }
        })?;

        Ok(())
    }

    fn status(&self, name: &str) -> (u32, bool) {
        match self.state.lock().procs.get(name) {
            Some(pid) => (*pid, true),
            None => (0, false),
        }
    }

    fn instance(&self, name: &str) -> Option<Arc<dyn RunningInstance>> {
        let pid = *self.state.lock().procs.get(name)?;
        Some(Arc::new(SshInstance { pgid: pid as i32 }))
    }

    fn set_exit_handler(&self, handler: ExitHandler) -> bool {
        *self.exit_handler.lock() = Some(handler);
        true
    }
}

/// Handle to one running tunnel; `stop` TERMs its process group.
struct SshInstance {
    pgid: i32,
}

impl RunningInstance for SshInstance {
    fn stop(&self) {
        let _ = killpg(Pid::from_raw(self.pgid), Signal::SIGTERM);
    }
}

#[cfg(test)]
mod tests;
