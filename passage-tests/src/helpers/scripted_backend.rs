//! A scriptable in-memory tunnel backend.
//!
//! Registers under the method name `stub`. Tunnels are table entries with
//! monotonically increasing pids, so tests can observe restarts. Hosts can
//! be marked as failing, and unexpected exits can be injected the way a
//! real backend's reaper would observe them.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use passage_daemon::backend::{ExitHandler, RunningInstance, TunnelBackend};
use passage_daemon::config::{BackendOptions, Config, ProxyConfig};
use passage_daemon::errors::{DaemonError, Result};

/// Method name the scripted backend registers under.
pub const METHOD: &str = "stub";

#[derive(Default)]
struct ScriptedState {
    running: HashMap<String, u32>,
    fail_hosts: HashSet<String>,
    start_count: usize,
    stop_count: usize,
    next_pid: u32,
}

pub struct ScriptedBackend {
    state: Mutex<ScriptedState>,
    exit_handler: Mutex<Option<ExitHandler>>,
}

impl ScriptedBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ScriptedState {
                next_pid: 1000,
                ..Default::default()
            }),
            exit_handler: Mutex::new(None),
        })
    }

    /// Make every start attempt against `host` fail.
    pub fn fail_host(&self, host: &str) {
        self.state.lock().fail_hosts.insert(host.to_string());
    }

    pub fn heal_host(&self, host: &str) {
        self.state.lock().fail_hosts.remove(host);
    }

    pub fn start_count(&self) -> usize {
        self.state.lock().start_count
    }

    pub fn stop_count(&self) -> usize {
        self.state.lock().stop_count
    }

    pub fn pid_of(&self, name: &str) -> Option<u32> {
        self.state.lock().running.get(name).copied()
    }

    /// Inject an unexpected exit, as the backend's reaper would observe it
    /// after an external SIGKILL.
    pub fn kill(&self, name: &str) {
        self.state.lock().running.remove(name);
        let handler = self.exit_handler.lock().clone();
        if let Some(handler) = handler {
            handler(name);
        }
    }
}

struct ScriptedInstance;

impl RunningInstance for ScriptedInstance {
    fn stop(&self) {}
}

impl TunnelBackend for ScriptedBackend {
    fn configure(&self, _name: &str, _options: BackendOptions) -> Result<()> {
        Ok(())
    }

    fn start(&self, name: &str, proxy: &ProxyConfig, _config: &Config) -> Result<()> {
        let mut state = self.state.lock();
        state.start_count += 1;
        if state.fail_hosts.contains(&proxy.default) {
            return Err(DaemonError::Internal(format!(
                "stub: cannot reach host '{}'",
                proxy.default
            )));
        }
        let pid = state.next_pid;
        state.next_pid += 1;
        state.running.insert(name.to_string(), pid);
        Ok(())
    }

    fn stop(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.stop_count += 1;
        state.running.remove(name);
        Ok(())
    }

    fn status(&self, name: &str) -> (u32, bool) {
        match self.state.lock().running.get(name) {
            Some(pid) => (*pid, true),
            None => (0, false),
        }
    }

    fn instance(&self, name: &str) -> Option<Arc<dyn RunningInstance>> {
        if self.state.lock().running.contains_key(name) {
            Some(Arc::new(ScriptedInstance))
        } else {
            None
        }
    }

    fn set_exit_handler(&self, handler: ExitHandler) -> bool {
        *self.exit_handler.lock() = Some(handler);
        true
    }
}
