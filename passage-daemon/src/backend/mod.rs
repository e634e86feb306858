//! Tunneling backends.
//!
//! A backend owns the processes it spawns and exposes the lifecycle contract
//! the proxy manager drives. Optional capabilities (instance handles, exit
//! notification) are probed through default trait methods, so the manager
//! branches on capability presence instead of downcasting.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{BackendOptions, Config, ProxyConfig};
use crate::errors::{DaemonError, Result};

pub mod ssh;

pub use ssh::SshBackend;

/// Callback fired at most once per tracked process, only for exits that were
/// not requested through `stop`. Runs on the backend's reaper task; it must
/// enqueue work instead of re-entering the lifecycle manager.
pub type ExitHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Stop-capable handle to one live tunnel process.
pub trait RunningInstance: Send + Sync {
    fn stop(&self);
}

/// Lifecycle contract every tunneling backend implements.
pub trait TunnelBackend: Send + Sync {
    /// Attach backend-specific options to a proxy slot. Idempotent; called
    /// before every start.
    fn configure(&self, name: &str, options: BackendOptions) -> Result<()>;

    /// Launch the tunnel. On failure no state is retained for `name`.
    fn start(&self, name: &str, proxy: &ProxyConfig, config: &Config) -> Result<()>;

    /// Request termination. No-op when nothing is tracked under `name`.
    fn stop(&self, name: &str) -> Result<()>;

    /// Cheap, non-blocking introspection: `(pid, running)`.
    fn status(&self, name: &str) -> (u32, bool);

    /// Capability probe: a stop-capable handle for external tracking.
    fn instance(&self, _name: &str) -> Option<Arc<dyn RunningInstance>> {
        None
    }

    /// Capability probe: register the exit-notification callback. Returns
    /// `false` when the backend does not report exits.
    fn set_exit_handler(&self, _handler: ExitHandler) -> bool {
        false
    }
}

/// Name → backend table, built once and passed into the daemon root.
pub struct BackendRegistry {
    backends: HashMap<String, Arc<dyn TunnelBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
        }
    }

    /// Registry preloaded with the built-in backends.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(ssh::METHOD, Arc::new(SshBackend::new()));
        registry
    }

    /// Register a backend under a unique method name. Registering the same
    /// name twice is a programming error.
    pub fn register(&mut self, name: &str, backend: Arc<dyn TunnelBackend>) {
        let previous = self.backends.insert(name.to_string(), backend);
        assert!(
            previous.is_none(),
            "backend already registered: {name}"
        );
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn TunnelBackend>> {
        self.backends
            .get(name)
            .cloned()
            .ok_or_else(|| DaemonError::BackendNotFound(name.to_string()))
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}
