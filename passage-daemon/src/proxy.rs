//! Proxy lifecycle management.
//!
//! The manager serializes every start/stop transition through one
//! process-wide lock, owns the active-host map and the running-instance
//! handles, and recovers from unexpected tunnel exits via the restart
//! queue. Read-only accessors bypass the transition lock and may observe a
//! brief inconsistency window during a transition; status is advisory.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use passage_protocol::protocol::{InfoResponse, StatusResponse};

use crate::backend::{BackendRegistry, RunningInstance, TunnelBackend};
use crate::config::SharedConfig;
use crate::errors::{DaemonError, Result};

/// How long `stop_proxy` waits for the backend to report not-running.
const STOP_DEADLINE: Duration = Duration::from_secs(15);
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Queued notification that a tunnel exited without a stop request. Drained
/// by the restart task, which re-runs the stop/start sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyExitEvent {
    pub name: String,
}

pub struct ProxyManager {
    config: SharedConfig,
    registry: Arc<BackendRegistry>,
    /// Transition lock: held across the whole of start/stop.
    transition: tokio::sync::Mutex<()>,
    /// proxy name → host currently in use
    active_hosts: Mutex<HashMap<String, String>>,
    /// proxy name → stop-capable handle (backends with instance support)
    instances: Mutex<HashMap<String, Arc<dyn RunningInstance>>>,
    exit_tx: mpsc::Sender<ProxyExitEvent>,
}

impl ProxyManager {
    pub fn new(
        config: SharedConfig,
        registry: Arc<BackendRegistry>,
        exit_tx: mpsc::Sender<ProxyExitEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            registry,
            transition: tokio::sync::Mutex::new(()),
            active_hosts: Mutex::new(HashMap::new()),
            instances: Mutex::new(HashMap::new()),
            exit_tx,
        })
    }

    /// Start a proxy, trying the default host first and then the ordered
    /// fallback hosts. A proxy that is already running is a success.
    pub async fn start_proxy(&self, name: &str) -> Result<()> {
        let _transition = self.transition.lock().await;
        self.start_locked(name)
    }

    fn start_locked(&self, name: &str) -> Result<()> {
        let config = self.config.read().clone();
        let proxy = config.proxy(name)?.clone();
        if proxy.default.is_empty() {
            return Err(DaemonError::NoDefaultHost(name.to_string()));
        }

        // Idempotency probe through the host already in use, if any.
        let probe_host = self
            .active_hosts
            .lock()
            .get(name)
            .cloned()
            .unwrap_or_else(|| proxy.default.clone());
        let probe_backend = self.registry.get(config.host(&probe_host)?.backend_method())?;
        let (_, running) = probe_backend.status(name);
        if running {
            debug!("[proxy] '{name}' is already running");
            return Ok(());
        }

        // Host order: default first, then allowed without duplication.
        let mut try_hosts = vec![proxy.default.clone()];
        for host in &proxy.allowed {
            if !try_hosts.contains(host) {
                try_hosts.push(host.clone());
            }
        }

        let mut last_err: Option<DaemonError> = None;
        for host_name in try_hosts {
            let host = match config.host(&host_name) {
                Ok(host) => host,
                Err(e) => {
                    warn!("[proxy] Host '{host_name}' for proxy '{name}': {e}");
                    last_err = Some(e);
                    continue;
                }
            };
            if !host.allowed_proxies.is_empty()
                && !host.allowed_proxies.iter().any(|p| p == name)
            {
                warn!("[proxy] Host '{host_name}' does not allow proxy '{name}', skipping");
                continue;
            }
            let backend = match self.registry.get(host.backend_method()) {
                Ok(backend) => backend,
                Err(e) => {
                    warn!("[proxy] Host '{host_name}' for proxy '{name}': {e}");
                    last_err = Some(e);
                    continue;
                }
            };

            info!("[proxy] Trying host '{host_name}' for proxy '{name}'");

            if let Err(e) = backend.configure(name, config.merged_backend_options(host)) {
                warn!("[proxy] Configure failed on '{host_name}': {e}");
                last_err = Some(e);
                continue;
            }

            self.install_exit_handler(backend.as_ref());

            let mut attempt = proxy.clone();
            attempt.default = host_name.clone();

            // Record intent before the backend runs so racing status readers
            // observe the host being brought up.
            self.active_hosts
                .lock()
                .insert(name.to_string(), host_name.clone());

            match backend.start(name, &attempt, &config) {
                Ok(()) => {
                    if let Some(instance) = backend.instance(name) {
                        self.instances.lock().insert(name.to_string(), instance);
                    }
                    info!("[proxy] Proxy '{name}' successfully started via '{host_name}'");
                    return Ok(());
                }
                Err(e) => {
                    warn!("[proxy] Host '{host_name}' failed: {e}");
                    last_err = Some(e);
                }
            }
        }

        Err(DaemonError::AllHostsFailed {
            proxy: name.to_string(),
            last: last_err
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no usable hosts".to_string()),
        })
    }

    fn install_exit_handler(&self, backend: &dyn TunnelBackend) {
        let exit_tx = self.exit_tx.clone();
        backend.set_exit_handler(Arc::new(move |proxy_name: &str| {
            let event = ProxyExitEvent {
                name: proxy_name.to_string(),
            };
            if exit_tx.try_send(event).is_err() {
                error!("[proxy] Restart queue full, dropping exit event for '{proxy_name}'");
            }
        }));
    }

    /// Stop a proxy and wait for the backend to confirm termination. Missing
    /// the deadline downgrades to a warning; stop is advisory.
    pub async fn stop_proxy(&self, name: &str) -> Result<()> {
        let _transition = self.transition.lock().await;

        let config = self.config.read().clone();
        let proxy = config.proxy(name)?.clone();

        // Prefer the active host's backend; fall back to the default's.
        let host_name = self
            .active_hosts
            .lock()
            .get(name)
            .cloned()
            .unwrap_or_else(|| proxy.default.clone());
        let host = config.host(&host_name)?;
        let backend = self.registry.get(host.backend_method())?;

        self.active_hosts.lock().remove(name);
        self.instances.lock().remove(name);

        backend.stop(name)?;

        let deadline = tokio::time::Instant::now() + STOP_DEADLINE;
        loop {
            let (_, running) = backend.status(name);
            if !running {
                info!("[proxy] Proxy '{name}' stopped");
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    "[proxy] Proxy '{name}' still reported running after {}s, giving up on confirmation",
                    STOP_DEADLINE.as_secs()
                );
                return Ok(());
            }
            tokio::time::sleep(STOP_POLL_INTERVAL).await;
        }
    }

    /// Runtime status for one proxy. Lock-free; may race a transition.
    pub fn status(&self, name: &str) -> Result<StatusResponse> {
        let config = self.config.read();
        let proxy = config.proxy(name)?;
        let host = config.host(&proxy.default)?;
        let backend_name = host.backend_method().to_string();
        let backend = self.registry.get(&backend_name)?;
        let (pid, running) = backend.status(name);

        Ok(StatusResponse {
            name: name.to_string(),
            backend: backend_name,
            running,
            pid,
            active_host: self.active_host(name).unwrap_or_default(),
        })
    }

    /// Status plus the static attributes of the default host.
    pub fn info(&self, name: &str) -> Result<InfoResponse> {
        let config = self.config.read();
        let proxy = config.proxy(name)?;
        let host = config.host(&proxy.default)?;
        let backend_name = host.backend_method().to_string();
        let backend = self.registry.get(&backend_name)?;
        let (pid, running) = backend.status(name);

        Ok(InfoResponse {
            name: name.to_string(),
            backend: backend_name,
            running,
            pid,
            active_host: self.active_host(name).unwrap_or_default(),
            host: host.address.clone(),
            port: host.port,
            login: host.login.clone(),
        })
    }

    pub fn active_host(&self, name: &str) -> Option<String> {
        self.active_hosts.lock().get(name).cloned()
    }

    /// Start every proxy marked `autostart: true`. Failures are logged and
    /// do not abort the sweep.
    pub async fn start_autostart(&self) {
        let autostart: Vec<String> = {
            let config = self.config.read();
            config
                .proxies
                .proxies
                .iter()
                .filter(|(_, proxy)| proxy.autostart)
                .map(|(name, _)| name.clone())
                .collect()
        };

        for name in autostart {
            info!("[proxy] Autostart enabled for '{name}'");
            if let Err(e) = self.start_proxy(&name).await {
                error!("[proxy] Failed to start '{name}': {e}");
            }
        }
    }

    /// Shutdown sweep: request termination of every tracked tunnel. Does not
    /// wait for confirmation; the daemon exits right after.
    pub async fn stop_all(&self) {
        let _transition = self.transition.lock().await;

        let names: Vec<String> = self.instances.lock().keys().cloned().collect();
        let config = self.config.read().clone();

        for name in names {
            let backend = config
                .proxy(&name)
                .and_then(|proxy| config.host(&proxy.default))
                .and_then(|host| self.registry.get(host.backend_method()));
            match backend {
                Ok(backend) => {
                    if let Err(e) = backend.stop(&name) {
                        warn!("[proxy] Failed to stop '{name}' during shutdown: {e}");
                    }
                }
                Err(e) => warn!("[proxy] Cannot resolve backend for '{name}' during shutdown: {e}"),
            }
        }

        self.instances.lock().clear();
        self.active_hosts.lock().clear();
    }

    /// Drain the restart queue: every unexpected exit triggers an
    /// unconditional stop/start cycle for that proxy.
    pub fn spawn_restart_task(
        self: &Arc<Self>,
        mut exit_rx: mpsc::Receiver<ProxyExitEvent>,
    ) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = exit_rx.recv().await {
                info!("[proxy] Unexpected exit of '{}', restarting", event.name);
                if let Err(e) = manager.stop_proxy(&event.name).await {
                    warn!("[proxy] Cleanup before restart of '{}' failed: {e}", event.name);
                }
                if let Err(e) = manager.start_proxy(&event.name).await {
                    error!("[proxy] Restart of '{}' failed: {e}", event.name);
                }
            }
        })
    }
}
