//! In-process daemon harness.
//!
//! Builds the full daemon wiring — config, ACL engine, backend registry
//! with the scripted backend, lifecycle manager, restart task and control
//! servers — without spawning the `passaged` binary. Control servers listen
//! on a unix socket inside a scratch directory (plus an ephemeral TCP port
//! when requested), and tests talk to them through the real protocol
//! client.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;
use tokio::sync::mpsc;

use passage_daemon::acl::{AclEngine, PERMISSIONS};
use passage_daemon::backend::BackendRegistry;
use passage_daemon::config::{new_shared_config, Config, SharedConfig};
use passage_daemon::control::{build_dispatcher, ControlServer, HandlerContext};
use passage_daemon::proxy::{ProxyExitEvent, ProxyManager};
use passage_protocol::client::{Client, Endpoint};
use passage_protocol::protocol::Auth;

use super::scripted_backend::{ScriptedBackend, METHOD};

/// Placeholder in config templates replaced by the harness socket path.
pub const SOCKET_PLACEHOLDER: &str = "__SOCKET__";

pub struct TestHarness {
    pub config: SharedConfig,
    pub manager: Arc<ProxyManager>,
    pub backend: Arc<ScriptedBackend>,
    pub acl: Arc<AclEngine>,
    pub socket_path: PathBuf,
    pub tcp_addr: Option<SocketAddr>,
    _scratch: TempDir,
}

impl TestHarness {
    /// Bring up the daemon wiring from a config template. Occurrences of
    /// `__SOCKET__` are replaced with a scratch socket path first.
    pub async fn new(template: &str) -> TestHarness {
        let scratch = TempDir::new().expect("scratch dir");
        let socket_path = scratch.path().join("passaged.sock");
        let yaml = template.replace(SOCKET_PLACEHOLDER, &socket_path.to_string_lossy());

        let config = Config::parse(&yaml, &scratch.path().join("passaged.yaml"))
            .expect("harness config must parse");

        let backend = ScriptedBackend::new();
        let mut registry = BackendRegistry::new();
        registry.register(METHOD, Arc::clone(&backend) as Arc<dyn passage_daemon::backend::TunnelBackend>);

        let acl = Arc::new(AclEngine::new(&config.acl, PERMISSIONS).expect("acl init"));
        let shared = new_shared_config(config);

        let (exit_tx, exit_rx) = mpsc::channel::<ProxyExitEvent>(64);
        let manager = ProxyManager::new(Arc::clone(&shared), Arc::new(registry), exit_tx);
        manager.spawn_restart_task(exit_rx);

        let ctx = Arc::new(HandlerContext {
            config: Arc::clone(&shared),
            acl: Arc::clone(&acl),
            manager: Arc::clone(&manager),
        });
        let dispatcher = Arc::new(build_dispatcher(ctx));

        let instances: Vec<_> = shared
            .read()
            .control
            .instances
            .iter()
            .filter(|instance| instance.enabled)
            .cloned()
            .collect();

        let mut tcp_addr = None;
        for instance in instances {
            let server = ControlServer::bind(instance, Arc::clone(&dispatcher), Arc::clone(&acl))
                .await
                .expect("control bind");
            if let Some(addr) = server.local_addr() {
                tcp_addr = Some(addr);
            }
            tokio::spawn(server.run());
        }

        TestHarness {
            config: shared,
            manager,
            backend,
            acl,
            socket_path,
            tcp_addr,
            _scratch: scratch,
        }
    }

    /// Connect to the unix control instance.
    pub async fn client(&self) -> Client {
        Client::connect(&Endpoint::Unix(self.socket_path.clone()))
            .await
            .expect("connect to harness socket")
    }

    /// Connect with credentials attached to every request.
    pub async fn client_as(&self, user: &str, token: &str) -> Client {
        self.client().await.with_auth(Some(Auth {
            user: user.into(),
            token: token.into(),
        }))
    }

    /// Connect to the tcp control instance, when one is configured.
    pub async fn tcp_client(&self) -> Client {
        let addr = self.tcp_addr.expect("no tcp instance configured");
        Client::connect(&Endpoint::Tcp(addr.to_string()))
            .await
            .expect("connect to harness tcp listener")
    }
}

/// Config template: one unix instance without auth, ACL disabled, two hosts
/// and two proxies on the scripted backend.
pub fn open_config() -> String {
    format!(
        r#"
logins:
  ops: {{user: tunnel, password: hunter2}}
hosts:
  h1: {{address: 10.0.0.1, port: 22, login: ops, backend: {METHOD}}}
  h2: {{address: 10.0.0.2, port: 22, login: ops, backend: {METHOD}}}
proxies:
  bind: 127.0.0.1
  p1:
    port: 1080
    default: h1
    allowed: [h2]
  p2:
    port: 1081
    default: h2
control:
  instances:
    - name: local
      mode: unix
      listen: {SOCKET_PLACEHOLDER}
acl:
  enabled: false
"#
    )
}

/// Config template: unix instance with auth required, ACL enabled, and the
/// deny-beats-allow rule set on `p1`.
pub fn authed_config() -> String {
    format!(
        r#"
logins:
  ops: {{user: tunnel, password: hunter2}}
hosts:
  h1: {{address: 10.0.0.1, port: 22, login: ops, backend: {METHOD}}}
  h2: {{address: 10.0.0.2, port: 22, login: ops, backend: {METHOD}}}
proxies:
  bind: 127.0.0.1
  p1:
    port: 1080
    default: h1
    allowed: [h2]
    acls:
      rules:
        - description: admins may manage
          subjects: [admins]
        - description: alice is locked out of start
          subjects: [alice]
          permissions: [proxy_start]
          deny: true
  p2:
    port: 1081
    default: h1
control:
  instances:
    - name: local
      mode: unix
      listen: {SOCKET_PLACEHOLDER}
      auth: true
acl:
  enabled: true
  users:
    alice: {{roles: [], token: T}}
    bob: {{roles: [operator], token: B}}
  groups:
    admins: {{members: [alice], roles: [admin]}}
  roles:
    admin:
      permissions: [proxy_start, proxy_stop, proxy_status, proxy_info, proxy_setactive]
    operator:
      permissions: [proxy_start, proxy_stop, proxy_status, proxy_list, proxy_resolve]
"#
    )
}
