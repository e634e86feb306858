use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::Duration;

use tokio::sync::mpsc;

use super::*;
use crate::config::Config;

fn test_config(stub: Option<&Path>) -> Config {
    let stub_section = match stub {
        Some(path) => format!(
            r#"
    config:
      sshpass_binary: {}
"#,
            path.display()
        ),
        None => String::new(),
    };
    let yaml = format!(
        r#"
logins:
  ops:
    user: tunnel
    password: hunter2
hosts:
  h1:
    address: 10.0.0.1
    port: 2222
    login: ops{stub_section}
proxies:
  bind: 127.0.0.1
  p1:
    port: 1080
    default: h1
"#
    );
    Config::parse(&yaml, Path::new("ssh-test.yaml")).unwrap()
}

/// Write an executable stand-in for sshpass that just sleeps.
fn write_stub(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("fake-sshpass");
    std::fs::write(&path, "#!/bin/sh\nexec sleep 30\n").unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

async fn wait_until(mut probe: impl FnMut() -> bool, deadline: Duration) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < deadline {
        if probe() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    probe()
}

#[test]
fn argv_uses_defaults() {
    let config = test_config(None);
    let proxy = config.proxy("p1").unwrap();
    let argv = build_argv("p1", proxy, &config, &BackendOptions::new()).unwrap();

    assert_eq!(
        argv,
        vec![
            "sshpass",
            "-p",
            "hunter2",
            "ssh",
            "-N",
            "-oStrictHostKeyChecking=no",
            "-oUserKnownHostsFile=/dev/null",
            "-oConnectTimeout=5",
            "-p",
            "2222",
            "-D",
            "127.0.0.1:1080",
            "tunnel@10.0.0.1",
        ]
    );
}

#[test]
fn argv_honors_options_and_additional_flags() {
    let config = test_config(None);
    let proxy = config.proxy("p1").unwrap();
    let mut options = BackendOptions::new();
    options.insert(
        "connect_timeout".into(),
        serde_yaml::Value::Number(10.into()),
    );
    options.insert(
        "ssh_binary".into(),
        serde_yaml::Value::String("/opt/ssh".into()),
    );
    options.insert(
        "sshpass_binary".into(),
        serde_yaml::Value::String("/opt/sshpass".into()),
    );
    options.insert(
        "additional_flags".into(),
        serde_yaml::Value::Sequence(vec![
            serde_yaml::Value::String("-oCompression=yes".into()),
            serde_yaml::Value::Number(9.into()),
        ]),
    );

    let argv = build_argv("p1", proxy, &config, &options).unwrap();
    assert_eq!(argv[0], "/opt/sshpass");
    assert_eq!(argv[3], "/opt/ssh");
    assert!(argv.contains(&"-oConnectTimeout=10".to_string()));
    // trailing raw flags, non-strings dropped
    assert_eq!(argv.last().unwrap().as_str(), "-oCompression=yes");
    assert!(!argv.contains(&"9".to_string()));
}

#[test]
fn argv_fails_for_missing_host() {
    let mut config = test_config(None);
    let mut proxy = config.proxy("p1").unwrap().clone();
    proxy.default = "ghost".into();
    config.hosts.clear();
    let err = build_argv("p1", &proxy, &config, &BackendOptions::new()).unwrap_err();
    assert!(matches!(err, DaemonError::HostNotFound(_)));
}

#[tokio::test]
async fn start_status_stop_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let stub = write_stub(dir.path());
    let config = test_config(Some(&stub));
    let proxy = config.proxy("p1").unwrap().clone();

    let backend = SshBackend::new();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    backend.set_exit_handler(Arc::new(move |name| {
        let _ = tx.send(name.to_string());
    }));

    backend
        .configure("p1", config.merged_backend_options(&config.hosts["h1"]))
        .unwrap();
    backend.start("p1", &proxy, &config).unwrap();

    let (pid, running) = backend.status("p1");
    assert!(running);
    assert!(pid > 0);
    assert!(backend.instance("p1").is_some());

    backend.stop("p1").unwrap();
    assert!(
        wait_until(|| !backend.status("p1").1, Duration::from_secs(5)).await,
        "tunnel did not stop"
    );

    // Requested stop: the exit handler must stay silent.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn unexpected_exit_fires_handler() {
    let dir = tempfile::tempdir().unwrap();
    let stub = write_stub(dir.path());
    let config = test_config(Some(&stub));
    let proxy = config.proxy("p1").unwrap().clone();

    let backend = SshBackend::new();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    backend.set_exit_handler(Arc::new(move |name| {
        let _ = tx.send(name.to_string());
    }));

    backend
        .configure("p1", config.merged_backend_options(&config.hosts["h1"]))
        .unwrap();
    backend.start("p1", &proxy, &config).unwrap();
    let (pid, running) = backend.status("p1");
    assert!(running);

    // Kill the tunnel out from under the backend.
    killpg(Pid::from_raw(pid as i32), Signal::SIGKILL).unwrap();

    let exited = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("exit handler not invoked")
        .unwrap();
    assert_eq!(exited, "p1");
    assert!(!backend.status("p1").1);
}

#[tokio::test]
async fn stop_without_process_is_a_noop() {
    let backend = SshBackend::new();
    assert!(backend.stop("nothing").is_ok());
    assert_eq!(backend.status("nothing"), (0, false));
    assert!(backend.instance("nothing").is_none());
}

#[tokio::test]
async fn spawn_failure_retains_no_state() {
    let config = test_config(Some(Path::new("/nonexistent/sshpass")));
    let proxy = config.proxy("p1").unwrap().clone();

    let backend = SshBackend::new();
    backend
        .configure("p1", config.merged_backend_options(&config.hosts["h1"]))
        .unwrap();
    let err = backend.start("p1", &proxy, &config).unwrap_err();
    assert!(matches!(err, DaemonError::TunnelSpawn { .. }));
    assert_eq!(backend.status("p1"), (0, false));
}
