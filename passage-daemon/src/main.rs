//! The passage daemon.
//!
//! Loads the configuration, brings up the ACL engine and the backend
//! registry, starts one control server per enabled instance, runs the
//! autostart sweep and then waits for SIGINT/SIGTERM. On shutdown every
//! tracked tunnel gets a stop request before the process exits.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::sync::mpsc;
use tracing::{info, warn};

use passage_daemon::acl::{AclEngine, PERMISSIONS};
use passage_daemon::backend::BackendRegistry;
use passage_daemon::config::{new_shared_config, Config};
use passage_daemon::control::{build_dispatcher, ControlServer, HandlerContext};
use passage_daemon::logging;
use passage_daemon::proxy::{ProxyExitEvent, ProxyManager};

fn parse_args() -> Result<Option<PathBuf>> {
    let mut args = std::env::args().skip(1);
    let mut config_path = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => match args.next() {
                Some(path) => config_path = Some(PathBuf::from(path)),
                None => bail!("--config requires a path"),
            },
            "--help" | "-h" => {
                println!("usage: passaged [--config <path>]");
                std::process::exit(0);
            }
            other => bail!("unknown argument: {other}"),
        }
    }
    Ok(config_path)
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = Config::resolve_path(parse_args()?)?;
    let config = Config::load(&config_path)?;

    logging::init(&config.log)?;
    info!("[passaged] Configuration loaded from {}", config_path.display());

    let acl = Arc::new(
        AclEngine::new(&config.acl, PERMISSIONS).context("ACL initialization failed")?,
    );
    let registry = Arc::new(BackendRegistry::builtin());

    let (exit_tx, exit_rx) = mpsc::channel::<ProxyExitEvent>(64);
    let shared_config = new_shared_config(config);
    let manager = ProxyManager::new(Arc::clone(&shared_config), registry, exit_tx);
    let _restart_task = manager.spawn_restart_task(exit_rx);

    let ctx = Arc::new(HandlerContext {
        config: Arc::clone(&shared_config),
        acl: Arc::clone(&acl),
        manager: Arc::clone(&manager),
    });
    let dispatcher = Arc::new(build_dispatcher(ctx));

    let instances: Vec<_> = shared_config
        .read()
        .control
        .instances
        .iter()
        .filter(|instance| instance.enabled)
        .cloned()
        .collect();
    if instances.is_empty() {
        warn!("[passaged] No enabled control instances configured");
    }

    for instance in instances {
        let server = ControlServer::bind(instance, Arc::clone(&dispatcher), Arc::clone(&acl))
            .await
            .context("control listener failed")?;
        tokio::spawn(server.run());
    }

    manager.start_autostart().await;

    info!("[passaged] Daemon is running, waiting for control events");
    wait_for_shutdown_signal().await?;

    info!("[passaged] Termination signal received, stopping proxies");
    manager.stop_all().await;

    info!("[passaged] Shutdown complete");
    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = interrupt.recv() => {}
        _ = terminate.recv() => {}
    }
    Ok(())
}
