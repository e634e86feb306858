//! Control listeners.
//!
//! One server per enabled control instance, each either a unix stream
//! socket (stale socket files removed before bind) or a TCP listener. Every
//! accepted connection runs in its own task and serves request/response
//! pairs until EOF or a decode error. Authentication is per request and
//! recoverable: a failed request leaves the connection open.

#[cfg(not(unix))]
compile_error!("the passage control plane requires a unix target");

use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::{TcpListener, UnixListener};
use tracing::{debug, error, info};

use passage_protocol::codec::{read_frame, write_frame};
use passage_protocol::protocol::{Request, Response, COMMANDS};

use crate::acl::AclEngine;
use crate::config::{ControlInstance, ControlMode};
use crate::control::dispatcher::Dispatcher;
use crate::errors::{DaemonError, Result};

enum Listener {
    Unix(UnixListener),
    Tcp(TcpListener),
}

pub struct ControlServer {
    instance: Arc<ControlInstance>,
    listener: Listener,
    dispatcher: Arc<Dispatcher>,
    acl: Arc<AclEngine>,
}

impl ControlServer {
    /// Bind the listener for one instance. Bind failures are fatal at
    /// daemon startup.
    pub async fn bind(
        instance: ControlInstance,
        dispatcher: Arc<Dispatcher>,
        acl: Arc<AclEngine>,
    ) -> Result<Self> {
        let listener = match instance.mode {
            ControlMode::Unix => {
                let socket_path = PathBuf::from(&instance.listen);
                match std::fs::remove_file(&socket_path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => {
                        return Err(DaemonError::StaleSocket {
                            socket_path,
                            source: e,
                        })
                    }
                }
                let listener =
                    UnixListener::bind(&socket_path).map_err(|e| DaemonError::ControlBind {
                        instance: instance.name.clone(),
                        listen: instance.listen.clone(),
                        source: e,
                    })?;
                info!(
                    "[control] Instance '{}' listening on unix socket {}",
                    instance.name, instance.listen
                );
                Listener::Unix(listener)
            }
            ControlMode::Tcp => {
                let listener = TcpListener::bind(&instance.listen).await.map_err(|e| {
                    DaemonError::ControlBind {
                        instance: instance.name.clone(),
                        listen: instance.listen.clone(),
                        source: e,
                    }
                })?;
                info!(
                    "[control] Instance '{}' listening on tcp {}",
                    instance.name, instance.listen
                );
                Listener::Tcp(listener)
            }
        };

        Ok(Self {
            instance: Arc::new(instance),
            listener,
            dispatcher,
            acl,
        })
    }

    /// Local address of a tcp listener, once bound. `None` for unix
    /// instances.
    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        match &self.listener {
            Listener::Tcp(listener) => listener.local_addr().ok(),
            Listener::Unix(_) => None,
        }
    }

    /// Accept connections until the daemon exits. Accept errors are logged
    /// and the loop continues.
    pub async fn run(self) {
        let ControlServer {
            instance,
            listener,
            dispatcher,
            acl,
        } = self;

        match listener {
            Listener::Unix(listener) => loop {
                match listener.accept().await {
                    Ok((stream, _)) => {
                        spawn_connection(stream, &instance, &dispatcher, &acl);
                    }
                    Err(e) => {
                        error!("[control] Accept error on instance '{}': {e}", instance.name)
                    }
                }
            },
            Listener::Tcp(listener) => loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        debug!(
                            "[control] Connection from {peer} on instance '{}'",
                            instance.name
                        );
                        spawn_connection(stream, &instance, &dispatcher, &acl);
                    }
                    Err(e) => {
                        error!("[control] Accept error on instance '{}': {e}", instance.name)
                    }
                }
            },
        }
    }
}

fn spawn_connection<S>(
    stream: S,
    instance: &Arc<ControlInstance>,
    dispatcher: &Arc<Dispatcher>,
    acl: &Arc<AclEngine>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let instance = Arc::clone(instance);
    let dispatcher = Arc::clone(dispatcher);
    let acl = Arc::clone(acl);
    tokio::spawn(async move {
        handle_connection(stream, instance, dispatcher, acl).await;
    });
}

/// Serve one connection: read framed requests until EOF or a decode error,
/// writing responses in arrival order.
pub(crate) async fn handle_connection<S>(
    stream: S,
    instance: Arc<ControlInstance>,
    dispatcher: Arc<Dispatcher>,
    acl: Arc<AclEngine>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut stream = BufReader::new(stream);

    loop {
        let frame = match read_frame(&mut stream).await {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => {
                debug!(
                    "[control] Read error on instance '{}': {e}",
                    instance.name
                );
                break;
            }
        };

        let request: Request = match serde_json::from_slice(&frame) {
            Ok(request) => request,
            Err(e) => {
                if let Some(command) = unrecognized_command(&frame) {
                    debug!("[control] Unknown command '{command}'");
                    if write_frame(&mut stream, &Response::error("unknown command"))
                        .await
                        .is_err()
                    {
                        break;
                    }
                    continue;
                }
                // Malformed frame: answer once, then drop the connection.
                let _ = write_frame(&mut stream, &Response::error(format!("invalid request: {e}")))
                    .await;
                break;
            }
        };

        if instance.auth && !acl.authenticate(request.auth.as_ref()) {
            if write_frame(&mut stream, &Response::error("invalid credentials"))
                .await
                .is_err()
            {
                break;
            }
            continue;
        }

        let response = dispatcher.dispatch(request).await;
        if let Err(e) = write_frame(&mut stream, &response).await {
            debug!(
                "[control] Write error on instance '{}': {e}",
                instance.name
            );
            break;
        }
    }
}

/// A syntactically valid envelope whose `type` is not a known command.
fn unrecognized_command(frame: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(frame).ok()?;
    let command = value.get("type")?.as_str()?;
    if COMMANDS.contains(&command) {
        None
    } else {
        Some(command.to_string())
    }
}
