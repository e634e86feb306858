//! Client side of the control protocol.
//!
//! A [`Client`] holds one connection to a control instance and may issue any
//! number of sequential request/response pairs over it. Credentials are
//! attached per request.

use std::path::{Path, PathBuf};

use tokio::io::BufReader;
use tokio::net::{TcpStream, UnixStream};

use crate::codec::{read_response, write_frame};
use crate::errors::ClientError;
use crate::protocol::{
    Auth, Payload, Request, Response, ResolveRequest, SetActiveRequest, StartRequest,
    StatusRequest, StopRequest,
};

pub type Result<T> = std::result::Result<T, ClientError>;

/// Where a control instance listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Unix(PathBuf),
    Tcp(String),
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Endpoint::Unix(path) => write!(f, "unix:{}", path.display()),
            Endpoint::Tcp(addr) => write!(f, "tcp:{addr}"),
        }
    }
}

enum Stream {
    Unix(BufReader<UnixStream>),
    Tcp(BufReader<TcpStream>),
}

pub struct Client {
    stream: Stream,
    auth: Option<Auth>,
}

impl Client {
    /// Connect to a control endpoint.
    pub async fn connect(endpoint: &Endpoint) -> Result<Self> {
        let stream = match endpoint {
            Endpoint::Unix(path) => {
                let s = UnixStream::connect(path)
                    .await
                    .map_err(|e| ClientError::Connect {
                        endpoint: endpoint.to_string(),
                        source: e,
                    })?;
                Stream::Unix(BufReader::new(s))
            }
            Endpoint::Tcp(addr) => {
                let s = TcpStream::connect(addr)
                    .await
                    .map_err(|e| ClientError::Connect {
                        endpoint: endpoint.to_string(),
                        source: e,
                    })?;
                Stream::Tcp(BufReader::new(s))
            }
        };
        Ok(Self { stream, auth: None })
    }

    /// Attach credentials to every subsequent request.
    pub fn with_auth(mut self, auth: Option<Auth>) -> Self {
        self.auth = auth;
        self
    }

    /// Replace the credentials used for subsequent requests on this
    /// connection.
    pub fn set_auth(&mut self, auth: Option<Auth>) {
        self.auth = auth;
    }

    /// Check whether a daemon is answering on the given socket path.
    pub async fn is_daemon_running(socket_path: &Path) -> bool {
        if !socket_path.exists() {
            return false;
        }
        match Self::connect(&Endpoint::Unix(socket_path.to_path_buf())).await {
            Ok(mut client) => matches!(client.ping().await, Ok(resp) if resp.is_ok()),
            Err(_) => false,
        }
    }

    /// Send one payload and wait for the matching response.
    pub async fn send(&mut self, payload: Payload) -> Result<Response> {
        let command = payload.command();
        let request = Request::with_auth(payload, self.auth.clone());

        let written = match &mut self.stream {
            Stream::Unix(s) => write_frame(s, &request).await,
            Stream::Tcp(s) => write_frame(s, &request).await,
        };
        written.map_err(|e| match e {
            crate::errors::ProtocolError::Io(source) => ClientError::Send { command, source },
            other => ClientError::Protocol(other),
        })?;

        match &mut self.stream {
            Stream::Unix(s) => read_response(s).await,
            Stream::Tcp(s) => read_response(s).await,
        }
        .map_err(|e| ClientError::Receive { command, source: e })?
        .ok_or(ClientError::Disconnected)
    }

    pub async fn start(&mut self, name: impl Into<String>) -> Result<Response> {
        self.send(Payload::Start(StartRequest { name: name.into() }))
            .await
    }

    pub async fn stop(&mut self, name: impl Into<String>) -> Result<Response> {
        self.send(Payload::Stop(StopRequest { name: name.into() }))
            .await
    }

    pub async fn status(&mut self, name: impl Into<String>) -> Result<Response> {
        self.send(Payload::Status(StatusRequest { name: name.into() }))
            .await
    }

    pub async fn info(&mut self, name: impl Into<String>) -> Result<Response> {
        self.send(Payload::Info(crate::protocol::InfoRequest {
            name: name.into(),
        }))
        .await
    }

    pub async fn list(&mut self) -> Result<Response> {
        self.send(Payload::List).await
    }

    pub async fn set_active(
        &mut self,
        name: impl Into<String>,
        host: impl Into<String>,
    ) -> Result<Response> {
        self.send(Payload::SetActive(SetActiveRequest {
            name: name.into(),
            host: host.into(),
        }))
        .await
    }

    pub async fn resolve(&mut self, alias: impl Into<String>) -> Result<Response> {
        self.send(Payload::Resolve(ResolveRequest {
            alias: alias.into(),
        }))
        .await
    }

    pub async fn ping(&mut self) -> Result<Response> {
        self.send(Payload::Ping).await
    }
}
