use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::errors::ProtocolError;

/// Maximum frame size for one request or response line. The control protocol
/// carries small command objects only, so anything larger is a broken or
/// hostile peer.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Line delimiter for the newline-delimited JSON framing.
pub const FRAME_DELIMITER: u8 = b'\n';

/// Every command string the protocol knows. Servers use this to tell an
/// unknown command apart from a malformed frame.
pub const COMMANDS: &[&str] = &[
    "proxy.start",
    "proxy.stop",
    "proxy.status",
    "proxy.list",
    "proxy.info",
    "proxy.setactive",
    "proxy.resolve",
    "system.ping",
];

/// Credentials presented by a client. Optional on every request; evaluated
/// per request, never per connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Auth {
    pub user: String,
    pub token: String,
}

/// Request sent from a client to the daemon.
///
/// The command payload is decoded eagerly while reading the frame: the
/// `type` key selects the variant and `data` carries the per-command
/// payload, so handlers never see raw JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<Auth>,
    #[serde(flatten)]
    pub payload: Payload,
}

impl Request {
    pub fn new(payload: Payload) -> Self {
        Self {
            auth: None,
            payload,
        }
    }

    pub fn with_auth(payload: Payload, auth: Option<Auth>) -> Self {
        Self { auth, payload }
    }
}

/// Command payload, keyed on the wire-visible `type` string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Payload {
    #[serde(rename = "proxy.start")]
    Start(StartRequest),
    #[serde(rename = "proxy.stop")]
    Stop(StopRequest),
    #[serde(rename = "proxy.status")]
    Status(StatusRequest),
    #[serde(rename = "proxy.list")]
    List,
    #[serde(rename = "proxy.info")]
    Info(InfoRequest),
    #[serde(rename = "proxy.setactive")]
    SetActive(SetActiveRequest),
    #[serde(rename = "proxy.resolve")]
    Resolve(ResolveRequest),
    #[serde(rename = "system.ping")]
    Ping,
}

impl Payload {
    /// The wire command string for this payload (for logging and error
    /// reporting).
    pub fn command(&self) -> &'static str {
        match self {
            Payload::Start(_) => "proxy.start",
            Payload::Stop(_) => "proxy.stop",
            Payload::Status(_) => "proxy.status",
            Payload::List => "proxy.list",
            Payload::Info(_) => "proxy.info",
            Payload::SetActive(_) => "proxy.setactive",
            Payload::Resolve(_) => "proxy.resolve",
            Payload::Ping => "system.ping",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartRequest {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopRequest {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRequest {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfoRequest {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetActiveRequest {
    pub name: String,
    pub host: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveRequest {
    pub alias: String,
}

/// Response status discriminator. Always present on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Error,
}

/// Response sent from the daemon to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    /// A bare success response.
    pub fn ok() -> Self {
        Response {
            status: Status::Ok,
            data: None,
            error: None,
        }
    }

    /// A success response carrying a result payload.
    pub fn ok_with_data<T: Serialize>(data: T) -> Self {
        match serde_json::to_value(data) {
            Ok(value) => Response {
                status: Status::Ok,
                data: Some(value),
                error: None,
            },
            Err(e) => Response::error(format!("response encoding failed: {e}")),
        }
    }

    /// An error response with a message.
    pub fn error(msg: impl Into<String>) -> Self {
        Response {
            status: Status::Error,
            data: None,
            error: Some(msg.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }

    /// Decode the `data` payload into a concrete response type.
    pub fn decode_data<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        let value = self.data.clone().unwrap_or(serde_json::Value::Null);
        serde_json::from_value(value).map_err(ProtocolError::Decode)
    }
}

/// Runtime status of one proxy. `pid` is 0 and `active_host` is empty while
/// the proxy is not running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub name: String,
    pub backend: String,
    pub running: bool,
    pub pid: u32,
    pub active_host: String,
}

/// Status plus the static attributes of the currently selected host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfoResponse {
    pub name: String,
    pub backend: String,
    pub running: bool,
    pub pid: u32,
    pub active_host: String,
    pub host: String,
    pub port: u16,
    pub login: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListResponse {
    pub proxies: Vec<String>,
}

/// The local SOCKS listener address for a resolved proxy alias.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveResponse {
    pub host: String,
    pub port: u16,
}

#[cfg(test)]
mod tests;
