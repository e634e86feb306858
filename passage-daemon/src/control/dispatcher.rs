//! Central registry mapping command strings to their handlers.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use passage_protocol::protocol::{Request, Response};

pub type HandlerFuture = Pin<Box<dyn Future<Output = Response> + Send>>;

/// A command handler. Must be safe to invoke concurrently; handlers
/// serialize through the lifecycle manager's lock as needed.
pub type Handler = Arc<dyn Fn(Request) -> HandlerFuture + Send + Sync>;

/// Built once at daemon start, read-only afterwards.
pub struct Dispatcher {
    handlers: HashMap<&'static str, Handler>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Bind a command string to a handler.
    pub fn register(&mut self, command: &'static str, handler: Handler) {
        self.handlers.insert(command, handler);
    }

    /// Execute the handler for a request.
    pub async fn dispatch(&self, request: Request) -> Response {
        match self.handlers.get(request.payload.command()) {
            Some(handler) => handler(request).await,
            None => Response::error("unknown command"),
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}
