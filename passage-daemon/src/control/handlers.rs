//! Command handlers binding the ACL engine, the config and the lifecycle
//! manager. Every handler follows the same sequence: extract the principal,
//! look up the proxy, check the per-command permission against the proxy's
//! rule set, run the operation, respond. Backend errors go to the client
//! verbatim; lookup and authorization failures use the stable wire strings.

use std::sync::Arc;

use tracing::debug;

use passage_protocol::protocol::{ListResponse, Payload, Request, ResolveResponse, Response};

use crate::acl::{AclEngine, ANONYMOUS};
use crate::config::{AclRuleSet, SharedConfig};
use crate::control::dispatcher::{Dispatcher, Handler, HandlerFuture};
use crate::proxy::ProxyManager;

pub struct HandlerContext {
    pub config: SharedConfig,
    pub acl: Arc<AclEngine>,
    pub manager: Arc<ProxyManager>,
}

/// The request principal: the authenticated user, or the synthetic
/// anonymous principal when no auth block was sent.
fn principal(request: &Request) -> String {
    request
        .auth
        .as_ref()
        .map(|auth| auth.user.clone())
        .unwrap_or_else(|| ANONYMOUS.to_string())
}

/// Build the full command table.
pub fn build_dispatcher(ctx: Arc<HandlerContext>) -> Dispatcher {
    let mut dispatcher = Dispatcher::new();
    dispatcher.register("proxy.start", start_handler(Arc::clone(&ctx)));
    dispatcher.register("proxy.stop", stop_handler(Arc::clone(&ctx)));
    dispatcher.register("proxy.status", status_handler(Arc::clone(&ctx)));
    dispatcher.register("proxy.list", list_handler(Arc::clone(&ctx)));
    dispatcher.register("proxy.info", info_handler(Arc::clone(&ctx)));
    dispatcher.register("proxy.setactive", set_active_handler(Arc::clone(&ctx)));
    dispatcher.register("proxy.resolve", resolve_handler(Arc::clone(&ctx)));
    dispatcher.register("system.ping", ping_handler());
    dispatcher
}

/// Fetch the rule set of a proxy, or the stable "unknown proxy" error.
fn proxy_acls(ctx: &HandlerContext, name: &str) -> Result<AclRuleSet, Response> {
    let config = ctx.config.read();
    match config.proxies.proxies.get(name) {
        Some(proxy) => Ok(proxy.acls.clone()),
        None => Err(Response::error("unknown proxy")),
    }
}

fn start_handler(ctx: Arc<HandlerContext>) -> Handler {
    Arc::new(move |request: Request| -> HandlerFuture {
        let ctx = Arc::clone(&ctx);
        Box::pin(async move {
            let user = principal(&request);
            let Payload::Start(payload) = request.payload else {
                return Response::error("invalid payload");
            };
            let acls = match proxy_acls(&ctx, &payload.name) {
                Ok(acls) => acls,
                Err(resp) => return resp,
            };
            if !ctx.acl.can(&user, "proxy_start", &acls) {
                return Response::error("not allowed");
            }
            match ctx.manager.start_proxy(&payload.name).await {
                Ok(()) => Response::ok(),
                Err(e) => Response::error(e.to_string()),
            }
        })
    })
}

fn stop_handler(ctx: Arc<HandlerContext>) -> Handler {
    Arc::new(move |request: Request| -> HandlerFuture {
        let ctx = Arc::clone(&ctx);
        Box::pin(async move {
            let user = principal(&request);
            let Payload::Stop(payload) = request.payload else {
                return Response::error("invalid payload");
            };
            let acls = match proxy_acls(&ctx, &payload.name) {
                Ok(acls) => acls,
                Err(resp) => return resp,
            };
            if !ctx.acl.can(&user, "proxy_stop", &acls) {
                return Response::error("not allowed");
            }
            match ctx.manager.stop_proxy(&payload.name).await {
                Ok(()) => Response::ok(),
                Err(e) => Response::error(e.to_string()),
            }
        })
    })
}

fn status_handler(ctx: Arc<HandlerContext>) -> Handler {
    Arc::new(move |request: Request| -> HandlerFuture {
        let ctx = Arc::clone(&ctx);
        Box::pin(async move {
            let user = principal(&request);
            let Payload::Status(payload) = request.payload else {
                return Response::error("invalid payload");
            };
            let acls = match proxy_acls(&ctx, &payload.name) {
                Ok(acls) => acls,
                Err(resp) => return resp,
            };
            if !ctx.acl.can(&user, "proxy_status", &acls) {
                return Response::error("not allowed");
            }
            match ctx.manager.status(&payload.name) {
                Ok(status) => Response::ok_with_data(status),
                Err(e) => Response::error(e.to_string()),
            }
        })
    })
}

fn info_handler(ctx: Arc<HandlerContext>) -> Handler {
    Arc::new(move |request: Request| -> HandlerFuture {
        let ctx = Arc::clone(&ctx);
        Box::pin(async move {
            let user = principal(&request);
            let Payload::Info(payload) = request.payload else {
                return Response::error("invalid payload");
            };
            let acls = match proxy_acls(&ctx, &payload.name) {
                Ok(acls) => acls,
                Err(resp) => return resp,
            };
            if !ctx.acl.can(&user, "proxy_info", &acls) {
                return Response::error("not allowed");
            }
            match ctx.manager.info(&payload.name) {
                Ok(info) => Response::ok_with_data(info),
                Err(e) => Response::error(e.to_string()),
            }
        })
    })
}

fn list_handler(ctx: Arc<HandlerContext>) -> Handler {
    Arc::new(move |request: Request| -> HandlerFuture {
        let ctx = Arc::clone(&ctx);
        Box::pin(async move {
            let user = principal(&request);
            // Global permission check; no per-object rules apply.
            if !ctx.acl.can(&user, "proxy_list", &AclRuleSet::default()) {
                return Response::error("not allowed");
            }
            let mut proxies: Vec<String> =
                ctx.config.read().proxies.proxies.keys().cloned().collect();
            proxies.sort();
            Response::ok_with_data(ListResponse { proxies })
        })
    })
}

fn set_active_handler(ctx: Arc<HandlerContext>) -> Handler {
    Arc::new(move |request: Request| -> HandlerFuture {
        let ctx = Arc::clone(&ctx);
        Box::pin(async move {
            let user = principal(&request);
            let Payload::SetActive(payload) = request.payload else {
                return Response::error("invalid payload");
            };
            let acls = match proxy_acls(&ctx, &payload.name) {
                Ok(acls) => acls,
                Err(resp) => return resp,
            };
            if !ctx.acl.can(&user, "proxy_setactive", &acls) {
                return Response::error("not allowed");
            }
            // The target must exist before any state change.
            if !ctx.config.read().hosts.contains_key(&payload.host) {
                return Response::error("unknown host");
            }

            if let Err(e) = ctx.manager.stop_proxy(&payload.name).await {
                debug!("[control] Stop before setactive of '{}': {e}", payload.name);
            }
            {
                let mut config = ctx.config.write();
                match config.proxies.proxies.get_mut(&payload.name) {
                    Some(proxy) => proxy.default = payload.host.clone(),
                    None => return Response::error("unknown proxy"),
                }
            }
            match ctx.manager.start_proxy(&payload.name).await {
                Ok(()) => Response::ok(),
                Err(e) => Response::error(e.to_string()),
            }
        })
    })
}

fn resolve_handler(ctx: Arc<HandlerContext>) -> Handler {
    Arc::new(move |request: Request| -> HandlerFuture {
        let ctx = Arc::clone(&ctx);
        Box::pin(async move {
            let user = principal(&request);
            let Payload::Resolve(payload) = request.payload else {
                return Response::error("invalid payload");
            };
            let acls = match proxy_acls(&ctx, &payload.alias) {
                Ok(acls) => acls,
                Err(resp) => return resp,
            };
            if !ctx.acl.can(&user, "proxy_resolve", &acls) {
                return Response::error("not allowed");
            }
            let config = ctx.config.read();
            match config.proxies.proxies.get(&payload.alias) {
                Some(proxy) => Response::ok_with_data(ResolveResponse {
                    host: config.proxies.bind.clone(),
                    port: proxy.port,
                }),
                None => Response::error("unknown proxy"),
            }
        })
    })
}

fn ping_handler() -> Handler {
    Arc::new(move |_request: Request| -> HandlerFuture {
        Box::pin(async move { Response::ok() })
    })
}
