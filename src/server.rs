//! Connection handling and request dispatch.
//!
//! One task per connection, reading requests sequentially so responses go
//! back in arrival order. Actual handler execution is throttled by a
//! semaphore shared across connections, which bounds concurrent business
//! logic the way a fixed worker pool would.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, error, warn};

use crate::auth;
use crate::error::ApiError;
use crate::handlers::{self, AppContext, Handler};
use crate::protocol::{Method, Request, Response};
use crate::router;

/// Requests larger than one read of this size are not supported by the
/// protocol; clients keep bodies small.
const READ_BUF_CAPACITY: usize = 8192;

pub struct Server {
    ctx: Arc<AppContext>,
    handlers: Arc<HashMap<&'static str, Handler>>,
    workers: Arc<Semaphore>,
    listener: TcpListener,
}

impl Server {
    pub async fn bind(ctx: Arc<AppContext>) -> anyhow::Result<Server> {
        let addr = format!("{}:{}", ctx.config.server.host, ctx.config.server.port);
        let listener = TcpListener::bind(&addr).await?;
        let workers = Arc::new(Semaphore::new(ctx.config.server.workers));
        Ok(Server {
            handlers: Arc::new(handlers::handler_table()),
            workers,
            listener,
            ctx,
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn run(self) -> anyhow::Result<()> {
        loop {
            let (socket, peer) = self.listener.accept().await?;
            debug!("Accepted connection from {}", peer);
            let ctx = Arc::clone(&self.ctx);
            let handlers = Arc::clone(&self.handlers);
            let workers = Arc::clone(&self.workers);
            tokio::spawn(async move {
                if let Err(e) = handle_connection(socket, ctx, handlers, workers).await {
                    debug!("Connection from {} closed: {}", peer, e);
                }
            });
        }
    }
}

async fn handle_connection(
    mut socket: TcpStream,
    ctx: Arc<AppContext>,
    handlers: Arc<HashMap<&'static str, Handler>>,
    workers: Arc<Semaphore>,
) -> anyhow::Result<()> {
    let mut buf = vec![0u8; READ_BUF_CAPACITY];
    loop {
        let n = socket.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        let raw = String::from_utf8_lossy(&buf[..n]);

        let response = match Request::parse(&raw) {
            Err(e) => {
                warn!("Undecodable request: {}", e);
                Response::new(400)
            }
            // preflight, answered before auth or routing
            Ok(request) if request.method == Method::Options => Response::new(200),
            Ok(request) => {
                let _permit = workers.acquire().await?;
                dispatch(&ctx, &handlers, request).await
            }
        };

        socket.write_all(response.encode().as_bytes()).await?;
    }
}

/// Route, authenticate and run one request, folding every `ApiError` into
/// its wire status.
async fn dispatch(
    ctx: &AppContext,
    handlers: &HashMap<&'static str, Handler>,
    request: Request,
) -> Response {
    let result = async {
        let name = router::resolve(&request)?;
        let handler = handlers.get(name).ok_or(ApiError::InternalServerError)?;

        let authed = if request.is_login_request() {
            auth::anonymous(request)
        } else {
            auth::authenticate(&ctx.store, request)?
        };

        handler(ctx, authed).await
    }
    .await;

    match result {
        Ok(response) => response,
        Err(e) => {
            if matches!(e, ApiError::InternalServerError) {
                error!("Request failed internally: {}", e);
            }
            Response::new(e.status_code())
        }
    }
}
