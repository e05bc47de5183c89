//! Control server: accepts framed requests on a Unix socket and routes them
//! through a [`CommandHandler`].

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::{path::Path, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{
    net::{UnixListener, UnixStream},
    sync::broadcast,
};
use tracing::{debug, error, info, warn};

use crate::{ControlError, Request, Response, Result, auth::ControlAuthConfig, codec};

/// Largest request frame the server accepts (1MB).
const MAX_REQUEST_SIZE: u32 = 1_000_000;

/// Budget for one whole request/response exchange.
const EXCHANGE_DEADLINE: Duration = Duration::from_secs(30);

/// How long to wait when probing whether an existing socket is live.
const STALE_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Handler trait for processing control requests
///
/// Implement this trait to handle specific command types
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Handle a request and return a response
    async fn handle_request(&self, request: Request) -> Result<Response>;
}

/// Control server for managing the relay via Unix domain socket
pub struct ControlServer {
    socket_path: String,
    handler: Arc<dyn CommandHandler>,
    auth: ControlAuthConfig,
}

impl ControlServer {
    pub fn new(
        socket_path: impl Into<String>,
        handler: Arc<dyn CommandHandler>,
        auth: ControlAuthConfig,
    ) -> Self {
        Self {
            socket_path: socket_path.into(),
            handler,
            auth,
        }
    }

    /// Start the control server; runs until a shutdown signal is received.
    pub async fn serve(
        &self,
        mut shutdown: broadcast::Receiver<courier_common::Signal>,
    ) -> Result<()> {
        let listener = bind_or_reclaim(&self.socket_path).await?;
        restrict_permissions(&self.socket_path).await?;
        info!("control socket listening: {}", self.socket_path);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, _addr)) => self.spawn_exchange(stream),
                        Err(e) => error!("error accepting control connection: {e}"),
                    }
                }
                sig = shutdown.recv() => {
                    match sig {
                        Ok(courier_common::Signal::Shutdown | courier_common::Signal::Finalised) => {
                            info!("control server shutting down");
                        }
                        Err(e) => error!("control server shutdown channel error: {e}"),
                    }
                    break;
                }
            }
        }

        let socket_path = Path::new(&self.socket_path);
        if socket_path.exists() {
            debug!("removing socket file: {}", self.socket_path);
            let _ = tokio::fs::remove_file(socket_path).await;
        }

        Ok(())
    }

    /// Run one request/response exchange on its own task, bounded by a
    /// single deadline covering both directions.
    fn spawn_exchange(&self, mut stream: UnixStream) {
        let handler = Arc::clone(&self.handler);
        let auth = self.auth.clone();

        tokio::spawn(async move {
            let exchange = async {
                let request: Request = codec::read_frame(&mut stream, MAX_REQUEST_SIZE).await?;
                let response = respond(&*handler, &auth, request).await;
                codec::write_frame(&mut stream, &response).await
            };

            let outcome = tokio::time::timeout(EXCHANGE_DEADLINE, exchange)
                .await
                .unwrap_or(Err(ControlError::Timeout));
            if let Err(e) = outcome {
                error!("error handling control connection: {e}");
            }
        });
    }
}

/// Authorize and dispatch one request. Handler errors become error payloads
/// rather than dropped connections.
async fn respond(
    handler: &dyn CommandHandler,
    auth: &ControlAuthConfig,
    request: Request,
) -> Response {
    if auth.requires_auth() {
        let authorized = request
            .auth_token
            .as_deref()
            .is_some_and(|token| auth.validate_token(token));
        if !authorized {
            warn!("control request rejected: invalid or missing token");
            return Response::error("authentication required");
        }
    }

    match handler.handle_request(request).await {
        Ok(response) => response,
        Err(e) => {
            warn!("error handling request: {e}");
            Response::error(e.to_string())
        }
    }
}

/// Bind the listener, reclaiming a leftover socket file when nothing is
/// answering on it.
///
/// The bind is attempted first; only an `AddrInUse` failure triggers the
/// liveness probe, so the common startup path is a single syscall.
async fn bind_or_reclaim(socket_path: &str) -> Result<UnixListener> {
    match UnixListener::bind(socket_path) {
        Ok(listener) => Ok(listener),
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
            let probe =
                tokio::time::timeout(STALE_PROBE_TIMEOUT, UnixStream::connect(socket_path)).await;
            if matches!(probe, Ok(Ok(_))) {
                return Err(ControlError::Io(std::io::Error::new(
                    std::io::ErrorKind::AddrInUse,
                    format!("socket already in use by running instance: {socket_path}"),
                )));
            }

            info!("reclaiming stale control socket: {socket_path}");
            tokio::fs::remove_file(socket_path).await?;
            Ok(UnixListener::bind(socket_path)?)
        }
        Err(e) => Err(ControlError::Io(e)),
    }
}

/// Owner-only permissions on the socket file.
async fn restrict_permissions(socket_path: &str) -> Result<()> {
    #[cfg(unix)]
    {
        let metadata = tokio::fs::metadata(socket_path).await?;
        let mut perms = metadata.permissions();
        perms.set_mode(0o600);
        tokio::fs::set_permissions(socket_path, perms).await?;
    }
    #[cfg(not(unix))]
    let _ = socket_path;
    Ok(())
}
