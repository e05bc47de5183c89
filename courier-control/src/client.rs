//! Client for connecting to the control socket

use std::time::Duration;

use tokio::net::UnixStream;
use tracing::debug;

use crate::{ControlError, Request, Response, ResponsePayload, Result, codec};

/// Largest response frame accepted (10MB); generous for large status
/// reports while preventing memory exhaustion.
const MAX_RESPONSE_SIZE: u32 = 10_000_000;

/// Client for communicating with the control server
pub struct ControlClient {
    socket_path: String,
    auth_token: Option<String>,
    timeout: Duration,
}

impl ControlClient {
    #[must_use]
    pub fn new(socket_path: impl Into<String>) -> Self {
        Self {
            socket_path: socket_path.into(),
            auth_token: None,
            timeout: Duration::from_secs(10),
        }
    }

    /// Attach a bearer token to every request
    #[must_use]
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.auth_token = token;
        self
    }

    /// Set the request timeout
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Send a request and receive a response.
    ///
    /// Server-side `Error` payloads are surfaced as [`ControlError::ServerError`].
    pub async fn send_request(&self, request: Request) -> Result<Response> {
        let request = request.with_token(self.auth_token.clone());

        let response = tokio::time::timeout(self.timeout, self.exchange(request))
            .await
            .map_err(|_| ControlError::Timeout)??;

        if let ResponsePayload::Error(message) = &response.payload {
            return Err(ControlError::ServerError(message.clone()));
        }
        Ok(response)
    }

    async fn exchange(&self, request: Request) -> Result<Response> {
        debug!("connecting to control socket: {}", self.socket_path);
        let mut stream = UnixStream::connect(&self.socket_path).await?;

        codec::write_frame(&mut stream, &request).await?;
        codec::read_frame(&mut stream, MAX_RESPONSE_SIZE).await
    }
}
