//! SMTP client with support for implicit TLS, STARTTLS and AUTH LOGIN.

use std::{sync::Arc, time::Duration};

use base64::{Engine, engine::general_purpose::STANDARD};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};
use tokio_rustls::{
    TlsConnector,
    client::TlsStream,
    rustls::{
        self, ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme,
        client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
        pki_types::{CertificateDer, ServerName, UnixTime},
    },
};

use crate::{
    error::{ClientError, Result},
    response::Response,
};

/// Read chunk size; replies longer than one chunk accumulate across reads.
const READ_CHUNK: usize = 2048;

/// Hard cap on a single reply, to bound memory against a hostile server.
const MAX_REPLY_BYTES: usize = 512 * 1024;

/// Everything needed to open an authenticated session to one account's
/// SMTP server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectSettings {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    pub use_tls: bool,
    /// Idle TTL for pooled connections using these settings.
    pub ttl: Duration,
}

impl ConnectSettings {
    /// Pool bucket key: connections are shared per `(host, port, user)`.
    #[must_use]
    pub fn pool_key(&self) -> String {
        format!(
            "{}:{}:{}",
            self.host,
            self.port,
            self.user.as_deref().unwrap_or("")
        )
    }

    /// Port 465 wraps the socket in TLS before the greeting; every other
    /// TLS-enabled port negotiates STARTTLS after EHLO.
    #[must_use]
    pub const fn implicit_tls(&self) -> bool {
        self.use_tls && self.port == 465
    }
}

/// An SMTP client for sending commands and receiving replies.
pub struct SmtpClient {
    transport: Option<Transport>,
    /// Bytes received but not yet consumed by a parsed reply.
    pending: Vec<u8>,
    server_domain: String,
    accept_invalid_certs: bool,
}

impl SmtpClient {
    /// Connect a raw TCP session to the given address.
    pub async fn connect(addr: &str, server_domain: String) -> Result<Self> {
        let stream = TcpStream::connect(addr).await.map_err(ClientError::Io)?;

        Ok(Self {
            transport: Some(Transport::Clear(stream)),
            pending: Vec::new(),
            server_domain,
            accept_invalid_certs: false,
        })
    }

    /// Accept invalid TLS certificates. Testing only.
    #[must_use]
    pub const fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    /// Open a fully established session: connect (within `connect_timeout`),
    /// greeting, EHLO, TLS per the port convention, and AUTH LOGIN when the
    /// settings carry a user.
    pub async fn establish(
        settings: &ConnectSettings,
        helo_name: &str,
        connect_timeout: Duration,
        accept_invalid_certs: bool,
    ) -> Result<Self> {
        let addr = format!("{}:{}", settings.host, settings.port);
        let mut client =
            tokio::time::timeout(connect_timeout, Self::connect(&addr, settings.host.clone()))
                .await
                .map_err(|_| ClientError::Timeout(format!("connect to {addr}")))??
                .accept_invalid_certs(accept_invalid_certs);

        if settings.implicit_tls() {
            client.encrypt_transport().await?;
        }

        let greeting = client.read_greeting().await?;
        if !greeting.is_success() {
            return Err(ClientError::from_response(&greeting));
        }

        let ehlo = client.ehlo(helo_name).await?;
        if !ehlo.is_success() {
            return Err(ClientError::from_response(&ehlo));
        }

        if settings.use_tls && !settings.implicit_tls() {
            let response = client.starttls().await?;
            if !response.is_success() {
                return Err(ClientError::from_response(&response));
            }
            // Re-EHLO after STARTTLS (RFC 3207)
            let ehlo = client.ehlo(helo_name).await?;
            if !ehlo.is_success() {
                return Err(ClientError::from_response(&ehlo));
            }
        }

        if let (Some(user), Some(password)) = (&settings.user, &settings.password) {
            client.auth_login(user, password).await?;
        }

        Ok(client)
    }

    /// Read the initial server greeting (220 response).
    pub async fn read_greeting(&mut self) -> Result<Response> {
        self.read_response().await
    }

    /// Send a command to the server without waiting for a response.
    pub async fn send_command(&mut self, command: &str) -> Result<()> {
        let data = format!("{command}\r\n");
        self.transport_mut()?.write_all(data.as_bytes()).await
    }

    /// Send a command and read the response.
    pub async fn command(&mut self, command: &str) -> Result<Response> {
        self.send_command(command).await?;
        self.read_response().await
    }

    pub async fn ehlo(&mut self, domain: &str) -> Result<Response> {
        self.command(&format!("EHLO {domain}")).await
    }

    pub async fn helo(&mut self, domain: &str) -> Result<Response> {
        self.command(&format!("HELO {domain}")).await
    }

    pub async fn mail_from(&mut self, from: &str) -> Result<Response> {
        self.command(&format!("MAIL FROM:<{from}>")).await
    }

    pub async fn rcpt_to(&mut self, to: &str) -> Result<Response> {
        self.command(&format!("RCPT TO:<{to}>")).await
    }

    pub async fn data(&mut self) -> Result<Response> {
        self.command("DATA").await
    }

    /// Send the message data followed by the end-of-data marker.
    pub async fn send_data(&mut self, data: &str) -> Result<Response> {
        let transport = self.transport_mut()?;
        transport.write_all(data.as_bytes()).await?;

        // Normalize the trailing line ending before the terminating dot.
        if data.ends_with("\r\n") {
            // already terminated
        } else if data.ends_with('\n') {
            transport.write_all(b"\r").await?;
        } else {
            transport.write_all(b"\r\n").await?;
        }
        transport.write_all(b".\r\n").await?;

        self.read_response().await
    }

    pub async fn quit(&mut self) -> Result<Response> {
        self.command("QUIT").await
    }

    pub async fn rset(&mut self) -> Result<Response> {
        self.command("RSET").await
    }

    /// NOOP round-trip; the pool's health probe.
    pub async fn noop(&mut self) -> Result<Response> {
        self.command("NOOP").await
    }

    /// AUTH LOGIN exchange: base64 user then base64 password.
    pub async fn auth_login(&mut self, user: &str, password: &str) -> Result<Response> {
        let response = self.command("AUTH LOGIN").await?;
        if !response.is_intermediate() {
            return Err(ClientError::from_response(&response));
        }

        let response = self.command(&STANDARD.encode(user)).await?;
        if !response.is_intermediate() {
            return Err(ClientError::from_response(&response));
        }

        let response = self.command(&STANDARD.encode(password)).await?;
        if !response.is_success() {
            return Err(ClientError::from_response(&response));
        }
        Ok(response)
    }

    /// STARTTLS negotiation, upgrading the stream on success.
    pub async fn starttls(&mut self) -> Result<Response> {
        let response = self.command("STARTTLS").await?;
        if response.is_success() {
            self.encrypt_transport().await?;
        }
        Ok(response)
    }

    /// Wrap the current transport in TLS.
    async fn encrypt_transport(&mut self) -> Result<()> {
        let transport = self
            .transport
            .take()
            .ok_or(ClientError::ConnectionClosed)?;
        let Transport::Clear(stream) = transport else {
            self.transport = Some(transport);
            return Err(ClientError::Tls("session is already encrypted".to_string()));
        };

        let connector = tls_connector(self.accept_invalid_certs)?;
        let server_name = ServerName::try_from(self.server_domain.clone())
            .map_err(|e| ClientError::Tls(format!("invalid server name: {e}")))?;
        let encrypted = connector
            .connect(server_name, stream)
            .await
            .map_err(|e| ClientError::Tls(e.to_string()))?;

        self.transport = Some(Transport::Encrypted(Box::new(encrypted)));
        Ok(())
    }

    fn transport_mut(&mut self) -> Result<&mut Transport> {
        self.transport.as_mut().ok_or(ClientError::ConnectionClosed)
    }

    /// Read until the pending buffer holds one complete reply.
    ///
    /// Incoming bytes accumulate in `pending`; each parsed reply drains
    /// exactly the bytes it consumed, so pipelined data survives for the
    /// next call.
    async fn read_response(&mut self) -> Result<Response> {
        let mut chunk = [0u8; READ_CHUNK];

        loop {
            if let Some((response, consumed)) = Response::parse(&self.pending)? {
                self.pending.drain(..consumed);
                return Ok(response);
            }

            if self.pending.len() >= MAX_REPLY_BYTES {
                return Err(ClientError::Parse(format!(
                    "reply exceeds {MAX_REPLY_BYTES} bytes"
                )));
            }

            let n = self.transport_mut()?.read_some(&mut chunk).await?;
            self.pending.extend_from_slice(&chunk[..n]);
        }
    }
}

/// The wire under the client: clear TCP or a TLS session over it.
enum Transport {
    Clear(TcpStream),
    Encrypted(Box<TlsStream<TcpStream>>),
}

impl Transport {
    async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        match self {
            Self::Clear(stream) => stream.write_all(data).await?,
            Self::Encrypted(stream) => stream.write_all(data).await?,
        }
        Ok(())
    }

    /// Read at least one byte; EOF surfaces as `ConnectionClosed`.
    async fn read_some(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = match self {
            Self::Clear(stream) => stream.read(buf).await?,
            Self::Encrypted(stream) => stream.read(buf).await?,
        };
        if n == 0 {
            Err(ClientError::ConnectionClosed)
        } else {
            Ok(n)
        }
    }
}

/// Build a TLS connector with native roots, optionally with verification
/// disabled for tests against self-signed servers.
fn tls_connector(accept_invalid_certs: bool) -> Result<TlsConnector> {
    let loaded = rustls_native_certs::load_native_certs();
    if !loaded.errors.is_empty() {
        tracing::warn!(?loaded.errors, "some native certificates could not be loaded");
    }

    let mut roots = RootCertStore::empty();
    let (added, skipped) = roots.add_parsable_certificates(loaded.certs);
    tracing::trace!(added, skipped, "native root certificates loaded");

    let mut config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    if accept_invalid_certs {
        config
            .dangerous()
            .set_certificate_verifier(Arc::new(InsecureVerifier));
    }

    Ok(TlsConnector::from(Arc::new(config)))
}

/// Accepts any certificate. Wired in only behind `accept_invalid_certs`.
#[derive(Debug)]
struct InsecureVerifier;

impl ServerCertVerifier for InsecureVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ED25519,
        ]
    }
}
