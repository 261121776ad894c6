// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! QUIC clients for user code running next to the membrane.
//!
//! [`MembraneClient`] calls the backend-service facades. [`FaasClient`]
//! attaches a function as a FaaS stream worker and serves triggers until the
//! membrane closes the stream.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use quinn::{ClientConfig, Connection, Endpoint, TransportConfig};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, instrument, warn};

use crate::faas_proto::{self, TriggerRequest, TriggerResponse, message::Content};
use crate::frame::{Frame, FrameError, FramedStream, MessageType, read_frame, write_frame};
use crate::service_proto::{RpcError, ServiceRequest, ServiceResponse};

/// Errors that can occur in the QUIC client
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connection error: {0}")]
    Connection(#[from] quinn::ConnectionError),

    #[error("connect error: {0}")]
    Connect(#[from] quinn::ConnectError),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("stream closed: {0}")]
    ClosedStream(#[from] quinn::ClosedStream),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("no connection established")]
    NotConnected,

    #[error("connection timed out after {0}ms")]
    Timeout(u64),

    #[error("membrane rejected the call ({code}): {message}")]
    Rejected { code: String, message: String },

    #[error("handshake failed: {0}")]
    Handshake(String),
}

impl From<RpcError> for ClientError {
    fn from(err: RpcError) -> Self {
        ClientError::Rejected {
            code: err.code,
            message: err.message,
        }
    }
}

/// Configuration for the QUIC client
#[derive(Debug, Clone)]
pub struct MembraneClientConfig {
    /// Service listener address
    pub server_addr: SocketAddr,
    /// Server name for TLS verification
    pub server_name: String,
    /// Skip certificate verification. The service listener uses a
    /// self-signed certificate, so local clients normally set this.
    pub dangerous_skip_cert_verification: bool,
    /// Keep-alive interval in milliseconds (0 to disable)
    pub keep_alive_interval_ms: u64,
    /// Idle timeout in milliseconds
    pub idle_timeout_ms: u64,
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
}

impl Default for MembraneClientConfig {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([127, 0, 0, 1], 50051)),
            server_name: "localhost".to_string(),
            dangerous_skip_cert_verification: false,
            keep_alive_interval_ms: 10_000,
            idle_timeout_ms: 600_000,
            connect_timeout_ms: 10_000,
        }
    }
}

/// QUIC client for the membrane service listener
pub struct MembraneClient {
    endpoint: Endpoint,
    connection: Mutex<Option<Connection>>,
    config: MembraneClientConfig,
}

impl MembraneClient {
    pub fn new(config: MembraneClientConfig) -> Result<Self, ClientError> {
        let mut endpoint = Endpoint::client(SocketAddr::from(([0, 0, 0, 0], 0)))?;
        endpoint.set_default_client_config(Self::build_client_config(&config)?);

        Ok(Self {
            endpoint,
            connection: Mutex::new(None),
            config,
        })
    }

    /// Client for a membrane on this host using its self-signed certificate
    pub fn localhost(server_addr: SocketAddr) -> Result<Self, ClientError> {
        Self::new(MembraneClientConfig {
            server_addr,
            dangerous_skip_cert_verification: true,
            ..Default::default()
        })
    }

    fn build_client_config(config: &MembraneClientConfig) -> Result<ClientConfig, ClientError> {
        let crypto = if config.dangerous_skip_cert_verification {
            rustls::ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(SkipServerVerification))
                .with_no_client_auth()
        } else {
            let mut roots = rustls::RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            rustls::ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth()
        };

        let mut transport = TransportConfig::default();
        if config.keep_alive_interval_ms > 0 {
            transport.keep_alive_interval(Some(Duration::from_millis(
                config.keep_alive_interval_ms,
            )));
        }
        let idle = Duration::from_millis(config.idle_timeout_ms)
            .try_into()
            .map_err(|_| ClientError::Tls("idle timeout out of range".to_string()))?;
        transport.max_idle_timeout(Some(idle));

        let quic_crypto = quinn::crypto::rustls::QuicClientConfig::try_from(crypto)
            .map_err(|e| ClientError::Tls(e.to_string()))?;
        let mut client_config = ClientConfig::new(Arc::new(quic_crypto));
        client_config.transport_config(Arc::new(transport));

        Ok(client_config)
    }

    /// Connect to the membrane, reusing a live connection
    #[instrument(skip(self))]
    pub async fn connect(&self) -> Result<(), ClientError> {
        let mut conn_guard = self.connection.lock().await;

        if let Some(ref conn) = *conn_guard
            && conn.close_reason().is_none()
        {
            debug!("reusing existing connection");
            return Ok(());
        }

        info!(addr = %self.config.server_addr, "connecting to membrane");

        let timeout = Duration::from_millis(self.config.connect_timeout_ms);
        let connecting = self
            .endpoint
            .connect(self.config.server_addr, &self.config.server_name)?;

        let connection = tokio::time::timeout(timeout, connecting)
            .await
            .map_err(|_| ClientError::Timeout(self.config.connect_timeout_ms))??;

        *conn_guard = Some(connection);
        Ok(())
    }

    async fn get_connection(&self) -> Result<Connection, ClientError> {
        self.connect().await?;
        let conn_guard = self.connection.lock().await;
        conn_guard.clone().ok_or(ClientError::NotConnected)
    }

    /// Open a raw bidirectional stream
    pub async fn open_raw_stream(
        &self,
    ) -> Result<(quinn::SendStream, quinn::RecvStream), ClientError> {
        let conn = self.get_connection().await?;
        Ok(conn.open_bi().await?)
    }

    /// Call a backend-service facade.
    ///
    /// A facade-level failure comes back as `Ok` with a
    /// [`ServiceResponse`] carrying an error; only transport problems and
    /// rejected frames are `Err`.
    #[instrument(skip(self, request))]
    pub async fn call(&self, request: &ServiceRequest) -> Result<ServiceResponse, ClientError> {
        let (mut send, mut recv) = self.open_raw_stream().await?;

        write_frame(&mut send, &Frame::request(request)?).await?;
        send.finish()?;

        let frame = read_frame(&mut recv).await?;
        match frame.message_type {
            MessageType::Response => Ok(frame.decode()?),
            MessageType::Error => Err(frame.decode::<RpcError>()?.into()),
            actual => Err(FrameError::UnexpectedFrame {
                expected: MessageType::Response,
                actual,
            }
            .into()),
        }
    }

    pub async fn close(&self) {
        let mut conn_guard = self.connection.lock().await;
        if let Some(conn) = conn_guard.take() {
            conn.close(0u32.into(), b"client closing");
        }
    }

    pub async fn is_connected(&self) -> bool {
        let conn_guard = self.connection.lock().await;
        conn_guard
            .as_ref()
            .is_some_and(|conn| conn.close_reason().is_none())
    }
}

impl Drop for MembraneClient {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.connection.try_lock()
            && let Some(conn) = guard.take()
        {
            conn.close(0u32.into(), b"client dropped");
        }
    }
}

/// Attaches a function to the membrane as a FaaS stream worker.
pub struct FaasClient {
    client: MembraneClient,
}

impl FaasClient {
    pub fn new(client: MembraneClient) -> Self {
        Self { client }
    }

    /// Attach and serve triggers until the membrane ends the stream.
    pub async fn serve<H, Fut>(&self, handler: H) -> Result<(), ClientError>
    where
        H: Fn(TriggerRequest) -> Fut + Send + Sync + Clone + 'static,
        Fut: std::future::Future<Output = TriggerResponse> + Send + 'static,
    {
        let (send, recv) = self.client.open_raw_stream().await?;
        serve_stream(recv, send, handler).await
    }
}

/// Run the worker side of a FaaS stream over any duplex transport.
///
/// Performs the handshake, then runs `handler` concurrently for every
/// trigger and writes each result back under the trigger's correlation ID.
pub async fn serve_stream<R, W, H, Fut>(reader: R, writer: W, handler: H) -> Result<(), ClientError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
    H: Fn(TriggerRequest) -> Fut + Send + Sync + Clone + 'static,
    Fut: std::future::Future<Output = TriggerResponse> + Send + 'static,
{
    let mut reader = FramedStream::new(reader);
    let mut writer = FramedStream::new(writer);

    writer
        .write_frame(&Frame::stream_start(&faas_proto::Message::init_request())?)
        .await?;

    let ack = reader.read_frame().await?;
    match ack.message_type {
        MessageType::StreamStart | MessageType::StreamData => {
            let msg: faas_proto::Message = ack.decode()?;
            if !matches!(msg.content, Some(Content::InitResponse(_))) {
                return Err(ClientError::Handshake(
                    "expected init response from membrane".to_string(),
                ));
            }
        }
        MessageType::Error => return Err(ack.decode::<RpcError>()?.into()),
        other => {
            return Err(ClientError::Handshake(format!(
                "unexpected {:?} frame during handshake",
                other
            )));
        }
    }
    debug!("attached to membrane");

    let (replies, mut outbox) = mpsc::channel::<faas_proto::Message>(64);
    let write_loop = tokio::spawn(async move {
        while let Some(msg) = outbox.recv().await {
            writer.write_frame(&Frame::stream_data(&msg)?).await?;
        }
        writer.shutdown().await?;
        Ok::<(), FrameError>(())
    });

    loop {
        let frame = match reader.read_frame().await {
            Ok(frame) => frame,
            Err(e) if e.is_closed() => break,
            Err(e) => {
                write_loop.abort();
                return Err(e.into());
            }
        };
        if frame.message_type == MessageType::StreamEnd {
            break;
        }

        let msg: faas_proto::Message = frame.decode()?;
        match msg.content {
            Some(Content::TriggerRequest(request)) => {
                let handler = handler.clone();
                let replies = replies.clone();
                let id = msg.id;
                tokio::spawn(async move {
                    let response = handler(request).await;
                    if replies
                        .send(faas_proto::Message::trigger_response(id, response))
                        .await
                        .is_err()
                    {
                        debug!("stream closed before response could be sent");
                    }
                });
            }
            _ => warn!(id = %msg.id, "ignoring unexpected message from membrane"),
        }
    }

    drop(replies);
    write_loop
        .await
        .map_err(|e| ClientError::Io(std::io::Error::other(e)))??;
    Ok(())
}

/// Certificate verifier that accepts the membrane's self-signed certificate
#[derive(Debug)]
struct SkipServerVerification;

impl rustls::client::danger::ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MembraneClientConfig::default();
        assert_eq!(config.server_addr, "127.0.0.1:50051".parse().unwrap());
        assert_eq!(config.server_name, "localhost");
        assert!(!config.dangerous_skip_cert_verification);
    }

    #[tokio::test]
    async fn test_client_initial_not_connected() {
        let client = MembraneClient::localhost("127.0.0.1:50051".parse().unwrap()).unwrap();
        assert!(!client.is_connected().await);
    }

    #[tokio::test]
    async fn test_client_connect_timeout() {
        let client = MembraneClient::new(MembraneClientConfig {
            server_addr: "127.0.0.1:59998".parse().unwrap(),
            dangerous_skip_cert_verification: true,
            connect_timeout_ms: 100,
            ..Default::default()
        })
        .unwrap();
        assert!(client.connect().await.is_err());
    }

    #[test]
    fn test_rejected_error_from_rpc_error() {
        let err: ClientError = RpcError {
            code: "POOL_FULL".to_string(),
            message: "max worker capacity reached".to_string(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "membrane rejected the call (POOL_FULL): max worker capacity reached"
        );
    }

    #[test]
    fn test_build_client_config_skip_verification() {
        let config = MembraneClientConfig {
            dangerous_skip_cert_verification: true,
            ..Default::default()
        };
        assert!(MembraneClient::build_client_config(&config).is_ok());
    }
}
