// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! QUIC server for the membrane service listener.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use quinn::{Endpoint, Incoming, RecvStream, SendStream, ServerConfig, TransportConfig};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::frame::{Frame, FrameError, read_frame, write_frame};
use crate::service_proto::RpcError;

/// Errors that can occur in the QUIC server
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("bind error: {0}")]
    Bind(#[from] std::io::Error),

    #[error("connection error: {0}")]
    Connection(#[from] quinn::ConnectionError),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("stream already finished")]
    Finished,
}

/// Configuration for the QUIC server
#[derive(Debug, Clone)]
pub struct MembraneServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,
    /// TLS certificate chain (PEM format)
    pub cert_pem: Vec<u8>,
    /// TLS private key (PEM format)
    pub key_pem: Vec<u8>,
    /// Maximum concurrent bidirectional streams per connection.
    /// Each facade call and each attached FaaS worker holds one.
    pub max_bi_streams: u32,
    /// Idle timeout in milliseconds
    pub idle_timeout_ms: u64,
    /// Server-side keep-alive interval in milliseconds (0 to disable)
    pub keep_alive_interval_ms: u64,
    /// UDP receive buffer size in bytes (0 for OS default)
    pub udp_receive_buffer_size: usize,
    /// UDP send buffer size in bytes (0 for OS default)
    pub udp_send_buffer_size: usize,
}

impl Default for MembraneServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 50051)),
            cert_pem: Vec::new(),
            key_pem: Vec::new(),
            max_bi_streams: 1_000,
            idle_timeout_ms: 600_000,
            keep_alive_interval_ms: 15_000,
            udp_receive_buffer_size: 2 * 1024 * 1024, // 2MB
            udp_send_buffer_size: 2 * 1024 * 1024,    // 2MB
        }
    }
}

/// QUIC server accepting facade calls and FaaS worker streams
pub struct MembraneServer {
    endpoint: Endpoint,
    config: MembraneServerConfig,
}

impl MembraneServer {
    /// Create a new server with the given configuration
    pub fn new(config: MembraneServerConfig) -> Result<Self, ServerError> {
        use socket2::{Domain, Protocol, Socket, Type};

        let server_config = Self::build_server_config(&config)?;

        let domain = if config.bind_addr.is_ipv6() {
            Domain::IPV6
        } else {
            Domain::IPV4
        };
        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;

        if config.udp_receive_buffer_size > 0
            && let Err(e) = socket.set_recv_buffer_size(config.udp_receive_buffer_size)
        {
            warn!(
                size = config.udp_receive_buffer_size,
                error = %e,
                "Failed to set UDP receive buffer size"
            );
        }
        if config.udp_send_buffer_size > 0
            && let Err(e) = socket.set_send_buffer_size(config.udp_send_buffer_size)
        {
            warn!(
                size = config.udp_send_buffer_size,
                error = %e,
                "Failed to set UDP send buffer size"
            );
        }

        socket.bind(&config.bind_addr.into())?;
        let std_socket: std::net::UdpSocket = socket.into();

        let runtime = quinn::default_runtime()
            .ok_or_else(|| ServerError::Bind(std::io::Error::other("no async runtime found")))?;
        let endpoint = Endpoint::new_with_abstract_socket(
            quinn::EndpointConfig::default(),
            Some(server_config),
            runtime.wrap_udp_socket(std_socket)?,
            runtime,
        )?;

        info!(
            addr = %config.bind_addr,
            max_bi_streams = config.max_bi_streams,
            idle_timeout_ms = config.idle_timeout_ms,
            "QUIC service listener bound"
        );

        Ok(Self { endpoint, config })
    }

    /// Create a server with a self-signed certificate for `localhost` and
    /// default transport settings
    pub fn localhost(bind_addr: SocketAddr) -> Result<Self, ServerError> {
        Self::localhost_with_config(bind_addr, MembraneServerConfig::default())
    }

    /// Create a server with a self-signed certificate and custom config
    pub fn localhost_with_config(
        bind_addr: SocketAddr,
        mut config: MembraneServerConfig,
    ) -> Result<Self, ServerError> {
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
            .map_err(|e| ServerError::Tls(e.to_string()))?;

        config.bind_addr = bind_addr;
        config.cert_pem = cert.cert.pem().into_bytes();
        config.key_pem = cert.key_pair.serialize_pem().into_bytes();

        Self::new(config)
    }

    pub fn config(&self) -> &MembraneServerConfig {
        &self.config
    }

    fn build_server_config(config: &MembraneServerConfig) -> Result<ServerConfig, ServerError> {
        let certs = rustls_pemfile::certs(&mut config.cert_pem.as_slice())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ServerError::Tls(format!("failed to parse certificates: {}", e)))?;

        let key = rustls_pemfile::private_key(&mut config.key_pem.as_slice())
            .map_err(|e| ServerError::Tls(format!("failed to parse private key: {}", e)))?
            .ok_or_else(|| ServerError::Tls("no private key found".to_string()))?;

        let crypto = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| ServerError::Tls(e.to_string()))?;

        let mut transport = TransportConfig::default();
        let idle = Duration::from_millis(config.idle_timeout_ms)
            .try_into()
            .map_err(|_| ServerError::Tls("idle timeout out of range".to_string()))?;
        transport.max_idle_timeout(Some(idle));
        transport.max_concurrent_bidi_streams(config.max_bi_streams.into());
        transport.max_concurrent_uni_streams(0u32.into());

        if config.keep_alive_interval_ms > 0 {
            transport.keep_alive_interval(Some(Duration::from_millis(
                config.keep_alive_interval_ms,
            )));
        }

        let mut server_config = ServerConfig::with_crypto(Arc::new(
            quinn::crypto::rustls::QuicServerConfig::try_from(crypto)
                .map_err(|e| ServerError::Tls(e.to_string()))?,
        ));
        server_config.transport_config(Arc::new(transport));

        Ok(server_config)
    }

    /// Accept the next incoming connection
    pub async fn accept(&self) -> Option<Incoming> {
        self.endpoint.accept().await
    }

    /// Get the local address the server is bound to
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.endpoint.local_addr()?)
    }

    /// Close the endpoint and every open connection
    pub fn close(&self) {
        self.endpoint.close(0u32.into(), b"membrane stopping");
    }

    /// Accept connections until `shutdown` flips to `true` or the endpoint closes.
    ///
    /// Each accepted connection is handed to `handler` on its own task.
    #[instrument(skip_all, fields(addr = ?self.local_addr().ok()))]
    pub async fn run_until<H, Fut>(&self, mut shutdown: watch::Receiver<bool>, handler: H)
    where
        H: Fn(ConnectionHandler) -> Fut + Send + Sync + Clone + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        info!("QUIC service listener running");

        loop {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("QUIC service listener received shutdown signal");
                        self.close();
                        break;
                    }
                }

                incoming = self.accept() => {
                    let Some(incoming) = incoming else {
                        break;
                    };
                    let handler = handler.clone();
                    tokio::spawn(async move {
                        match incoming.await {
                            Ok(connection) => {
                                debug!(remote = %connection.remote_address(), "accepted connection");
                                handler(ConnectionHandler::new(connection)).await;
                            }
                            Err(e) => {
                                warn!(error = %e, "failed to accept connection");
                            }
                        }
                    });
                }
            }
        }

        info!("QUIC service listener stopped");
    }
}

/// Handler for an individual QUIC connection
pub struct ConnectionHandler {
    connection: quinn::Connection,
}

impl ConnectionHandler {
    pub fn new(connection: quinn::Connection) -> Self {
        Self { connection }
    }

    pub fn remote_address(&self) -> SocketAddr {
        self.connection.remote_address()
    }

    /// Accept the next bidirectional stream
    pub async fn accept_bi(&self) -> Result<(SendStream, RecvStream), ServerError> {
        Ok(self.connection.accept_bi().await?)
    }

    /// Spawn `handler` for every bidirectional stream until the connection closes
    #[instrument(skip(self, handler), fields(remote = %self.remote_address()))]
    pub async fn run<H, Fut>(&self, handler: H)
    where
        H: Fn(StreamHandler) -> Fut + Send + Sync + Clone + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        loop {
            match self.accept_bi().await {
                Ok((send, recv)) => {
                    let handler = handler.clone();
                    tokio::spawn(async move {
                        handler(StreamHandler::new(send, recv)).await;
                    });
                }
                Err(ServerError::Connection(
                    quinn::ConnectionError::ApplicationClosed(_)
                    | quinn::ConnectionError::LocallyClosed
                    | quinn::ConnectionError::TimedOut,
                )) => {
                    debug!("connection closed");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "error accepting stream");
                    break;
                }
            }
        }
    }

    pub fn is_open(&self) -> bool {
        self.connection.close_reason().is_none()
    }
}

/// Handler for an individual QUIC stream (bidirectional)
pub struct StreamHandler {
    send: SendStream,
    recv: RecvStream,
}

impl StreamHandler {
    pub fn new(send: SendStream, recv: RecvStream) -> Self {
        Self { send, recv }
    }

    pub async fn read_frame(&mut self) -> Result<Frame, ServerError> {
        Ok(read_frame(&mut self.recv).await?)
    }

    pub async fn write_frame(&mut self, frame: &Frame) -> Result<(), ServerError> {
        Ok(write_frame(&mut self.send, frame).await?)
    }

    /// Reply with an `Error` frame and finish the stream.
    pub async fn reject(&mut self, code: &str, message: impl Into<String>) -> Result<(), ServerError> {
        let frame = Frame::error(&RpcError {
            code: code.to_string(),
            message: message.into(),
        })?;
        self.write_frame(&frame).await?;
        self.finish()
    }

    /// Finish the send stream (signal no more data)
    pub fn finish(&mut self) -> Result<(), ServerError> {
        self.send.finish().map_err(|_| ServerError::Finished)
    }

    /// Split into raw halves for long-lived streams.
    pub fn into_split(self) -> (SendStream, RecvStream) {
        (self.send, self.recv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MembraneServerConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:50051".parse().unwrap());
        assert!(config.cert_pem.is_empty());
        assert_eq!(config.max_bi_streams, 1_000);
        assert_eq!(config.keep_alive_interval_ms, 15_000);
    }

    #[tokio::test]
    async fn test_server_localhost_local_addr() {
        let server = MembraneServer::localhost("127.0.0.1:0".parse().unwrap()).unwrap();
        assert!(server.local_addr().unwrap().port() > 0);
    }

    #[tokio::test]
    async fn test_server_accept_after_close() {
        let server = MembraneServer::localhost("127.0.0.1:0".parse().unwrap()).unwrap();
        server.close();
        assert!(server.accept().await.is_none());
    }

    #[tokio::test]
    async fn test_run_until_returns_on_shutdown() {
        let server = MembraneServer::localhost("127.0.0.1:0".parse().unwrap()).unwrap();
        let (tx, rx) = watch::channel(false);

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            tx.send(true).unwrap();
        });

        tokio::time::timeout(
            Duration::from_secs(5),
            server.run_until(rx, |_conn: ConnectionHandler| async {}),
        )
        .await
        .expect("listener did not stop");
        stopper.await.unwrap();
    }

    #[test]
    fn test_server_with_invalid_cert() {
        let config = MembraneServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            cert_pem: b"invalid-cert".to_vec(),
            key_pem: b"invalid-key".to_vec(),
            ..Default::default()
        };
        assert!(MembraneServer::new(config).is_err());
    }

    #[test]
    fn test_build_server_config_missing_key() {
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let config = MembraneServerConfig {
            cert_pem: cert.cert.pem().into_bytes(),
            key_pem: Vec::new(),
            ..Default::default()
        };
        assert!(MembraneServer::build_server_config(&config).is_err());
    }

    #[test]
    fn test_server_error_display() {
        let err = ServerError::Tls("invalid certificate".to_string());
        assert_eq!(err.to_string(), "TLS error: invalid certificate");
        assert_eq!(ServerError::Finished.to_string(), "stream already finished");
    }
}
