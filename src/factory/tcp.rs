//! Plain TCP connection factory

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::debug;

use super::ConnectionFactory;
use crate::cluster::ConnectionParams;

/// Opens keepalive-enabled TCP streams to `address:port`
#[derive(Debug, Clone)]
pub struct TcpConnectionFactory {
    params: ConnectionParams,
}

impl TcpConnectionFactory {
    pub fn new(params: ConnectionParams) -> Self {
        Self { params }
    }

    fn socket_addr(&self, address: &str) -> String {
        format!("{}:{}", address, self.params.port)
    }
}

#[async_trait]
impl ConnectionFactory for TcpConnectionFactory {
    type Connection = TcpStream;

    async fn create(&self, address: &str) -> Result<TcpStream> {
        let addr = self.socket_addr(address);

        debug!(node = %address, addr = %addr, "Creating new connection");

        let stream = tokio::time::timeout(self.params.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| anyhow::anyhow!("Connection to {} timed out", addr))?
            .with_context(|| format!("Failed to connect to {}", addr))?;

        // Probe dead peers while the connection sits idle in the pool
        let keepalive = socket2::TcpKeepalive::new()
            .with_time(Duration::from_secs(60))
            .with_interval(Duration::from_secs(10));
        let socket = socket2::SockRef::from(&stream);
        socket.set_tcp_keepalive(&keepalive)?;
        socket.set_nodelay(true)?;

        Ok(stream)
    }

    async fn destroy(&self, address: &str, mut connection: TcpStream) {
        if let Err(e) = connection.shutdown().await {
            debug!(node = %address, error = %e, "Error shutting down connection");
        }
    }

    fn validate(&self, address: &str, connection: &TcpStream) -> bool {
        let mut probe = [0u8; 1];
        match connection.try_read(&mut probe) {
            Ok(0) => {
                debug!(node = %address, "Connection was closed by remote");
                false
            }
            Ok(_) => {
                debug!(node = %address, "Unexpected data on idle connection");
                false
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => true,
            Err(e) => {
                debug!(node = %address, error = %e, "Connection failed validation");
                false
            }
        }
    }
}
