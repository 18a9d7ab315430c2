use std::{net::SocketAddr, time::Duration};

use tokio::net::TcpStream;

use crate::error::{Error, ErrorKind, Result};

/// Dials new TCP connections for a client pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpConnector {
    addr: SocketAddr,
    connect_timeout: Duration,
}

impl TcpConnector {
    #[must_use]
    pub fn new(addr: SocketAddr, connect_timeout: Duration) -> Self {
        Self {
            addr,
            connect_timeout,
        }
    }

    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// # Errors
    ///
    /// Returns `Timeout` if the handshake takes longer than the connect
    /// timeout, otherwise `TcpConnectFailed`.
    pub async fn connect(&self) -> Result<TcpStream> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(self.addr))
            .await
            .map_err(|_| {
                Error::new(
                    ErrorKind::Timeout,
                    format!("connect to {} timed out", self.addr),
                )
            })?
            .map_err(|e| Error::new(ErrorKind::TcpConnectFailed, format!("{}: {e}", self.addr)))?;
        stream
            .set_nodelay(true)
            .map_err(|e| Error::new(ErrorKind::TcpConnectFailed, e.to_string()))?;
        tracing::debug!("connected to {}", self.addr);
        Ok(stream)
    }
}
