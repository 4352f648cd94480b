//! Transport abstraction consumed by the pool

use async_trait::async_trait;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// A byte-stream connection the pool can hold on to
///
/// Read and write deadlines are enforced by [`PooledConnection`](crate::PooledConnection),
/// so implementations only forward to the underlying transport.
#[async_trait]
pub trait Connection: Send + 'static {
    /// Read into `buf`, returning the number of bytes read
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write from `buf`, returning the number of bytes written
    async fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Shut the connection down
    async fn close(&mut self) -> io::Result<()>;
}

/// Capability that establishes new connections to the backend
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    type Connection: Connection;

    async fn create(&self) -> io::Result<Self::Connection>;
}

#[async_trait]
impl Connection for TcpStream {
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        AsyncReadExt::read(self, buf).await
    }

    async fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        AsyncWriteExt::write(self, buf).await
    }

    async fn close(&mut self) -> io::Result<()> {
        AsyncWriteExt::shutdown(self).await
    }
}

/// Dials TCP connections to a single `host:port` endpoint
///
/// # Examples
///
/// ```
/// use esox_connpool::TcpConnectionFactory;
/// use std::time::Duration;
///
/// let factory = TcpConnectionFactory::new("127.0.0.1:6379")
///     .with_dial_timeout(Duration::from_secs(1));
///
/// assert_eq!(factory.addr(), "127.0.0.1:6379");
/// ```
#[derive(Debug, Clone)]
pub struct TcpConnectionFactory {
    addr: String,
    dial_timeout: Duration,
}

impl TcpConnectionFactory {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            dial_timeout: Duration::from_secs(5),
        }
    }

    /// Set the timeout for establishing a connection
    pub fn with_dial_timeout(mut self, dial_timeout: Duration) -> Self {
        self.dial_timeout = dial_timeout;
        self
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

#[async_trait]
impl ConnectionFactory for TcpConnectionFactory {
    type Connection = TcpStream;

    async fn create(&self) -> io::Result<TcpStream> {
        match timeout(self.dial_timeout, TcpStream::connect(self.addr.as_str())).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!(
                    "Connection to {} timed out after {:?}",
                    self.addr, self.dial_timeout
                ),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Pool, PoolConfiguration};
    use tokio::net::TcpListener;

    async fn echo_server() -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    while let Ok(n) = AsyncReadExt::read(&mut stream, &mut buf).await {
                        if n == 0 || AsyncWriteExt::write_all(&mut stream, &buf[..n]).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });

        addr
    }

    #[tokio::test]
    async fn tcp_factory_dials_listener() {
        let addr = echo_server().await;
        let factory = TcpConnectionFactory::new(addr.to_string());

        let mut stream = factory.create().await.unwrap();
        assert_eq!(stream.peer_addr().unwrap(), addr);
        Connection::close(&mut stream).await.unwrap();
    }

    #[tokio::test]
    async fn tcp_factory_reports_refused_dial() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let factory = TcpConnectionFactory::new(addr.to_string());
        assert!(factory.create().await.is_err());
    }

    #[tokio::test]
    async fn pooled_tcp_connection_round_trip() {
        let addr = echo_server().await;
        let config = PoolConfiguration::new()
            .with_max_capacity(2)
            .with_initial_idle(1);
        let pool = Pool::new(TcpConnectionFactory::new(addr.to_string()), config)
            .await
            .unwrap();

        let first_id = {
            let mut conn = pool.acquire().await.unwrap();
            assert_eq!(conn.write(b"ping").await.unwrap(), 4);

            let mut buf = [0u8; 4];
            let mut read = 0;
            while read < buf.len() {
                read += conn.read(&mut buf[read..]).await.unwrap();
            }
            assert_eq!(&buf, b"ping");
            conn.id()
        };

        let conn = pool.acquire().await.unwrap();
        assert_eq!(conn.id(), first_id);
        assert_eq!(pool.total_count(), 1);
    }
}
