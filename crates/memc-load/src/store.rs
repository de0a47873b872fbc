//! Remote key-value stores
//!
//! Workers only need a single operation, [`KvStore::put`]. Each worker owns its
//! store exclusively; [`StoreConnector`] builds one per worker.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tracing::debug;

/// Longest key memcached accepts.
pub const MAX_KEY_LEN: usize = 250;

#[derive(Error, Debug)]
pub enum StoreError {
    /// Empty, too long, or contains whitespace or control bytes
    #[error("invalid key '{0}'")]
    InvalidKey(String),

    /// TCP connect failed
    #[error("connection to {address} failed: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// Read or write on an open connection failed
    #[error("io error talking to {address}: {source}")]
    Io {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// Server hung up before replying
    #[error("{address} closed the connection")]
    Closed { address: String },

    /// Reply other than `STORED`
    #[error("{address} rejected the write: {reply}")]
    Rejected { address: String, reply: String },

    /// Connect and write did not finish in time
    #[error("no reply from {address} within {timeout:?}")]
    Timeout { address: String, timeout: Duration },

    /// Failure from a non-memcached store
    #[error("{0}")]
    Other(String),
}

#[async_trait]
pub trait KvStore: Send {
    async fn put(&mut self, key: &str, value: &[u8]) -> Result<(), StoreError>;
}

/// Creates the store a single worker writes through.
pub trait StoreConnector: Send + Sync {
    fn connect(&self, category: &str, address: &str, timeout: Duration) -> Box<dyn KvStore>;
}

/// memcached text-protocol client.
///
/// Connects on first use. Any failure drops the connection so the next put
/// starts from a fresh one.
pub struct MemcacheClient {
    address: String,
    timeout: Duration,
    conn: Option<BufStream<TcpStream>>,
}

impl MemcacheClient {
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            timeout,
            conn: None,
        }
    }

    async fn connect(&self) -> Result<BufStream<TcpStream>, StoreError> {
        let stream = TcpStream::connect(&self.address)
            .await
            .map_err(|source| StoreError::Connect {
                address: self.address.clone(),
                source,
            })?;
        stream.set_nodelay(true).map_err(|source| StoreError::Connect {
            address: self.address.clone(),
            source,
        })?;
        debug!(address = %self.address, "connected to memcached");
        Ok(BufStream::new(stream))
    }

    async fn set(&self, conn: &mut BufStream<TcpStream>, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            address: self.address.clone(),
            source,
        };

        let header = format!("set {} 0 0 {}\r\n", key, value.len());
        conn.write_all(header.as_bytes()).await.map_err(io_err)?;
        conn.write_all(value).await.map_err(io_err)?;
        conn.write_all(b"\r\n").await.map_err(io_err)?;
        conn.flush().await.map_err(io_err)?;

        let mut reply = String::new();
        if conn.read_line(&mut reply).await.map_err(io_err)? == 0 {
            return Err(StoreError::Closed {
                address: self.address.clone(),
            });
        }

        match reply.trim_end() {
            "STORED" => Ok(()),
            other => Err(StoreError::Rejected {
                address: self.address.clone(),
                reply: other.to_string(),
            }),
        }
    }
}

#[async_trait]
impl KvStore for MemcacheClient {
    async fn put(&mut self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        validate_key(key)?;

        let timeout = self.timeout;
        let cached = self.conn.take();
        let client = &*self;
        let attempt = async move {
            let mut conn = match cached {
                Some(conn) => conn,
                None => client.connect().await?,
            };
            client.set(&mut conn, key, value).await?;
            Ok::<_, StoreError>(conn)
        };
        let outcome = tokio::time::timeout(timeout, attempt).await;

        match outcome {
            Ok(Ok(conn)) => {
                self.conn = Some(conn);
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(StoreError::Timeout {
                address: self.address.clone(),
                timeout,
            }),
        }
    }
}

/// Builds a [`MemcacheClient`] per worker.
#[derive(Debug, Default, Clone, Copy)]
pub struct MemcacheConnector;

impl StoreConnector for MemcacheConnector {
    fn connect(&self, _category: &str, address: &str, timeout: Duration) -> Box<dyn KvStore> {
        Box::new(MemcacheClient::new(address, timeout))
    }
}

/// memcached keys: 1..=250 bytes, no whitespace or control characters.
pub fn validate_key(key: &str) -> Result<(), StoreError> {
    let valid = !key.is_empty()
        && key.len() <= MAX_KEY_LEN
        && !key.bytes().any(|b| b.is_ascii_whitespace() || b.is_ascii_control());
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, BufReader};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    /// Minimal memcached: answers every `set` with `reply` and reports what it stored.
    async fn fake_memcached(reply: &'static str) -> (String, mpsc::UnboundedReceiver<(String, Vec<u8>)>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    return;
                };
                let tx = tx.clone();
                tokio::spawn(async move {
                    let mut socket = BufReader::new(socket);
                    loop {
                        let mut header = String::new();
                        if socket.read_line(&mut header).await.unwrap_or(0) == 0 {
                            return;
                        }
                        let parts: Vec<&str> = header.split_whitespace().collect();
                        let len: usize = parts[4].parse().unwrap();
                        let mut body = vec![0u8; len + 2];
                        socket.read_exact(&mut body).await.unwrap();
                        body.truncate(len);
                        let _ = tx.send((parts[1].to_string(), body));
                        socket.get_mut().write_all(reply.as_bytes()).await.unwrap();
                    }
                });
            }
        });

        (address, rx)
    }

    #[tokio::test]
    async fn test_put_sends_set_command() {
        let (address, mut stored) = fake_memcached("STORED\r\n").await;
        let mut client = MemcacheClient::new(&address, Duration::from_secs(5));

        client.put("idfa:abc", b"\x0a\x01\x2a").await.unwrap();
        client.put("gaid:def", b"payload").await.unwrap();

        assert_eq!(stored.recv().await.unwrap(), ("idfa:abc".to_string(), b"\x0a\x01\x2a".to_vec()));
        assert_eq!(stored.recv().await.unwrap(), ("gaid:def".to_string(), b"payload".to_vec()));
    }

    #[tokio::test]
    async fn test_put_reports_rejection() {
        let (address, _stored) = fake_memcached("SERVER_ERROR out of memory\r\n").await;
        let mut client = MemcacheClient::new(&address, Duration::from_secs(5));

        let err = client.put("idfa:abc", b"v").await.unwrap_err();
        match err {
            StoreError::Rejected { reply, .. } => assert_eq!(reply, "SERVER_ERROR out of memory"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_put_times_out_on_silent_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let _server = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            std::future::pending::<()>().await;
        });

        let mut client = MemcacheClient::new(&address, Duration::from_millis(100));
        let err = client.put("idfa:abc", b"v").await.unwrap_err();
        assert!(matches!(err, StoreError::Timeout { .. }), "got {err}");
    }

    #[tokio::test]
    async fn test_put_fails_when_nothing_listens() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let mut client = MemcacheClient::new(&address, Duration::from_secs(2));
        let err = client.put("idfa:abc", b"v").await.unwrap_err();
        assert!(matches!(err, StoreError::Connect { .. }), "got {err}");
    }

    #[test]
    fn test_validate_key() {
        assert!(validate_key("idfa:1rfw452y52g2gq4g").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("idfa:has space").is_err());
        assert!(validate_key("idfa:line\nbreak").is_err());
        assert!(validate_key(&"k".repeat(MAX_KEY_LEN)).is_ok());
        assert!(validate_key(&"k".repeat(MAX_KEY_LEN + 1)).is_err());
    }
}
