use super::{BoxedStream, Session, SessionKeys, Transport, TransportError};
use async_trait::async_trait;
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tracing::debug;

/// Port assumed when a host carries none
const DEFAULT_HTTP_PORT: u16 = 80;

/// Direct TCP strategy
///
/// Names resolve through the system resolver and sessions carry no identity,
/// so inbound traffic reaches the HTTP listener directly.
#[derive(Debug, Default, Clone)]
pub struct TcpTransport;

impl TcpTransport {
    pub fn new() -> Self {
        Self
    }
}

fn with_default_port(host: &str) -> String {
    let has_port = host
        .rsplit_once(':')
        .is_some_and(|(_, port)| port.parse::<u16>().is_ok());

    if has_port {
        host.to_string()
    } else {
        format!("{}:{}", host, DEFAULT_HTTP_PORT)
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn kind(&self) -> &'static str {
        "tcp"
    }

    async fn open_session(
        &self,
        name: &str,
        _keys: SessionKeys,
    ) -> Result<Box<dyn Session>, TransportError> {
        debug!("TCP session {} needs no setup", name);
        Ok(Box::new(TcpSession))
    }

    async fn resolve(&self, host: &str) -> Result<String, TransportError> {
        let target = with_default_port(host);
        let mut addrs = tokio::net::lookup_host(&target)
            .await
            .map_err(|_| TransportError::Resolve(host.to_string()))?;

        addrs
            .next()
            .map(|addr| addr.to_string())
            .ok_or_else(|| TransportError::Resolve(host.to_string()))
    }
}

struct TcpSession;

#[async_trait]
impl Session for TcpSession {
    fn local_destination(&self) -> Option<&str> {
        None
    }

    async fn dial(&self, address: &str) -> Result<BoxedStream, TransportError> {
        let stream = TcpStream::connect(address)
            .await
            .map_err(|e| TransportError::Dial {
                address: address.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Box::new(stream))
    }

    async fn forward(&self, local: SocketAddr) -> Result<(), TransportError> {
        debug!("TCP transport serves {} directly", local);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_default_port() {
        assert_eq!(with_default_port("example.org"), "example.org:80");
        assert_eq!(with_default_port("127.0.0.1:8080"), "127.0.0.1:8080");
        assert_eq!(with_default_port("localhost:9000"), "localhost:9000");
    }

    #[tokio::test]
    async fn test_resolve_and_dial() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"pong").await.unwrap();
        });

        let transport = TcpTransport::new();
        let resolved = transport.resolve(&addr.to_string()).await.unwrap();
        assert_eq!(resolved, addr.to_string());

        let session = transport
            .open_session("test", SessionKeys::Transient)
            .await
            .unwrap();
        assert!(session.local_destination().is_none());

        let mut stream = session.dial(&resolved).await.unwrap();
        let mut buf = String::new();
        stream.read_to_string(&mut buf).await.unwrap();
        assert_eq!(buf, "pong");
    }

    #[tokio::test]
    async fn test_dial_refused() {
        let session = TcpTransport::new()
            .open_session("test", SessionKeys::Transient)
            .await
            .unwrap();
        assert!(matches!(
            session.dial("127.0.0.1:1").await,
            Err(TransportError::Dial { .. })
        ));
    }
}
