/// Transport seam for reaching other jump services
///
/// Peers and the announce validator only see these traits. The strategy is
/// picked once at startup:
/// - `SamTransport` talks to the overlay router through its SAM v3 bridge
/// - `TcpTransport` dials plain TCP, for clearnet mirrors and local testing

mod sam;
mod tcp;

pub use sam::{SamError, SamReply, SamTransport};
pub use tcp::TcpTransport;

use anonjump_common::JumpError;
use async_trait::async_trait;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};

/// A bidirectional byte stream to a remote destination
pub trait OverlayStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> OverlayStream for T {}

pub type BoxedStream = Box<dyn OverlayStream>;

/// Which keys a session runs under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKeys {
    /// Throwaway identity, used for outbound fetches
    Transient,
    /// Long-term identity stored under the keys path, used by the service
    Persistent,
}

/// Opens sessions and resolves logical hostnames
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short strategy name for logs
    fn kind(&self) -> &'static str;

    /// Establish a session identified by `name`
    async fn open_session(
        &self,
        name: &str,
        keys: SessionKeys,
    ) -> Result<Box<dyn Session>, TransportError>;

    /// Resolve a logical hostname to a dialable address
    async fn resolve(&self, host: &str) -> Result<String, TransportError>;
}

/// An established session
#[async_trait]
pub trait Session: Send + Sync {
    /// Our own address in this session, when the transport has one
    fn local_destination(&self) -> Option<&str>;

    /// Open a stream to a resolved address
    async fn dial(&self, address: &str) -> Result<BoxedStream, TransportError>;

    /// Deliver inbound streams to a local listener for the session's lifetime
    async fn forward(&self, local: SocketAddr) -> Result<(), TransportError>;
}

/// Transport errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Session setup failed: {0}")]
    Session(String),

    #[error("Failed to resolve {0}")]
    Resolve(String),

    #[error("Failed to dial {address}: {reason}")]
    Dial { address: String, reason: String },

    #[error(transparent)]
    Sam(#[from] SamError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<TransportError> for JumpError {
    fn from(err: TransportError) -> Self {
        JumpError::Transport(err.to_string())
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! In-memory transport for tests

    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// What a dialed address answers with
    #[derive(Clone)]
    pub enum Reply {
        /// Write these bytes and close
        Body(Vec<u8>),
        /// Never answer
        Hang,
        /// Refuse the dial
        Refuse,
    }

    #[derive(Clone, Default)]
    pub struct MockTransport {
        names: Arc<Mutex<HashMap<String, String>>>,
        replies: Arc<Mutex<HashMap<String, Reply>>>,
        requests: Arc<Mutex<Vec<String>>>,
        sessions: Arc<AtomicUsize>,
        refuse_sessions: Arc<Mutex<bool>>,
        delay: Arc<Mutex<Option<Duration>>>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Make `host` resolvable and answer dials with `reply`
        pub fn serve(&self, host: &str, reply: Reply) {
            let address = format!("addr-of-{}", host);
            self.names.lock().unwrap().insert(host.to_string(), address.clone());
            self.replies.lock().unwrap().insert(address, reply);
        }

        pub fn serve_body(&self, host: &str, body: &str) {
            self.serve(host, Reply::Body(body.as_bytes().to_vec()));
        }

        /// Make `host` resolvable without serving anything
        pub fn register_name(&self, host: &str) {
            self.names
                .lock()
                .unwrap()
                .insert(host.to_string(), format!("addr-of-{}", host));
        }

        pub fn refuse_sessions(&self, refuse: bool) {
            *self.refuse_sessions.lock().unwrap() = refuse;
        }

        /// Delay every reply body, to observe in-flight fetches
        pub fn set_delay(&self, delay: Duration) {
            *self.delay.lock().unwrap() = Some(delay);
        }

        pub fn requests(&self) -> Vec<String> {
            self.requests.lock().unwrap().clone()
        }

        pub fn sessions_opened(&self) -> usize {
            self.sessions.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        fn kind(&self) -> &'static str {
            "mock"
        }

        async fn open_session(
            &self,
            name: &str,
            _keys: SessionKeys,
        ) -> Result<Box<dyn Session>, TransportError> {
            if *self.refuse_sessions.lock().unwrap() {
                return Err(TransportError::Session(format!("refused {}", name)));
            }
            self.sessions.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(MockSession {
                transport: self.clone(),
            }))
        }

        async fn resolve(&self, host: &str) -> Result<String, TransportError> {
            self.names
                .lock()
                .unwrap()
                .get(host)
                .cloned()
                .ok_or_else(|| TransportError::Resolve(host.to_string()))
        }
    }

    struct MockSession {
        transport: MockTransport,
    }

    #[async_trait]
    impl Session for MockSession {
        fn local_destination(&self) -> Option<&str> {
            Some("mock-local")
        }

        async fn dial(&self, address: &str) -> Result<BoxedStream, TransportError> {
            let reply = self.transport.replies.lock().unwrap().get(address).cloned();
            let delay = *self.transport.delay.lock().unwrap();
            let requests = self.transport.requests.clone();

            let reply = match reply {
                Some(Reply::Refuse) | None => {
                    return Err(TransportError::Dial {
                        address: address.to_string(),
                        reason: "refused".to_string(),
                    })
                }
                Some(reply) => reply,
            };

            let (client, mut server) = tokio::io::duplex(64 * 1024);
            tokio::spawn(async move {
                let mut buf = vec![0u8; 1024];
                let n = server.read(&mut buf).await.unwrap_or(0);
                requests
                    .lock()
                    .unwrap()
                    .push(String::from_utf8_lossy(&buf[..n]).to_string());

                match reply {
                    Reply::Body(body) => {
                        if let Some(delay) = delay {
                            tokio::time::sleep(delay).await;
                        }
                        let _ = server.write_all(&body).await;
                        let _ = server.shutdown().await;
                    }
                    Reply::Hang => {
                        tokio::time::sleep(Duration::from_secs(3600)).await;
                    }
                    Reply::Refuse => {}
                }
            });

            Ok(Box::new(client))
        }

        async fn forward(&self, _local: SocketAddr) -> Result<(), TransportError> {
            Ok(())
        }
    }
}
