/// SAM v3 bridge client
///
/// Every command is one line on a TCP connection to the router's bridge.
/// A session lives as long as its control connection; each outbound stream
/// and each forward needs a connection of its own.

use super::{BoxedStream, Session, SessionKeys, Transport, TransportError};
use crate::directory::write_atomic;
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Protocol versions we can speak
const HELLO: &str = "HELLO VERSION MIN=3.1 MAX=3.3";

/// EdDSA-SHA512-Ed25519
const SIGNATURE_TYPE: u32 = 7;

/// Longest reply line we accept from the bridge
const MAX_REPLY_LEN: usize = 64 * 1024;

/// Transport backed by a SAM bridge
pub struct SamTransport {
    bridge: String,
    keys_dir: PathBuf,
    session_counter: AtomicU64,
}

impl SamTransport {
    pub fn new(bridge: impl Into<String>, keys_dir: impl Into<PathBuf>) -> Self {
        Self {
            bridge: bridge.into(),
            keys_dir: keys_dir.into(),
            session_counter: AtomicU64::new(0),
        }
    }

    /// Private keys for a persistent session, generated on first use
    async fn persistent_keys(
        &self,
        conn: &mut SamConnection,
        name: &str,
    ) -> Result<String, TransportError> {
        let path = self.keys_dir.join(format!("{}.dat", name));
        match tokio::fs::read_to_string(&path).await {
            Ok(keys) if !keys.trim().is_empty() => return Ok(keys.trim().to_string()),
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let reply = conn
            .command(&format!("DEST GENERATE SIGNATURE_TYPE={}", SIGNATURE_TYPE))
            .await?;
        reply.expect_kind("DEST", "REPLY")?;
        let private = reply.require("PRIV")?.to_string();

        write_atomic(&path, private.as_bytes()).await?;
        info!("Generated new service keys at {:?}", path);
        Ok(private)
    }
}

#[async_trait]
impl Transport for SamTransport {
    fn kind(&self) -> &'static str {
        "sam"
    }

    async fn open_session(
        &self,
        name: &str,
        keys: SessionKeys,
    ) -> Result<Box<dyn Session>, TransportError> {
        let mut control = SamConnection::open(&self.bridge).await?;

        let destination = match keys {
            SessionKeys::Transient => "TRANSIENT".to_string(),
            SessionKeys::Persistent => self.persistent_keys(&mut control, name).await?,
        };

        // Session ids must be unique on the bridge while the old one closes
        let id = format!(
            "{}-{}",
            name,
            self.session_counter.fetch_add(1, Ordering::Relaxed)
        );
        let reply = control
            .command(&format!(
                "SESSION CREATE STYLE=STREAM ID={} DESTINATION={} SIGNATURE_TYPE={}",
                id, destination, SIGNATURE_TYPE
            ))
            .await?;
        reply.expect_kind("SESSION", "STATUS")?;
        reply.ok()?;

        let reply = control.command("NAMING LOOKUP NAME=ME").await?;
        reply.expect_kind("NAMING", "REPLY")?;
        reply.ok()?;
        let local = reply.require("VALUE")?.to_string();

        debug!("SAM session {} established", id);

        Ok(Box::new(SamSession {
            id,
            bridge: self.bridge.clone(),
            local_destination: local,
            _control: control,
            forwards: Mutex::new(Vec::new()),
        }))
    }

    async fn resolve(&self, host: &str) -> Result<String, TransportError> {
        let mut conn = SamConnection::open(&self.bridge).await?;
        let reply = conn.command(&format!("NAMING LOOKUP NAME={}", host)).await?;
        reply.expect_kind("NAMING", "REPLY")?;
        reply.ok().map_err(|_| TransportError::Resolve(host.to_string()))?;
        Ok(reply.require("VALUE")?.to_string())
    }
}

/// A SAM stream session; closing the control connection ends it
struct SamSession {
    id: String,
    bridge: String,
    local_destination: String,
    _control: SamConnection,
    forwards: Mutex<Vec<SamConnection>>,
}

#[async_trait]
impl Session for SamSession {
    fn local_destination(&self) -> Option<&str> {
        Some(&self.local_destination)
    }

    async fn dial(&self, address: &str) -> Result<BoxedStream, TransportError> {
        let mut conn = SamConnection::open(&self.bridge).await?;
        let reply = conn
            .command(&format!(
                "STREAM CONNECT ID={} DESTINATION={} SILENT=false",
                self.id, address
            ))
            .await?;
        reply.expect_kind("STREAM", "STATUS")?;
        reply.ok().map_err(|e| TransportError::Dial {
            address: address.to_string(),
            reason: e.to_string(),
        })?;

        // The reader may already hold the first bytes of the stream
        Ok(Box::new(conn.inner))
    }

    async fn forward(&self, local: SocketAddr) -> Result<(), TransportError> {
        let mut conn = SamConnection::open(&self.bridge).await?;
        let reply = conn
            .command(&format!(
                "STREAM FORWARD ID={} PORT={} HOST={} SILENT=true",
                self.id,
                local.port(),
                local.ip()
            ))
            .await?;
        reply.expect_kind("STREAM", "STATUS")?;
        reply.ok()?;

        info!("SAM session {} forwarding to {}", self.id, local);
        self.forwards.lock().await.push(conn);
        Ok(())
    }
}

/// One line-oriented connection to the bridge
struct SamConnection {
    inner: BufReader<TcpStream>,
}

impl SamConnection {
    /// Connect to the bridge and complete the HELLO handshake
    async fn open(bridge: &str) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(bridge)
            .await
            .map_err(|e| TransportError::Session(format!("SAM bridge {}: {}", bridge, e)))?;

        let mut conn = Self {
            inner: BufReader::new(stream),
        };
        let reply = conn.command(HELLO).await?;
        reply.expect_kind("HELLO", "REPLY")?;
        reply.ok()?;
        debug!(
            "SAM bridge {} speaks version {}",
            bridge,
            reply.get("VERSION").unwrap_or("?")
        );

        Ok(conn)
    }

    async fn command(&mut self, line: &str) -> Result<SamReply, TransportError> {
        self.inner.get_mut().write_all(line.as_bytes()).await?;
        self.inner.get_mut().write_all(b"\n").await?;

        let mut reply = String::new();
        let n = (&mut self.inner)
            .take(MAX_REPLY_LEN as u64)
            .read_line(&mut reply)
            .await?;
        if n == 0 {
            return Err(SamError::Closed.into());
        }

        Ok(SamReply::parse(&reply)?)
    }
}

/// A parsed bridge reply: `TOPIC KIND KEY=VALUE ...`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamReply {
    pub topic: String,
    pub kind: String,
    pub fields: HashMap<String, String>,
}

impl SamReply {
    /// Parse a reply line; values may be double-quoted
    pub fn parse(line: &str) -> Result<Self, SamError> {
        let tokens = tokenize(line.trim_end_matches(['\r', '\n']));
        let mut tokens = tokens.into_iter();

        let topic = tokens
            .next()
            .ok_or_else(|| SamError::Malformed(line.to_string()))?;
        let kind = tokens
            .next()
            .ok_or_else(|| SamError::Malformed(line.to_string()))?;

        let fields = tokens
            .map(|token| match token.split_once('=') {
                Some((key, value)) => (key.to_string(), value.to_string()),
                None => (token, String::new()),
            })
            .collect();

        Ok(Self {
            topic,
            kind,
            fields,
        })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn require(&self, key: &str) -> Result<&str, SamError> {
        self.get(key)
            .ok_or_else(|| SamError::MissingField(key.to_string()))
    }

    /// Check the reply is the one a command expects
    pub fn expect_kind(&self, topic: &str, kind: &str) -> Result<(), SamError> {
        if self.topic == topic && self.kind == kind {
            Ok(())
        } else {
            Err(SamError::Unexpected(format!("{} {}", self.topic, self.kind)))
        }
    }

    /// `RESULT=OK`, or the bridge's error
    pub fn ok(&self) -> Result<(), SamError> {
        match self.get("RESULT") {
            Some("OK") => Ok(()),
            None if self.topic == "DEST" => Ok(()),
            result => Err(SamError::Rejected {
                result: result.unwrap_or("NONE").to_string(),
                message: self.get("MESSAGE").unwrap_or_default().to_string(),
            }),
        }
    }
}

/// Split on spaces, keeping `KEY="quoted value"` together
fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '"' => quoted = !quoted,
            '\\' if quoted => {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            }
            ' ' | '\t' if !quoted => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }

    tokens
}

/// SAM protocol errors
#[derive(Debug, thiserror::Error)]
pub enum SamError {
    #[error("Bridge closed the connection")]
    Closed,

    #[error("Malformed reply: {0}")]
    Malformed(String),

    #[error("Unexpected reply: {0}")]
    Unexpected(String),

    #[error("Reply missing field {0}")]
    MissingField(String),

    #[error("Bridge rejected command: {result} {message}")]
    Rejected { result: String, message: String },
}
