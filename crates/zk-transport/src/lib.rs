// Length-prefixed TCP transport for the ZooKeeper client protocol.
//
// Frames on the wire are `len:i32 | payload`. Writers are handed complete
// frames (the wire codec writes the prefix); readers hand back payloads with
// the prefix stripped.
use anyhow::{Context, Result, anyhow};
use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};

pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Transport-level configuration defaults.
///
/// ```
/// use zk_transport::TransportConfig;
///
/// let config = TransportConfig::default();
/// assert!(config.max_frame_bytes > 0);
/// assert!(config.nodelay);
/// ```
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub max_frame_bytes: usize,
    pub connect_timeout: Duration,
    pub nodelay: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            nodelay: true,
        }
    }
}

/// Stable connection identifier used for tracing/logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone)]
/// Metadata about a live connection.
///
/// ```
/// use zk_transport::{ConnectionId, ConnectionInfo};
/// use std::net::SocketAddr;
///
/// let info = ConnectionInfo {
///     id: ConnectionId(42),
///     peer_addr: "127.0.0.1:2181".parse::<SocketAddr>().expect("addr"),
/// };
/// assert_eq!(info.id.0, 42);
/// ```
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub peer_addr: SocketAddr,
}

/// Opens a connection to `host:port`, bounded by the configured connect timeout.
pub async fn connect(host: &str, port: u16, config: &TransportConfig) -> Result<Connection> {
    let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect((host, port)))
        .await
        .map_err(|_| anyhow!("connect to {host}:{port} timed out after {:?}", config.connect_timeout))?
        .with_context(|| format!("connect to {host}:{port}"))?;
    Connection::new(stream, config)
}

/// TCP listener that yields framed connections. Used by test servers.
#[derive(Debug)]
pub struct TcpServer {
    listener: TcpListener,
    transport: TransportConfig,
}

impl TcpServer {
    pub async fn bind(addr: SocketAddr, transport: TransportConfig) -> Result<Self> {
        let listener = TcpListener::bind(addr).await.context("bind TCP server")?;
        Ok(Self {
            listener,
            transport,
        })
    }

    pub async fn accept(&self) -> Result<Connection> {
        let (stream, _) = self.listener.accept().await.context("accept TCP connection")?;
        Connection::new(stream, &self.transport)
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().context("read TCP local address")
    }
}

/// A connected socket before it is split into reader and writer halves.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    info: ConnectionInfo,
    max_frame_bytes: usize,
    scratch: BytesMut,
}

impl Connection {
    fn new(stream: TcpStream, config: &TransportConfig) -> Result<Self> {
        stream
            .set_nodelay(config.nodelay)
            .context("set TCP_NODELAY")?;
        let info = ConnectionInfo {
            id: ConnectionId::next(),
            peer_addr: stream.peer_addr().context("read peer address")?,
        };
        tracing::debug!(conn_id = info.id.0, peer = %info.peer_addr, "connection established");
        Ok(Self {
            stream,
            info,
            max_frame_bytes: config.max_frame_bytes,
            scratch: BytesMut::new(),
        })
    }

    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    /// Writes one complete frame, length prefix included.
    pub async fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        self.stream.write_all(frame).await.context("write frame")
    }

    /// Reads one frame payload. `None` means the peer closed cleanly.
    pub async fn read_frame(&mut self) -> Result<Option<Bytes>> {
        read_frame_into(&mut self.stream, &mut self.scratch, self.max_frame_bytes).await
    }

    pub fn split(self) -> (FrameReader, FrameWriter) {
        let (read, write) = self.stream.into_split();
        (
            FrameReader {
                read,
                scratch: self.scratch,
                max_frame_bytes: self.max_frame_bytes,
                id: self.info.id,
            },
            FrameWriter {
                write,
                id: self.info.id,
            },
        )
    }
}

#[derive(Debug)]
pub struct FrameReader {
    read: OwnedReadHalf,
    scratch: BytesMut,
    max_frame_bytes: usize,
    id: ConnectionId,
}

impl FrameReader {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Reads one frame payload. `None` means the peer closed cleanly.
    pub async fn read_frame(&mut self) -> Result<Option<Bytes>> {
        read_frame_into(&mut self.read, &mut self.scratch, self.max_frame_bytes).await
    }
}

#[derive(Debug)]
pub struct FrameWriter {
    write: OwnedWriteHalf,
    id: ConnectionId,
}

impl FrameWriter {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Writes one complete frame, length prefix included.
    pub async fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        self.write.write_all(frame).await.context("write frame")
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.write.shutdown().await.context("shutdown writer")
    }
}

async fn read_frame_into<R>(
    read: &mut R,
    scratch: &mut BytesMut,
    max_frame_bytes: usize,
) -> Result<Option<Bytes>>
where
    R: AsyncReadExt + Unpin,
{
    let mut header_bytes = [0u8; zk_wire::LENGTH_SIZE];
    match read.read_exact(&mut header_bytes).await {
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err).context("read frame header"),
    }
    let length = i32::from_be_bytes(header_bytes);
    if length < 0 {
        return Err(zk_wire::Error::NegativeLength(length).into());
    }
    let length = length as usize;

    // Enforce the cap before allocating.
    if length > max_frame_bytes {
        return Err(zk_wire::Error::FrameTooLarge {
            length,
            cap: max_frame_bytes,
        }
        .into());
    }

    scratch.clear();
    scratch.resize(length, 0u8);
    read.read_exact(&mut scratch[..])
        .await
        .context("read frame payload")?;
    Ok(Some(scratch.split().freeze()))
}
