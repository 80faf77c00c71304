//! One-directional message queues between the master and its workers.
//!
//! The master owns every bound endpoint. Two of them fan tasks out to workers
//! ([`Outbox`]) and three of them fan results in ([`Inbox`]). Workers connect
//! with a [`Puller`] to receive tasks and a [`Pusher`] to send announcements
//! and results. All frames are length-prefixed; payloads are JSON.

use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, FramedRead, LengthDelimitedCodec};
use tracing::{debug, info, warn};

use crate::codec;
use crate::error::{Error, Result};

/// Largest frame accepted on any channel. Map tasks carry whole input chunks.
pub const MAX_FRAME_LEN: usize = 1 << 30;

/// The five logical channels, each bound at a fixed offset from the base port.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Channel {
    /// master -> map workers
    MapTasks,
    /// master -> reduce workers
    ReduceTasks,
    /// workers -> master, empty payload
    Liveness,
    /// map workers -> master
    MapResults,
    /// reduce workers -> master
    ReduceResults,
}

impl Channel {
    pub const ALL: [Channel; 5] = [
        Channel::MapTasks,
        Channel::ReduceTasks,
        Channel::Liveness,
        Channel::MapResults,
        Channel::ReduceResults,
    ];

    pub const MAX_OFFSET: u16 = 4;

    pub fn offset(self) -> u16 {
        match self {
            Channel::MapTasks => 0,
            Channel::ReduceTasks => 1,
            Channel::Liveness => 2,
            Channel::MapResults => 3,
            Channel::ReduceResults => 4,
        }
    }

    /// Port of this channel. A base port too close to `u16::MAX` to hold the
    /// offset is a validation error.
    pub fn port(self, base_port: u16) -> Result<u16> {
        base_port.checked_add(self.offset()).ok_or_else(|| {
            Error::Validation(format!(
                "base port {base_port} leaves no room for the {self} channel"
            ))
        })
    }

    pub fn addr(self, host: IpAddr, base_port: u16) -> Result<SocketAddr> {
        Ok(SocketAddr::new(host, self.port(base_port)?))
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Channel::MapTasks => "map-tasks",
            Channel::ReduceTasks => "reduce-tasks",
            Channel::Liveness => "liveness",
            Channel::MapResults => "map-results",
            Channel::ReduceResults => "reduce-results",
        };
        f.write_str(name)
    }
}

fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LEN)
        .new_codec()
}

async fn bind_listener(addr: SocketAddr) -> Result<(TcpListener, SocketAddr)> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| Error::Transport { addr, source })?;
    let local_addr = listener
        .local_addr()
        .map_err(|source| Error::Transport { addr, source })?;
    Ok((listener, local_addr))
}

async fn connect_stream(addr: SocketAddr) -> Result<TcpStream> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|source| Error::Transport { addr, source })?;
    stream
        .set_nodelay(true)
        .map_err(|source| Error::Transport { addr, source })?;
    Ok(stream)
}

/////////////////////////////////////////////////////////////////////////////
// Bound endpoints (master side)
/////////////////////////////////////////////////////////////////////////////

/// A bound fan-out queue. Messages wait in the queue until a connected
/// [`Puller`] asks for one; each request is answered with exactly one message.
pub struct Outbox {
    local_addr: SocketAddr,
    queue: mpsc::UnboundedSender<Bytes>,
    accept: JoinHandle<()>,
}

impl Outbox {
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let (listener, local_addr) = bind_listener(addr).await?;
        let (queue, rx) = mpsc::unbounded_channel();
        let rx = Arc::new(Mutex::new(rx));
        let accept = tokio::spawn(serve_pullers(listener, rx, queue.clone()));
        info!(%local_addr, "outbox bound");
        Ok(Self {
            local_addr,
            queue,
            accept,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Queue one message. Never blocks: the queue is unbounded.
    pub fn send<T: Serialize>(&self, msg: &T) -> Result<()> {
        self.send_frame(codec::to_json(msg)?)
    }

    pub fn send_frame(&self, frame: Bytes) -> Result<()> {
        self.queue
            .send(frame)
            .map_err(|_| Error::Disconnected(format!("outbox {}", self.local_addr)))
    }
}

impl Drop for Outbox {
    fn drop(&mut self) {
        self.accept.abort();
    }
}

async fn serve_pullers(
    listener: TcpListener,
    queue: Arc<Mutex<mpsc::UnboundedReceiver<Bytes>>>,
    requeue: mpsc::UnboundedSender<Bytes>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!(%peer, "puller connected");
                let _ = stream.set_nodelay(true);
                tokio::spawn(serve_puller(
                    Framed::new(stream, frame_codec()),
                    peer,
                    queue.clone(),
                    requeue.clone(),
                ));
            }
            Err(e) => warn!("accept failed: {e}"),
        }
    }
}

async fn serve_puller(
    mut frames: Framed<TcpStream, LengthDelimitedCodec>,
    peer: SocketAddr,
    queue: Arc<Mutex<mpsc::UnboundedReceiver<Bytes>>>,
    requeue: mpsc::UnboundedSender<Bytes>,
) {
    // Every incoming frame is a credit for exactly one message.
    while let Some(Ok(_credit)) = frames.next().await {
        let next = {
            let mut queue = queue.lock().await;
            queue.recv().await
        };
        let Some(frame) = next else { break };
        if let Err(e) = frames.send(frame.clone()).await {
            warn!(%peer, "delivery failed, requeueing: {e}");
            let _ = requeue.send(frame);
            break;
        }
    }
    debug!(%peer, "puller disconnected");
}

/// A bound fan-in queue. Frames from every connected [`Pusher`] land in one
/// single-reader queue; frames that arrive before anyone reads are buffered.
pub struct Inbox {
    local_addr: Option<SocketAddr>,
    rx: mpsc::UnboundedReceiver<Bytes>,
    accept: Option<JoinHandle<()>>,
}

/// Feeds an in-process [`Inbox`] created with [`Inbox::channel`].
#[derive(Clone)]
pub struct InboxSender(mpsc::UnboundedSender<Bytes>);

impl InboxSender {
    pub fn send<T: Serialize>(&self, msg: &T) -> Result<()> {
        self.send_frame(codec::to_json(msg)?)
    }

    pub fn send_frame(&self, frame: Bytes) -> Result<()> {
        self.0
            .send(frame)
            .map_err(|_| Error::Disconnected("in-process inbox".into()))
    }
}

impl Inbox {
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let (listener, local_addr) = bind_listener(addr).await?;
        let (tx, rx) = mpsc::unbounded_channel();
        let accept = tokio::spawn(accept_pushers(listener, tx));
        info!(%local_addr, "inbox bound");
        Ok(Self {
            local_addr: Some(local_addr),
            rx,
            accept: Some(accept),
        })
    }

    /// An inbox with no network endpoint behind it.
    pub fn channel() -> (InboxSender, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        let inbox = Self {
            local_addr: None,
            rx,
            accept: None,
        };
        (InboxSender(tx), inbox)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Wait for the next frame from any sender.
    pub async fn recv(&mut self) -> Result<Bytes> {
        self.rx.recv().await.ok_or_else(|| {
            let name = match self.local_addr {
                Some(addr) => format!("inbox {addr}"),
                None => "in-process inbox".to_string(),
            };
            Error::Disconnected(name)
        })
    }
}

impl Drop for Inbox {
    fn drop(&mut self) {
        if let Some(accept) = self.accept.take() {
            accept.abort();
        }
    }
}

async fn accept_pushers(listener: TcpListener, tx: mpsc::UnboundedSender<Bytes>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!(%peer, "pusher connected");
                let tx = tx.clone();
                tokio::spawn(async move {
                    let mut frames = FramedRead::new(stream, frame_codec());
                    while let Some(frame) = frames.next().await {
                        match frame {
                            Ok(frame) => {
                                if tx.send(frame.freeze()).is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!(%peer, "dropping pusher after bad frame: {e}");
                                break;
                            }
                        }
                    }
                    debug!(%peer, "pusher disconnected");
                });
            }
            Err(e) => warn!("accept failed: {e}"),
        }
    }
}

/////////////////////////////////////////////////////////////////////////////
// Connected endpoints (worker side)
/////////////////////////////////////////////////////////////////////////////

/// Resolve `host` (an address or a hostname) to the socket address of
/// `channel` on a master listening at `base_port`.
pub async fn resolve(host: &str, channel: Channel, base_port: u16) -> Result<SocketAddr> {
    let port = channel.port(base_port)?;
    let context = || format!("resolve {host}:{port} for {channel}");
    tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| Error::io(context(), e))?
        .next()
        .ok_or_else(|| {
            Error::io(
                context(),
                io::Error::new(io::ErrorKind::NotFound, "no addresses"),
            )
        })
}

/// Sends frames to a bound [`Inbox`].
pub struct Pusher {
    addr: SocketAddr,
    frames: Framed<TcpStream, LengthDelimitedCodec>,
}

impl Pusher {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = connect_stream(addr).await?;
        debug!(%addr, "pusher connected");
        Ok(Self {
            addr,
            frames: Framed::new(stream, frame_codec()),
        })
    }

    pub async fn send<T: Serialize>(&mut self, msg: &T) -> Result<()> {
        self.send_frame(codec::to_json(msg)?).await
    }

    pub async fn send_frame(&mut self, frame: Bytes) -> Result<()> {
        let addr = self.addr;
        self.frames
            .send(frame)
            .await
            .map_err(|source| Error::Transport { addr, source })
    }
}

/// Receives one frame at a time from a bound [`Outbox`].
pub struct Puller {
    addr: SocketAddr,
    frames: Framed<TcpStream, LengthDelimitedCodec>,
}

impl Puller {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = connect_stream(addr).await?;
        debug!(%addr, "puller connected");
        Ok(Self {
            addr,
            frames: Framed::new(stream, frame_codec()),
        })
    }

    pub async fn recv_frame(&mut self) -> Result<Bytes> {
        let addr = self.addr;
        self.frames
            .send(Bytes::new())
            .await
            .map_err(|source| Error::Transport { addr, source })?;
        match self.frames.next().await {
            Some(Ok(frame)) => Ok(frame.freeze()),
            Some(Err(source)) => Err(Error::Transport { addr, source }),
            None => Err(Error::Transport {
                addr,
                source: io::Error::new(io::ErrorKind::UnexpectedEof, "outbox closed"),
            }),
        }
    }

    /// Receive one message. A frame that does not decode as `T` is a
    /// [`Error::Validation`] and leaves the connection usable.
    pub async fn recv<T: DeserializeOwned>(&mut self) -> Result<T> {
        let frame = self.recv_frame().await?;
        codec::from_json(&frame)
    }
}
