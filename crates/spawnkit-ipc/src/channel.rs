//! The IPC channel endpoint: outbound queue, receive pump, disconnect.

use crate::codec::{self, FrameCodec, IpcMessage};
use nix::sys::socket::{
    recvmsg, sendmsg, ControlMessage, ControlMessageOwned, MsgFlags, Shutdown,
};
use parking_lot::Mutex;
use serde::Serialize;
use spawnkit_common::{ChannelError, ChannelResult, IPC_FD_ENV};
use std::fmt;
use std::io::{self, IoSlice, IoSliceMut};
use std::os::fd::{AsFd, AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::Interest;
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Outbound queue depth past which `send` starts reporting backpressure.
/// Messages past the mark are still queued; `false` only tells the caller
/// not to assume timely delivery.
const SEND_HIGH_WATER: usize = 64;

/// Connection state of the channel. `Disconnected` is terminal; a channel
/// cannot be reconnected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connected,
    Disconnected,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelState::Connected => write!(f, "connected"),
            ChannelState::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// A descriptor queued for transfer to the peer.
///
/// [`TransferHandle::new`] moves ownership in: the sender's copy is closed
/// once the descriptor has been handed off (the default transfer policy).
/// [`TransferHandle::keep_open`] duplicates the caller's descriptor
/// instead, leaving the original usable on the sending side.
#[derive(Debug)]
pub struct TransferHandle {
    fd: OwnedFd,
}

impl TransferHandle {
    pub fn new(fd: OwnedFd) -> Self {
        Self { fd }
    }

    pub fn keep_open(fd: &impl AsFd) -> io::Result<Self> {
        Ok(Self {
            fd: fd.as_fd().try_clone_to_owned()?,
        })
    }
}

/// Inbound channel traffic: decoded messages in arrival order, plus
/// transport-level faults that do not end the process lifecycle.
#[derive(Debug)]
pub enum ChannelEvent {
    Message(IpcMessage),
    Error(ChannelError),
}

struct Outbound {
    bytes: Vec<u8>,
    fd: Option<OwnedFd>,
}

struct Shared {
    stream: UnixStream,
    connected: AtomicBool,
    queued: AtomicUsize,
    closed: CancellationToken,
}

/// One endpoint of the structured-message channel.
pub struct IpcChannel {
    shared: Arc<Shared>,
    out_tx: mpsc::UnboundedSender<Outbound>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<ChannelEvent>>>,
}

impl fmt::Debug for IpcChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IpcChannel")
            .field("state", &self.state())
            .field("queued", &self.shared.queued.load(Ordering::SeqCst))
            .finish()
    }
}

impl IpcChannel {
    /// Wrap an already-connected socket. Spawns the send and receive pumps;
    /// must be called within a tokio runtime.
    pub fn new(stream: UnixStream) -> Self {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            stream,
            connected: AtomicBool::new(true),
            queued: AtomicUsize::new(0),
            closed: CancellationToken::new(),
        });

        tokio::spawn(send_pump(Arc::clone(&shared), out_rx));
        tokio::spawn(recv_pump(Arc::clone(&shared), events_tx));

        Self {
            shared,
            out_tx,
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    /// Build the child-side endpoint from a plumbed descriptor.
    pub fn from_fd(fd: OwnedFd) -> ChannelResult<Self> {
        let std_stream = std::os::unix::net::UnixStream::from(fd);
        std_stream
            .set_nonblocking(true)
            .map_err(|e| ChannelError::transport(e.to_string()))?;
        let stream = UnixStream::from_std(std_stream)
            .map_err(|e| ChannelError::transport(e.to_string()))?;
        Ok(Self::new(stream))
    }

    /// Child-side constructor: pick up the channel descriptor the parent
    /// exported through the environment. Returns `Ok(None)` when the
    /// process was not launched with an IPC slot.
    pub fn from_env() -> ChannelResult<Option<Self>> {
        let Ok(value) = std::env::var(IPC_FD_ENV) else {
            return Ok(None);
        };
        let fd: RawFd = value.parse().map_err(|_| {
            ChannelError::transport(format!("invalid {} value: {}", IPC_FD_ENV, value))
        })?;
        // Safety: the descriptor number was placed there by the launch
        // manager and belongs to this process alone.
        let owned = unsafe { OwnedFd::from_raw_fd(fd) };
        std::env::remove_var(IPC_FD_ENV);
        Self::from_fd(owned).map(Some)
    }

    /// Connected pair within one process. Used by tests.
    pub fn pair() -> ChannelResult<(Self, Self)> {
        let (a, b) =
            UnixStream::pair().map_err(|e| ChannelError::transport(e.to_string()))?;
        Ok((Self::new(a), Self::new(b)))
    }

    /// Queue a message for delivery in send order.
    ///
    /// Returns `Ok(true)` when the queue is healthy and `Ok(false)` under
    /// backpressure; the message is queued either way. Errors only when
    /// the payload cannot be encoded or the channel is already closed.
    pub fn send<T: Serialize>(&self, message: &T) -> ChannelResult<bool> {
        self.enqueue(codec::encode(message)?, None)
    }

    /// Queue a message with an attached descriptor. The descriptor arrives
    /// on the peer fully usable; the local copy held by the
    /// [`TransferHandle`] is closed after handoff.
    pub fn send_with_handle<T: Serialize>(
        &self,
        message: &T,
        handle: TransferHandle,
    ) -> ChannelResult<bool> {
        self.enqueue(codec::encode(message)?, Some(handle.fd))
    }

    fn enqueue(&self, bytes: Vec<u8>, fd: Option<OwnedFd>) -> ChannelResult<bool> {
        if !self.is_connected() {
            return Err(ChannelError::Closed);
        }
        self.out_tx
            .send(Outbound { bytes, fd })
            .map_err(|_| ChannelError::Closed)?;
        let depth = self.shared.queued.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(depth <= SEND_HIGH_WATER)
    }

    /// Take the inbound event receiver. Yields messages in arrival order
    /// and closes once the channel disconnects. Can be taken once.
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<ChannelEvent>> {
        self.events_rx.lock().take()
    }

    /// Receive the next message, skipping transport faults. `None` once
    /// the channel has disconnected. Intended for child-side loops that
    /// have not taken the event receiver.
    pub async fn recv(&self) -> Option<IpcMessage> {
        // recv keeps the receiver slot populated between calls
        let mut rx = self.events_rx.lock().take()?;
        loop {
            match rx.recv().await {
                Some(ChannelEvent::Message(msg)) => {
                    *self.events_rx.lock() = Some(rx);
                    return Some(msg);
                }
                Some(ChannelEvent::Error(e)) => {
                    warn!(error = %e, "IPC receive fault");
                }
                None => {
                    *self.events_rx.lock() = Some(rx);
                    return None;
                }
            }
        }
    }

    /// Close the channel. Irreversible; queued but unsent messages are
    /// dropped and no further messages are delivered.
    pub fn disconnect(&self) {
        if self.shared.connected.swap(false, Ordering::SeqCst) {
            let _ = nix::sys::socket::shutdown(self.shared.stream.as_raw_fd(), Shutdown::Both);
            self.shared.closed.cancel();
            debug!("IPC channel disconnected");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> ChannelState {
        if self.is_connected() {
            ChannelState::Connected
        } else {
            ChannelState::Disconnected
        }
    }

    /// Token cancelled exactly once, when the channel disconnects (locally
    /// or because the peer went away).
    pub fn closed_token(&self) -> CancellationToken {
        self.shared.closed.clone()
    }
}

impl Shared {
    fn mark_disconnected(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.closed.cancel();
        }
    }
}

async fn send_pump(shared: Arc<Shared>, mut out_rx: mpsc::UnboundedReceiver<Outbound>) {
    loop {
        let out = tokio::select! {
            _ = shared.closed.cancelled() => break,
            out = out_rx.recv() => match out {
                Some(out) => out,
                None => break,
            },
        };
        shared.queued.fetch_sub(1, Ordering::SeqCst);

        if let Err(e) = write_frame(&shared.stream, &out).await {
            warn!(error = %e, "IPC send failed; closing channel");
            shared.mark_disconnected();
            break;
        }
        // out (and any attached descriptor) dropped here: the sender-side
        // copy of a transferred handle is closed after handoff
    }
}

async fn recv_pump(shared: Arc<Shared>, events_tx: mpsc::UnboundedSender<ChannelEvent>) {
    let mut decoder = FrameCodec::new();
    loop {
        let chunk = tokio::select! {
            _ = shared.closed.cancelled() => break,
            chunk = shared
                .stream
                .async_io(Interest::READABLE, || read_chunk(shared.stream.as_raw_fd())) => chunk,
        };

        match chunk {
            Ok(Some((bytes, fds))) => {
                decoder.push_bytes(&bytes);
                decoder.push_fds(fds);
                while let Some(decoded) = decoder.next_message() {
                    let event = match decoded {
                        Ok(msg) => ChannelEvent::Message(msg),
                        Err(e) => ChannelEvent::Error(e),
                    };
                    if events_tx.send(event).is_err() {
                        return;
                    }
                }
            }
            Ok(None) => {
                debug!("IPC peer closed the channel");
                shared.mark_disconnected();
                break;
            }
            Err(e) => {
                let _ = events_tx.send(ChannelEvent::Error(ChannelError::transport(
                    e.to_string(),
                )));
                shared.mark_disconnected();
                break;
            }
        }
    }
}

/// One nonblocking `recvmsg`: bytes plus any descriptors that rode along.
/// `Ok(None)` is end-of-stream.
fn read_chunk(fd: RawFd) -> io::Result<Option<(Vec<u8>, Vec<OwnedFd>)>> {
    let mut buf = [0u8; 4096];
    let mut cmsg_buf = nix::cmsg_space!([RawFd; 8]);

    let (n, fds) = {
        let mut iov = [IoSliceMut::new(&mut buf)];
        let msg = recvmsg::<()>(fd, &mut iov, Some(&mut cmsg_buf), MsgFlags::empty())
            .map_err(errno_to_io)?;

        let mut fds = Vec::new();
        if let Ok(cmsgs) = msg.cmsgs() {
            for cmsg in cmsgs {
                if let ControlMessageOwned::ScmRights(raw_fds) = cmsg {
                    for raw in raw_fds {
                        // Safety: the kernel installed a fresh descriptor
                        // for this process; we are its sole owner.
                        fds.push(unsafe { OwnedFd::from_raw_fd(raw) });
                    }
                }
            }
        }
        (msg.bytes, fds)
    };

    if n == 0 && fds.is_empty() {
        return Ok(None);
    }
    Ok(Some((buf[..n].to_vec(), fds)))
}

async fn write_frame(stream: &UnixStream, out: &Outbound) -> io::Result<()> {
    let mut sent = 0;
    let mut fd_sent = out.fd.is_none();

    while sent < out.bytes.len() {
        let n = stream
            .async_io(Interest::WRITABLE, || {
                let iov = [IoSlice::new(&out.bytes[sent..])];
                let fd_slot;
                let cmsgs: Vec<ControlMessage> = match (&out.fd, fd_sent) {
                    (Some(fd), false) => {
                        fd_slot = [fd.as_raw_fd()];
                        vec![ControlMessage::ScmRights(&fd_slot)]
                    }
                    _ => Vec::new(),
                };
                sendmsg::<()>(stream.as_raw_fd(), &iov, &cmsgs, MsgFlags::empty(), None)
                    .map_err(errno_to_io)
            })
            .await?;
        fd_sent = true;
        sent += n;
    }
    Ok(())
}

fn errno_to_io(e: nix::errno::Errno) -> io::Error {
    if e == nix::errno::Errno::EAGAIN {
        io::ErrorKind::WouldBlock.into()
    } else {
        io::Error::from_raw_os_error(e as i32)
    }
}
