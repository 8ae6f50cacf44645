//! IEC 60870-5-104 link layer (APCI session).
//!
//! A session owns one framed transport after the STARTDT handshake and runs
//! as its own tokio task. It numbers outgoing I-frames, checks and
//! acknowledges incoming ones, enforces the K window and runs the T1/T2/T3
//! timers. Callers talk to it through a cloneable [`ClientHandle`] and
//! receive inbound ASDUs plus the final close notification as
//! [`Iec104Event`]s.
//!
//! The [`Connector`] trait is the transport seam: [`TcpConnector`] opens a
//! real TCP session; tests substitute their own implementation.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, timeout, Instant};
use tokio_util::codec::Framed;
use tracing::{debug, info, trace, warn};

use crate::codec::{Apdu, Iec104Codec};
use crate::error::{Iec104Error, Result};
use crate::types::{seq_distance, seq_next, Apci, Asdu, UFunction};

/// Default IEC 104 port.
pub const DEFAULT_PORT: u16 = 2404;

/// Default T0 (connection establishment) in seconds.
pub const DEFAULT_T0_TIMEOUT: u64 = 10;

/// Default T1 timeout (send confirmation) in seconds.
pub const DEFAULT_T1_TIMEOUT: u64 = 15;

/// Default T2 timeout (no data acknowledgment) in seconds.
pub const DEFAULT_T2_TIMEOUT: u64 = 10;

/// Default T3 timeout (test frame) in seconds.
pub const DEFAULT_T3_TIMEOUT: u64 = 20;

/// Default K parameter (max unconfirmed I-frames).
pub const DEFAULT_K: u16 = 12;

/// Default W parameter (max unconfirmed receives before sending S-frame).
pub const DEFAULT_W: u16 = 8;

const REQUEST_CAPACITY: usize = 32;
const EVENT_CAPACITY: usize = 256;

/// Link-level configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Server address (host:port)
    pub address: String,
    /// T0: TCP connection establishment timeout
    pub connect_timeout: Duration,
    /// T1: time to wait for send confirmation
    pub t1_timeout: Duration,
    /// T2: time to wait before acknowledging received I-frames
    pub t2_timeout: Duration,
    /// T3: idle time before sending TESTFR act
    pub t3_timeout: Duration,
    /// K: max unconfirmed I-frames
    pub k: u16,
    /// W: max unconfirmed receives before sending S-frame
    pub w: u16,
    /// How long a caller waits for the session to accept a frame
    pub request_timeout: Duration,
}

impl ClientConfig {
    /// Create a new configuration with the given address.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            connect_timeout: Duration::from_secs(DEFAULT_T0_TIMEOUT),
            t1_timeout: Duration::from_secs(DEFAULT_T1_TIMEOUT),
            t2_timeout: Duration::from_secs(DEFAULT_T2_TIMEOUT),
            t3_timeout: Duration::from_secs(DEFAULT_T3_TIMEOUT),
            k: DEFAULT_K,
            w: DEFAULT_W,
            request_timeout: Duration::from_secs(DEFAULT_T1_TIMEOUT),
        }
    }

    /// Set connection timeout (T0).
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set T1 timeout.
    pub fn t1_timeout(mut self, timeout: Duration) -> Self {
        self.t1_timeout = timeout;
        self
    }

    /// Set T2 timeout.
    pub fn t2_timeout(mut self, timeout: Duration) -> Self {
        self.t2_timeout = timeout;
        self
    }

    /// Set T3 timeout.
    pub fn t3_timeout(mut self, timeout: Duration) -> Self {
        self.t3_timeout = timeout;
        self
    }

    /// Set the K and W window parameters.
    pub fn window(mut self, k: u16, w: u16) -> Self {
        self.k = k.max(1);
        self.w = w.clamp(1, self.k);
        self
    }

    /// Set the request acceptance timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Events emitted by a session.
#[derive(Debug, Clone)]
pub enum Iec104Event {
    /// An I-frame carried this ASDU
    Asdu(Asdu),
    /// The session ended; no further events follow
    Closed {
        /// Why the session ended
        reason: String,
    },
}

/// Request sent from a [`ClientHandle`] to its session task.
#[derive(Debug)]
pub enum LinkRequest {
    /// Send an ASDU as the next I-frame
    Send {
        /// Data unit to send
        asdu: Asdu,
        /// Completed once the frame is written (or failed)
        reply: oneshot::Sender<Result<()>>,
    },
    /// Send STOPDT act and close the transport
    Close,
}

/// Cloneable handle to a running session.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    tx: mpsc::Sender<LinkRequest>,
    request_timeout: Duration,
}

impl ClientHandle {
    /// Create a handle and the receiving end a session task serves.
    pub fn channel(request_timeout: Duration) -> (Self, mpsc::Receiver<LinkRequest>) {
        let (tx, rx) = mpsc::channel(REQUEST_CAPACITY);
        (Self { tx, request_timeout }, rx)
    }

    /// Queue an ASDU for transmission and wait until it is on the wire.
    pub async fn send_asdu(&self, asdu: Asdu) -> Result<()> {
        let (reply, done) = oneshot::channel();
        self.tx
            .send(LinkRequest::Send { asdu, reply })
            .await
            .map_err(|_| Iec104Error::NotConnected)?;

        match timeout(self.request_timeout, done).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Iec104Error::ConnectionLost("session ended before sending".into())),
            Err(_) => Err(Iec104Error::CommandTimeout),
        }
    }

    /// Ask the session to close. Does nothing if it already ended.
    pub async fn close(&self) {
        let _ = self.tx.send(LinkRequest::Close).await;
    }

    /// Whether the session task has ended.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// An established session: its handle plus the event stream.
#[derive(Debug)]
pub struct Link {
    /// Handle for sending and closing
    pub handle: ClientHandle,
    /// Inbound ASDUs and the close notification
    pub events: mpsc::Receiver<Iec104Event>,
}

/// Opens sessions to remote devices.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open the transport and complete the STARTDT handshake.
    async fn open(&self, config: &ClientConfig) -> Result<Link>;
}

/// Connector over plain TCP.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn open(&self, config: &ClientConfig) -> Result<Link> {
        let stream = timeout(config.connect_timeout, TcpStream::connect(&config.address))
            .await
            .map_err(|_| Iec104Error::ConnectionTimeout)?
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::ConnectionRefused => {
                    Iec104Error::ConnectionRefused(config.address.clone())
                }
                _ => Iec104Error::ConnectionFailed(format!("{}: {e}", config.address)),
            })?;

        // Disable Nagle's algorithm for low latency
        stream.set_nodelay(true).ok();

        start_session(Framed::new(stream, Iec104Codec::new()), config.clone()).await
    }
}

/// Run the STARTDT handshake on a framed transport and spawn its session.
pub async fn start_session<T>(mut framed: Framed<T, Iec104Codec>, config: ClientConfig) -> Result<Link>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    framed.send(Apdu::u_frame(UFunction::StartDtAct)).await?;
    timeout(config.t1_timeout, await_start_confirmation(&mut framed))
        .await
        .map_err(|_| Iec104Error::T1Timeout)??;
    info!(address = %config.address, "Data transfer started");

    let (handle, requests) = ClientHandle::channel(config.request_timeout);
    let (events_tx, events) = mpsc::channel(EVENT_CAPACITY);
    let session = Session::new(framed, config, events_tx);
    tokio::spawn(session.run(requests));

    Ok(Link { handle, events })
}

async fn await_start_confirmation<T>(framed: &mut Framed<T, Iec104Codec>) -> Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let apdu = framed
            .next()
            .await
            .ok_or_else(|| Iec104Error::ConnectionLost("closed during STARTDT".into()))??;
        match apdu.apci {
            Apci::UFrame {
                function: UFunction::StartDtCon,
            } => return Ok(()),
            Apci::UFrame {
                function: UFunction::TestFrAct,
            } => framed.send(Apdu::u_frame(UFunction::TestFrCon)).await?,
            other => {
                return Err(Iec104Error::protocol(format!(
                    "unexpected {other} while waiting for STARTDT con"
                )))
            }
        }
    }
}

/// Sent I-frame still waiting for acknowledgement.
struct Pending {
    seq: u16,
    sent_at: Instant,
}

struct Session<T> {
    framed: Framed<T, Iec104Codec>,
    config: ClientConfig,
    events: mpsc::Sender<Iec104Event>,
    send_seq: u16,
    recv_seq: u16,
    pending: VecDeque<Pending>,
    unacked_recv: u16,
    ack_deadline: Option<Instant>,
    last_recv: Instant,
    test_sent: Option<Instant>,
}

impl<T> Session<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn new(
        framed: Framed<T, Iec104Codec>,
        config: ClientConfig,
        events: mpsc::Sender<Iec104Event>,
    ) -> Self {
        Self {
            framed,
            config,
            events,
            send_seq: 0,
            recv_seq: 0,
            pending: VecDeque::new(),
            unacked_recv: 0,
            ack_deadline: None,
            last_recv: Instant::now(),
            test_sent: None,
        }
    }

    async fn run(mut self, mut requests: mpsc::Receiver<LinkRequest>) {
        let reason = match self.serve(&mut requests).await {
            Ok(()) => "closed locally".to_string(),
            Err(e) => {
                warn!(address = %self.config.address, error = %e, "Session terminated");
                e.to_string()
            }
        };
        requests.close();
        let _ = self.events.send(Iec104Event::Closed { reason }).await;
    }

    async fn serve(&mut self, requests: &mut mpsc::Receiver<LinkRequest>) -> Result<()> {
        loop {
            let window_open = self.pending.len() < usize::from(self.config.k);
            let deadline = self.next_deadline();

            tokio::select! {
                frame = self.framed.next() => match frame {
                    Some(Ok(apdu)) => self.on_apdu(apdu).await?,
                    Some(Err(e)) => return Err(e),
                    None => return Err(Iec104Error::ConnectionLost("closed by peer".into())),
                },
                request = requests.recv(), if window_open => match request {
                    Some(LinkRequest::Send { asdu, reply }) => match self.send_i_frame(asdu).await {
                        Ok(()) => {
                            let _ = reply.send(Ok(()));
                        }
                        Err(e) => {
                            let _ = reply.send(Err(Iec104Error::ConnectionLost(e.to_string())));
                            return Err(e);
                        }
                    },
                    Some(LinkRequest::Close) | None => {
                        let _ = self.framed.send(Apdu::u_frame(UFunction::StopDtAct)).await;
                        let _ = self.framed.close().await;
                        return Ok(());
                    }
                },
                _ = sleep_until(deadline) => self.on_timer().await?,
            }
        }
    }

    fn next_deadline(&self) -> Instant {
        let t1 = self.config.t1_timeout;
        [
            self.pending.front().map(|p| p.sent_at + t1),
            self.test_sent.map(|sent| sent + t1),
            self.ack_deadline,
            self.test_sent
                .is_none()
                .then(|| self.last_recv + self.config.t3_timeout),
        ]
        .into_iter()
        .flatten()
        .min()
        .unwrap_or_else(|| Instant::now() + self.config.t3_timeout)
    }

    async fn on_timer(&mut self) -> Result<()> {
        let now = Instant::now();
        let t1 = self.config.t1_timeout;

        if self.pending.front().is_some_and(|p| p.sent_at + t1 <= now) {
            return Err(Iec104Error::T1Timeout);
        }
        if self.test_sent.is_some_and(|sent| sent + t1 <= now) {
            return Err(Iec104Error::T1Timeout);
        }
        if self.ack_deadline.is_some_and(|d| d <= now) {
            self.send_s_frame().await?;
        }
        if self.test_sent.is_none() && self.last_recv + self.config.t3_timeout <= now {
            trace!(address = %self.config.address, "T3 expired, sending TESTFR act");
            self.framed.send(Apdu::u_frame(UFunction::TestFrAct)).await?;
            self.test_sent = Some(now);
        }
        Ok(())
    }

    async fn on_apdu(&mut self, apdu: Apdu) -> Result<()> {
        trace!(address = %self.config.address, frame = %apdu, "Received");
        self.last_recv = Instant::now();
        self.test_sent = None;

        match apdu.apci {
            Apci::IFrame { send_seq, recv_seq } => {
                if send_seq != self.recv_seq {
                    return Err(Iec104Error::SequenceMismatch {
                        expected: self.recv_seq,
                        actual: send_seq,
                    });
                }
                self.acknowledge(recv_seq)?;
                self.recv_seq = seq_next(self.recv_seq);
                self.unacked_recv += 1;
                if self.ack_deadline.is_none() {
                    self.ack_deadline = Some(self.last_recv + self.config.t2_timeout);
                }
                if self.unacked_recv >= self.config.w {
                    self.send_s_frame().await?;
                }
                if let Some(asdu) = apdu.asdu {
                    let _ = self.events.send(Iec104Event::Asdu(asdu)).await;
                }
            }
            Apci::SFrame { recv_seq } => self.acknowledge(recv_seq)?,
            Apci::UFrame { function } => match function {
                UFunction::TestFrAct => {
                    self.framed.send(Apdu::u_frame(UFunction::TestFrCon)).await?;
                }
                UFunction::TestFrCon => {}
                other => debug!(address = %self.config.address, function = ?other, "Ignoring U-frame"),
            },
        }
        Ok(())
    }

    /// Release every pending I-frame numbered before `recv_seq`.
    fn acknowledge(&mut self, recv_seq: u16) -> Result<()> {
        let oldest = self.pending.front().map_or(self.send_seq, |p| p.seq);
        let acked = seq_distance(oldest, recv_seq);
        if usize::from(acked) > self.pending.len() {
            return Err(Iec104Error::SequenceMismatch {
                expected: self.send_seq,
                actual: recv_seq,
            });
        }
        self.pending.drain(..usize::from(acked));
        Ok(())
    }

    async fn send_i_frame(&mut self, asdu: Asdu) -> Result<()> {
        let seq = self.send_seq;
        self.framed.send(Apdu::i_frame(seq, self.recv_seq, asdu)).await?;
        self.pending.push_back(Pending {
            seq,
            sent_at: Instant::now(),
        });
        self.send_seq = seq_next(seq);
        // The I-frame carries our receive sequence number
        self.unacked_recv = 0;
        self.ack_deadline = None;
        Ok(())
    }

    async fn send_s_frame(&mut self) -> Result<()> {
        self.framed.send(Apdu::s_frame(self.recv_seq)).await?;
        self.unacked_recv = 0;
        self.ack_deadline = None;
        Ok(())
    }
}
