use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::frame::{self, Frame, Incoming};
use super::{Delivery, FeedTransport, Subscription, TransportEvent};
use crate::error::TransportError;

// Deliveries read ahead of the consumer. When full the reader stops reading.
const EVENT_BUFFER: usize = 256;
const OUTGOING_BUFFER: usize = 64;

// Every message is acknowledged on its own.
const ACK_MODE: &str = "client-individual";

#[derive(Debug, Clone)]
pub struct StompSettings {
    pub host: String,
    pub port: u16,
    pub login: String,
    pub passcode: String,
    pub client_id: String,
    /// How often we offer to send heartbeats. Zero disables.
    pub heartbeat_send: Duration,
    /// How often we ask the broker to send heartbeats. Zero disables.
    pub heartbeat_receive: Duration,
    pub connect_timeout: Duration,
}

/// STOMP 1.1 client over plain TCP.
///
/// Once connected, a reader task owns the read half of the socket and a
/// writer task owns the write half. Heartbeats in both directions are kept
/// by those tasks, so they carry on however long the consumer spends
/// between two calls to `next_event`.
pub struct StompTransport {
    settings: StompSettings,
    connection: Option<Connection>,
}

struct Connection {
    events: mpsc::Receiver<TransportEvent>,
    outgoing: Option<mpsc::Sender<Bytes>>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl StompTransport {
    pub fn new(settings: StompSettings) -> Self {
        Self {
            settings,
            connection: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    async fn send(&mut self, frame: &Frame) -> Result<(), TransportError> {
        self.connection
            .as_mut()
            .ok_or(TransportError::NotConnected)?
            .send(frame)
            .await
    }
}

#[async_trait]
impl FeedTransport for StompTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        self.close().await;

        let settings = &self.settings;
        let mut stream = tokio::time::timeout(
            settings.connect_timeout,
            TcpStream::connect((settings.host.as_str(), settings.port)),
        )
        .await
        .map_err(|_| TransportError::Timeout)??;
        stream.set_nodelay(true)?;

        let connect = Frame::new("CONNECT")
            .with_header("accept-version", "1.1")
            .with_header("host", &settings.host)
            .with_header("login", &settings.login)
            .with_header("passcode", &settings.passcode)
            .with_header("client-id", &settings.client_id)
            .with_header(
                "heart-beat",
                format!(
                    "{},{}",
                    settings.heartbeat_send.as_millis(),
                    settings.heartbeat_receive.as_millis()
                ),
            );
        let mut read_buf = BytesMut::with_capacity(64 * 1024);
        let reply = tokio::time::timeout(
            settings.connect_timeout,
            handshake(&mut stream, &mut read_buf, &connect),
        )
        .await
        .map_err(|_| TransportError::Timeout)??;

        match reply.command.as_str() {
            "CONNECTED" => {
                let (server_send, server_expect) =
                    parse_heartbeat(reply.header("heart-beat").unwrap_or("0,0"))?;
                let send_every = negotiate(settings.heartbeat_send, server_expect);
                let expect_every = negotiate(settings.heartbeat_receive, server_send);
                info!(
                    host = settings.host,
                    server = reply.header("server").unwrap_or("unknown"),
                    send_every = ?send_every,
                    expect_every = ?expect_every,
                    "Connected to broker"
                );
                self.connection = Some(Connection::start(
                    stream,
                    read_buf,
                    send_every,
                    expect_every,
                ));
                Ok(())
            }
            "ERROR" => Err(TransportError::Rejected(
                reply.header("message").unwrap_or("no message").to_owned(),
            )),
            other => Err(TransportError::Protocol(format!(
                "expected CONNECTED, got {other}"
            ))),
        }
    }

    async fn subscribe(&mut self, subscription: &Subscription) -> Result<(), TransportError> {
        let frame = Frame::new("SUBSCRIBE")
            .with_header("destination", &subscription.destination)
            .with_header("id", &subscription.id)
            .with_header("ack", ACK_MODE)
            .with_header("activemq.subscriptionName", &subscription.durable_name);
        self.send(&frame).await?;
        info!(
            destination = subscription.destination,
            durable_name = subscription.durable_name,
            "Subscribed"
        );
        Ok(())
    }

    async fn next_event(&mut self) -> TransportEvent {
        let Some(connection) = self.connection.as_mut() else {
            return TransportEvent::Disconnected;
        };
        let event = connection
            .events
            .recv()
            .await
            .unwrap_or(TransportEvent::Disconnected);
        if !matches!(event, TransportEvent::Delivery(_)) {
            self.connection = None;
        }
        event
    }

    async fn ack(&mut self, delivery: &Delivery) -> Result<(), TransportError> {
        let frame = Frame::new("ACK")
            .with_header("subscription", &delivery.subscription)
            .with_header("message-id", &delivery.message_id);
        self.send(&frame).await
    }

    async fn close(&mut self) {
        let Some(mut connection) = self.connection.take() else {
            return;
        };
        if connection.send(&Frame::new("DISCONNECT")).await.is_err() {
            debug!("Broker connection was already gone when closing");
        }
        // Dropping the sender lets the writer flush DISCONNECT and shut the socket
        connection.outgoing = None;
        if tokio::time::timeout(Duration::from_secs(1), &mut connection.writer)
            .await
            .is_err()
        {
            debug!("Timed out waiting for the socket to close");
        }
    }
}

impl Connection {
    fn start(
        stream: TcpStream,
        read_buf: BytesMut,
        send_every: Option<Duration>,
        expect_every: Option<Duration>,
    ) -> Self {
        let (read_half, write_half) = stream.into_split();
        let (event_tx, events) = mpsc::channel(EVENT_BUFFER);
        let (outgoing, outgoing_rx) = mpsc::channel(OUTGOING_BUFFER);
        Self {
            events,
            outgoing: Some(outgoing),
            reader: tokio::spawn(read_loop(read_half, read_buf, expect_every, event_tx)),
            writer: tokio::spawn(write_loop(write_half, outgoing_rx, send_every)),
        }
    }

    async fn send(&mut self, frame: &Frame) -> Result<(), TransportError> {
        let outgoing = self.outgoing.as_ref().ok_or(TransportError::NotConnected)?;
        outgoing
            .send(encode(frame))
            .await
            .map_err(|_| TransportError::NotConnected)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

fn encode(frame: &Frame) -> Bytes {
    let mut buf = BytesMut::new();
    frame.encode(&mut buf);
    buf.freeze()
}

/// Send CONNECT and wait for the broker's first frame.
async fn handshake(
    stream: &mut TcpStream,
    buf: &mut BytesMut,
    connect: &Frame,
) -> Result<Frame, TransportError> {
    stream.write_all(&encode(connect)).await?;
    loop {
        match frame::decode(buf)? {
            Some(Incoming::Frame(frame)) => return Ok(frame),
            Some(Incoming::Heartbeat) => continue,
            None => {
                if stream.read_buf(buf).await? == 0 {
                    return Err(TransportError::Io(std::io::ErrorKind::UnexpectedEof.into()));
                }
            }
        }
    }
}

/// Decode frames into events until the connection ends, then report how it ended.
///
/// The heartbeat deadline only runs while waiting on the socket. While the
/// consumer is busy and the event buffer is full nothing is read, and bytes
/// queued on the socket count as soon as reading resumes.
async fn read_loop(
    mut read_half: OwnedReadHalf,
    mut buf: BytesMut,
    expect_every: Option<Duration>,
    events: mpsc::Sender<TransportEvent>,
) {
    let ended = 'session: loop {
        loop {
            match frame::decode(&mut buf) {
                Ok(Some(Incoming::Heartbeat)) => continue,
                Ok(Some(Incoming::Frame(frame))) => {
                    if let Some(delivery) = handle_frame(frame) {
                        if events.send(TransportEvent::Delivery(delivery)).await.is_err() {
                            return;
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    error!(error = %e, "Unreadable data from broker, dropping connection");
                    break 'session TransportEvent::Disconnected;
                }
            }
        }

        let read = match expect_every {
            Some(every) => {
                match tokio::time::timeout(every * 2, read_half.read_buf(&mut buf)).await {
                    Ok(read) => read,
                    Err(_) => {
                        warn!(expect_every = ?every, "No heartbeat from broker");
                        break 'session TransportEvent::HeartbeatTimeout;
                    }
                }
            }
            None => read_half.read_buf(&mut buf).await,
        };
        match read {
            Ok(0) => {
                warn!("Broker closed the connection");
                break 'session TransportEvent::Disconnected;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "Connection to broker lost");
                break 'session TransportEvent::Disconnected;
            }
        }
    };

    if events.send(ended).await.is_err() {
        debug!("Connection ended after the consumer went away");
    }
}

/// Write queued frames, and a heartbeat whenever nothing was written for `send_every`.
async fn write_loop(
    mut write_half: OwnedWriteHalf,
    mut outgoing: mpsc::Receiver<Bytes>,
    send_every: Option<Duration>,
) {
    loop {
        let next = match send_every {
            Some(every) => tokio::time::timeout(every, outgoing.recv())
                .await
                .unwrap_or_else(|_| Some(Bytes::from_static(b"\n"))),
            None => outgoing.recv().await,
        };
        let Some(bytes) = next else {
            break;
        };
        if let Err(e) = write_half.write_all(&bytes).await {
            warn!(error = %e, "Failed to write to broker");
            return;
        }
    }

    if let Err(e) = write_half.shutdown().await {
        debug!(error = %e, "Socket shutdown failed");
    }
}

/// Turn a frame received while subscribed into a delivery, or log and drop it.
fn handle_frame(frame: Frame) -> Option<Delivery> {
    match frame.command.as_str() {
        "MESSAGE" => {}
        "ERROR" => {
            error!(
                message = frame.header("message").unwrap_or("no message"),
                "Broker sent an ERROR frame"
            );
            return None;
        }
        "RECEIPT" => return None,
        other => {
            warn!(command = other, "Ignoring unexpected frame");
            return None;
        }
    }

    let (Some(message_id), Some(subscription)) =
        (frame.header("message-id"), frame.header("subscription"))
    else {
        warn!("Dropping MESSAGE frame without message-id or subscription header");
        return None;
    };

    Some(Delivery {
        message_id: message_id.to_owned(),
        subscription: subscription.to_owned(),
        payload: frame.body.clone(),
    })
}

fn parse_heartbeat(value: &str) -> Result<(u64, u64), TransportError> {
    let bad = || TransportError::Protocol(format!("bad heart-beat header {value:?}"));
    let (send, expect) = value.split_once(',').ok_or_else(bad)?;
    let send = send.trim().parse().map_err(|_| bad())?;
    let expect = expect.trim().parse().map_err(|_| bad())?;
    Ok((send, expect))
}

// Either side can opt out with zero; otherwise the slower of the two wins.
fn negotiate(ours: Duration, theirs_ms: u64) -> Option<Duration> {
    if ours.is_zero() || theirs_ms == 0 {
        None
    } else {
        Some(ours.max(Duration::from_millis(theirs_ms)))
    }
}
