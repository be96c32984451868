use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use rail_feed_consumer::error::TransportError;
use rail_feed_consumer::transport::frame::{decode, Frame, Incoming};
use rail_feed_consumer::transport::{
    FeedTransport, StompSettings, StompTransport, Subscription, TransportEvent,
};

/// Just enough of a broker to drive the client through one session.
struct FakeBroker {
    stream: TcpStream,
    buf: BytesMut,
}

impl FakeBroker {
    async fn accept(listener: &TcpListener) -> Self {
        let (stream, _) = listener.accept().await.unwrap();
        Self {
            stream,
            buf: BytesMut::new(),
        }
    }

    async fn next_incoming(&mut self) -> Incoming {
        loop {
            if let Some(incoming) = decode(&mut self.buf).unwrap() {
                return incoming;
            }
            let read = self.stream.read_buf(&mut self.buf).await.unwrap();
            assert!(read > 0, "client hung up");
        }
    }

    async fn read_frame(&mut self) -> Frame {
        loop {
            if let Incoming::Frame(frame) = self.next_incoming().await {
                return frame;
            }
        }
    }

    async fn send(&mut self, frame: Frame) {
        let mut out = BytesMut::new();
        frame.encode(&mut out);
        self.stream.write_all(&out).await.unwrap();
    }
}

fn message(id: &str) -> Frame {
    let mut message = Frame::new("MESSAGE")
        .with_header("subscription", "1")
        .with_header("message-id", id)
        .with_header("destination", "/topic/TRAIN_MVT_ALL_TOC");
    message.body = bytes::Bytes::from_static(b"[]");
    message
}

fn settings(port: u16, heartbeat_receive: Duration) -> StompSettings {
    StompSettings {
        host: "127.0.0.1".to_string(),
        port,
        login: "me@example.com".to_string(),
        passcode: "secret".to_string(),
        client_id: "me@example.com".to_string(),
        heartbeat_send: Duration::ZERO,
        heartbeat_receive,
        connect_timeout: Duration::from_secs(5),
    }
}

fn subscription() -> Subscription {
    Subscription {
        id: "1".to_string(),
        destination: "/topic/TRAIN_MVT_ALL_TOC".to_string(),
        durable_name: "rail-feed-consumer".to_string(),
    }
}

#[tokio::test]
async fn test_session_connect_subscribe_deliver_ack() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let broker = tokio::spawn(async move {
        let mut broker = FakeBroker::accept(&listener).await;

        let connect = broker.read_frame().await;
        assert_eq!(connect.command, "CONNECT");
        assert_eq!(connect.header("accept-version"), Some("1.1"));
        assert_eq!(connect.header("login"), Some("me@example.com"));
        assert_eq!(connect.header("passcode"), Some("secret"));
        assert_eq!(connect.header("client-id"), Some("me@example.com"));
        assert_eq!(connect.header("heart-beat"), Some("0,0"));
        broker
            .send(Frame::new("CONNECTED").with_header("version", "1.1"))
            .await;

        let subscribe = broker.read_frame().await;
        assert_eq!(subscribe.command, "SUBSCRIBE");
        assert_eq!(
            subscribe.header("destination"),
            Some("/topic/TRAIN_MVT_ALL_TOC")
        );
        assert_eq!(subscribe.header("id"), Some("1"));
        assert_eq!(subscribe.header("ack"), Some("client-individual"));
        assert_eq!(
            subscribe.header("activemq.subscriptionName"),
            Some("rail-feed-consumer")
        );

        broker.send(message("ID:broker-1:1")).await;

        let ack = broker.read_frame().await;
        assert_eq!(ack.command, "ACK");
        assert_eq!(ack.header("message-id"), Some("ID:broker-1:1"));
        assert_eq!(ack.header("subscription"), Some("1"));
        // Hanging up here is what the client sees as a disconnect
    });

    let mut transport = StompTransport::new(settings(port, Duration::ZERO));
    transport.connect().await.unwrap();
    transport.subscribe(&subscription()).await.unwrap();

    let TransportEvent::Delivery(delivery) = transport.next_event().await else {
        panic!("expected a delivery");
    };
    assert_eq!(delivery.message_id, "ID:broker-1:1");
    assert_eq!(&delivery.payload[..], b"[]");
    transport.ack(&delivery).await.unwrap();

    broker.await.unwrap();
    assert_eq!(transport.next_event().await, TransportEvent::Disconnected);
    assert!(!transport.is_connected());
    assert!(matches!(
        transport.ack(&delivery).await,
        Err(TransportError::NotConnected)
    ));
}

#[tokio::test]
async fn test_error_frame_rejects_the_connect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let mut broker = FakeBroker::accept(&listener).await;
        broker.read_frame().await;
        broker
            .send(Frame::new("ERROR").with_header("message", "Bad credentials"))
            .await;
    });

    let mut transport = StompTransport::new(settings(port, Duration::ZERO));
    let result = transport.connect().await;

    assert!(
        matches!(&result, Err(TransportError::Rejected(message)) if message == "Bad credentials"),
        "{result:?}"
    );
    assert!(!transport.is_connected());
}

#[tokio::test]
async fn test_silent_broker_times_out_on_heartbeats() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let broker = tokio::spawn(async move {
        let mut broker = FakeBroker::accept(&listener).await;
        broker.read_frame().await;
        broker
            .send(Frame::new("CONNECTED").with_header("heart-beat", "100,0"))
            .await;
        broker.read_frame().await;
        // Stay connected but say nothing
        tokio::time::sleep(Duration::from_secs(5)).await;
    });

    let mut transport = StompTransport::new(settings(port, Duration::from_millis(50)));
    transport.connect().await.unwrap();
    transport.subscribe(&subscription()).await.unwrap();

    let event = tokio::time::timeout(Duration::from_secs(2), transport.next_event())
        .await
        .unwrap();
    assert_eq!(event, TransportEvent::HeartbeatTimeout);
    assert!(!transport.is_connected());
    broker.abort();
}

#[tokio::test]
async fn test_slow_consumer_keeps_heartbeats_flowing() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let broker = tokio::spawn(async move {
        let mut broker = FakeBroker::accept(&listener).await;
        broker.read_frame().await;
        broker
            .send(Frame::new("CONNECTED").with_header("heart-beat", "50,50"))
            .await;
        broker.read_frame().await;
        broker.send(message("ID:1")).await;

        // Beat every 20ms and count what comes back while the client is busy
        let mut heartbeats = 0;
        let until = tokio::time::Instant::now() + Duration::from_millis(500);
        while tokio::time::Instant::now() < until {
            broker.stream.write_all(b"\n").await.unwrap();
            let incoming =
                tokio::time::timeout(Duration::from_millis(20), broker.next_incoming()).await;
            if let Ok(Incoming::Heartbeat) = incoming {
                heartbeats += 1;
            }
        }
        broker.send(message("ID:2")).await;
        heartbeats
    });

    let mut settings = settings(port, Duration::from_millis(50));
    settings.heartbeat_send = Duration::from_millis(50);
    let mut transport = StompTransport::new(settings);
    transport.connect().await.unwrap();
    transport.subscribe(&subscription()).await.unwrap();

    let TransportEvent::Delivery(first) = transport.next_event().await else {
        panic!("expected the first delivery");
    };
    transport.ack(&first).await.unwrap();

    // Six times the heartbeat timeout spent away from the transport
    tokio::time::sleep(Duration::from_millis(600)).await;

    let event = tokio::time::timeout(Duration::from_secs(2), transport.next_event())
        .await
        .unwrap();
    let TransportEvent::Delivery(second) = event else {
        panic!("expected the second delivery, got {event:?}");
    };
    assert_eq!(second.message_id, "ID:2");
    assert!(transport.is_connected());

    let heartbeats = broker.await.unwrap();
    assert!(heartbeats >= 3, "broker saw {heartbeats} heartbeats");
}
