//! End-to-end session tests against the mock transport
//!
//! Each test drives a real `WorksClient` supervisor through `MockConnector`,
//! with tokio time paused so keepalive and backoff timers run instantly.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use works_notify::config::WorksConfig;
use works_notify::protocol::{MessageType, WorksMessage};
use works_notify::testing::MockConnector;
use works_notify::transport::mqtt::{
    encode_to_bytes, ConnectionState, Credentials, Packet, PacketType, Publish, QoS, WorksClient,
};

const TEST_TIMEOUT: Duration = Duration::from_secs(600);

fn text_publish(notification_id: &str, packet_id: u16) -> Packet {
    let payload = format!(
        r#"{{"nType":1,"notification-id":"{notification_id}","chType":6,"chNo":42,"loc-args0":"Alice","loc-args1":"hello"}}"#
    );
    Packet::Publish(Publish::new("noti", payload).with_qos(QoS::AtLeastOnce, packet_id))
}

async fn connected_client(
    connector: &MockConnector,
) -> (WorksClient, mpsc::UnboundedReceiver<WorksMessage>) {
    let (tx, rx) = mpsc::unbounded_channel::<WorksMessage>();
    let mut client =
        WorksClient::new(WorksConfig::default(), Arc::new(connector.clone()), tx).unwrap();
    let mut state = client.subscribe_state();

    client.start();
    timeout(
        TEST_TIMEOUT,
        state.wait_for(|s| *s == ConnectionState::Connected),
    )
    .await
    .expect("client should connect")
    .unwrap();

    (client, rx)
}

#[tokio::test(start_paused = true)]
async fn test_publish_delivered_once_and_acked_every_time() {
    // Arrange
    let connector = MockConnector::new();
    let (mut client, mut rx) = connected_client(&connector).await;
    let server = connector.server(0).unwrap();

    // Act: deliver the same notification twice
    server.send_packet(&text_publish("msg.AAA", 1)).unwrap();
    let message = timeout(TEST_TIMEOUT, rx.recv()).await.unwrap().unwrap();
    server.send_packet(&text_publish("msg.AAA", 2)).unwrap();
    timeout(TEST_TIMEOUT, connector.wait_for_written(PacketType::PubAck, 2))
        .await
        .unwrap();

    // Assert
    assert_eq!(message.notification_id, "msg.AAA");
    assert_eq!(message.message_type, MessageType::Text);
    assert_eq!(message.sender_name.as_deref(), Some("Alice"));
    assert_eq!(message.text.as_deref(), Some("hello"));
    assert_eq!(connector.puback_ids(), vec![1, 2]);
    assert!(rx.try_recv().is_err(), "duplicate must not be delivered");

    client.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_malformed_publish_keeps_session_alive() {
    let connector = MockConnector::new();
    let (mut client, mut rx) = connected_client(&connector).await;
    let server = connector.server(0).unwrap();

    // Unparseable payload: acked, not delivered
    let broken = Packet::Publish(Publish::new("noti", "{not json").with_qos(QoS::AtLeastOnce, 7));
    server.send_packet(&broken).unwrap();
    // PUBLISH with QoS 3 flags: dropped by the codec
    server.send_bytes(vec![0x36, 0x05, 0x00, 0x01, b't', 0x00, 0x01]);
    server.send_packet(&text_publish("msg.after", 8)).unwrap();

    let message = timeout(TEST_TIMEOUT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(message.notification_id, "msg.after");
    timeout(TEST_TIMEOUT, connector.wait_for_written(PacketType::PubAck, 2))
        .await
        .unwrap();

    assert_eq!(connector.puback_ids(), vec![7, 8]);
    assert_eq!(client.state(), ConnectionState::Connected);
    assert_eq!(connector.open_count(), 1);

    client.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_packet_split_across_frames() {
    let connector = MockConnector::new();
    let (mut client, mut rx) = connected_client(&connector).await;
    let server = connector.server(0).unwrap();

    let bytes = encode_to_bytes(&text_publish("msg.split", 3)).unwrap();
    let (head, tail) = bytes.split_at(4);
    server.send_bytes(head.to_vec());
    server.send_bytes(tail.to_vec());

    let message = timeout(TEST_TIMEOUT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(message.notification_id, "msg.split");

    client.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_two_packets_in_one_frame() {
    let connector = MockConnector::new();
    let (mut client, mut rx) = connected_client(&connector).await;
    let server = connector.server(0).unwrap();

    let mut frame = encode_to_bytes(&text_publish("msg.1", 1)).unwrap().to_vec();
    frame.extend_from_slice(&encode_to_bytes(&text_publish("msg.2", 2)).unwrap());
    server.send_bytes(frame);

    let first = timeout(TEST_TIMEOUT, rx.recv()).await.unwrap().unwrap();
    let second = timeout(TEST_TIMEOUT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(first.notification_id, "msg.1");
    assert_eq!(second.notification_id, "msg.2");

    client.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_stop_closes_and_silences_callbacks() {
    let connector = MockConnector::new();
    let (mut client, mut rx) = connected_client(&connector).await;
    let server = connector.server(0).unwrap();

    client.stop().await.unwrap();

    assert_eq!(client.state(), ConnectionState::Closed);
    assert_eq!(connector.written_count(PacketType::Disconnect), 1);
    assert_eq!(connector.close_count(), 1);

    // The supervisor and its handler are gone, so nothing more can arrive
    server.send_packet(&text_publish("msg.late", 9)).unwrap();
    assert!(rx.recv().await.is_none());

    // Stopping twice is harmless
    client.stop().await.unwrap();
    assert_eq!(client.state(), ConnectionState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_credentials_and_cookie_reach_the_wire() {
    let connector = MockConnector::new();
    let (tx, _rx) = mpsc::unbounded_channel::<WorksMessage>();
    let mut client = WorksClient::new(WorksConfig::default(), Arc::new(connector.clone()), tx)
        .unwrap()
        .with_credentials(Credentials::new("dummy", Some("token-123".to_string())))
        .with_cookie_header("NEO_SES=abc; lang=ja");
    let mut state = client.subscribe_state();

    client.start();
    timeout(
        TEST_TIMEOUT,
        state.wait_for(|s| *s == ConnectionState::Connected),
    )
    .await
    .unwrap()
    .unwrap();

    let handshakes = connector.handshakes();
    let (url, headers) = &handshakes[0];
    assert_eq!(url, "wss://jp1-web-noti.worksmobile.com/wmqtt");
    assert!(headers
        .iter()
        .any(|(name, value)| name == "Cookie" && value == "NEO_SES=abc; lang=ja"));
    assert!(headers
        .iter()
        .any(|(name, value)| name == "Sec-WebSocket-Protocol" && value == "mqtt"));

    let Some(Packet::Connect(connect)) = connector.written_packets().into_iter().next() else {
        panic!("first packet should be CONNECT");
    };
    assert_eq!(connect.username.as_deref(), Some("dummy"));
    assert_eq!(connect.password.as_deref(), Some(&b"token-123"[..]));
    assert_eq!(connect.keep_alive, 50);
    assert!(connect.clean_session);

    client.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_callback_handler() {
    let connector = MockConnector::new();
    let delivered = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = Arc::clone(&delivered);
    let mut client = WorksClient::new(
        WorksConfig::default(),
        Arc::new(connector.clone()),
        move |message: WorksMessage| sink.lock().unwrap().push(message.notification_id),
    )
    .unwrap();

    client.start();
    timeout(TEST_TIMEOUT, connector.wait_for_written(PacketType::Connect, 1))
        .await
        .unwrap();
    let server = connector.server(0).unwrap();
    server.send_packet(&text_publish("msg.cb", 4)).unwrap();
    timeout(TEST_TIMEOUT, connector.wait_for_written(PacketType::PubAck, 1))
        .await
        .unwrap();

    assert_eq!(*delivered.lock().unwrap(), vec!["msg.cb".to_string()]);
    client.stop().await.unwrap();
}
