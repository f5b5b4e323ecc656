//! WebSocket channel management against the live mock server.

mod common;

use std::time::Duration;

use courier_core::{SocketError, SocketManager, SocketMessage};
use tokio::sync::mpsc;
use tokio::time::timeout;

use common::spawn_server;

type Received = mpsc::UnboundedReceiver<Result<SocketMessage, SocketError>>;

fn open(manager: &SocketManager, url: &str) -> Received {
    let (tx, rx) = mpsc::unbounded_channel();
    assert!(
        manager.add_socket(url, move |received| {
            let _ = tx.send(received);
        }),
        "add_socket({url}) refused"
    );
    rx
}

async fn next(rx: &mut Received) -> Result<SocketMessage, SocketError> {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no message within 5s")
        .expect("receiver closed")
}

async fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

#[tokio::test]
async fn echo_round_trips_text_and_binary() {
    let addr = spawn_server();
    let url = format!("ws://{addr}/ws/echo");
    let manager = SocketManager::new(Duration::from_secs(5));
    let mut rx = open(&manager, &url);

    assert!(manager.send(&url, SocketMessage::Text("hello".into())));
    assert_eq!(next(&mut rx).await.unwrap(), SocketMessage::Text("hello".into()));

    assert!(manager.send(&url, SocketMessage::Binary(vec![1, 2, 3])));
    assert_eq!(next(&mut rx).await.unwrap(), SocketMessage::Binary(vec![1, 2, 3]));
}

#[tokio::test]
async fn distinct_urls_each_get_a_channel() {
    let addr = spawn_server();
    let first = format!("ws://{addr}/ws/echo");
    let second = format!("ws://{addr}/ws/echo?room=2");
    let manager = SocketManager::new(Duration::from_secs(5));

    let _first_rx = open(&manager, &first);
    let _second_rx = open(&manager, &second);

    let mut expected = vec![first, second];
    expected.sort();
    assert_eq!(manager.open_channels(), expected);
}

#[tokio::test]
async fn duplicate_url_is_refused_and_original_survives() {
    let addr = spawn_server();
    let url = format!("ws://{addr}/ws/echo");
    let manager = SocketManager::new(Duration::from_secs(5));
    let mut rx = open(&manager, &url);

    assert!(!manager.add_socket(&url, |_| panic!("duplicate callback must never run")));
    assert_eq!(manager.open_channels(), vec![url.clone()]);

    assert!(manager.send(&url, SocketMessage::Text("still here".into())));
    assert_eq!(next(&mut rx).await.unwrap(), SocketMessage::Text("still here".into()));
}

#[tokio::test]
async fn ping_timer_tracks_open_channel_count() {
    let addr = spawn_server();
    let first = format!("ws://{addr}/ws/echo");
    let second = format!("ws://{addr}/ws/pings");
    let manager = SocketManager::new(Duration::from_secs(5));

    let _first_rx = open(&manager, &first);
    assert!(!manager.ping_active(), "one channel needs no ping");

    let _second_rx = open(&manager, &second);
    assert!(manager.ping_active());

    assert!(manager.close_socket(&second));
    assert!(!manager.ping_active());

    assert!(manager.close_socket(&first));
    assert!(!manager.ping_active());
    assert!(manager.open_channels().is_empty());
}

#[tokio::test]
async fn pings_reach_every_open_channel() {
    let addr = spawn_server();
    let first = format!("ws://{addr}/ws/pings");
    let second = format!("ws://{addr}/ws/pings?peer=2");
    let manager = SocketManager::new(Duration::from_millis(50));

    let mut first_rx = open(&manager, &first);
    let mut second_rx = open(&manager, &second);

    assert_eq!(next(&mut first_rx).await.unwrap(), SocketMessage::Text("ping".into()));
    assert_eq!(next(&mut second_rx).await.unwrap(), SocketMessage::Text("ping".into()));
}

#[tokio::test]
async fn remote_close_removes_the_channel() {
    let addr = spawn_server();
    let url = format!("ws://{addr}/ws/close");
    let manager = SocketManager::new(Duration::from_secs(5));
    let mut rx = open(&manager, &url);

    assert!(matches!(next(&mut rx).await, Err(SocketError::Closed)));
    assert!(wait_until(|| !manager.is_open(&url)).await);

    // The URL is free again once the channel is gone.
    let _again = open(&manager, &url);
}

#[tokio::test]
async fn send_after_close_is_refused() {
    let addr = spawn_server();
    let url = format!("ws://{addr}/ws/echo");
    let manager = SocketManager::new(Duration::from_secs(5));
    let _rx = open(&manager, &url);

    assert!(manager.close_socket(&url));
    assert!(!manager.close_socket(&url));
    assert!(!manager.send(&url, SocketMessage::Text("late".into())));
}
