//! End-to-end scenarios driven over a real `TcpListener` on an ephemeral
//! port: greeting, command lists, idle/noidle, unknown commands, and the
//! connection-limit refusal.

use std::sync::Arc;
use std::time::Duration;

use jukebox_core::command::DefaultCommandHandler;
use jukebox_core::config::Limits;
use jukebox_core::manager::{Listeners, Manager};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

async fn start_server(limits: Limits) -> (std::net::SocketAddr, Arc<Manager>, CancellationToken) {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let manager = Arc::new(Manager::new(limits, || Box::new(DefaultCommandHandler)));
    let cancel = CancellationToken::new();

    let run_manager = manager.clone();
    let run_cancel = cancel.clone();
    tokio::spawn(async move {
        let _ = run_manager
            .run(
                Listeners {
                    tcp: Some(listener),
                    unix: None,
                },
                run_cancel,
            )
            .await;
    });

    (addr, manager, cancel)
}

async fn connect(addr: std::net::SocketAddr) -> TcpStream {
    TcpStream::connect(addr).await.unwrap()
}

async fn read_exact_str(stream: &mut TcpStream, n: usize) -> String {
    let mut buf = vec![0u8; n];
    timeout(Duration::from_secs(5), stream.read_exact(&mut buf))
        .await
        .expect("timed out reading response")
        .unwrap();
    String::from_utf8(buf).unwrap()
}

#[tokio::test]
async fn greeting_and_ping() {
    let (addr, _manager, _cancel) = start_server(Limits::default()).await;
    let mut stream = connect(addr).await;

    let greeting = read_exact_str(&mut stream, b"OK MPD 0.20.0\n".len()).await;
    assert_eq!(greeting, "OK MPD 0.20.0\n");

    stream.write_all(b"ping\n").await.unwrap();
    let reply = read_exact_str(&mut stream, b"OK\n".len()).await;
    assert_eq!(reply, "OK\n");
}

#[tokio::test]
async fn command_list_silent_emits_one_ok() {
    let (addr, _manager, _cancel) = start_server(Limits::default()).await;
    let mut stream = connect(addr).await;
    read_exact_str(&mut stream, b"OK MPD 0.20.0\n".len()).await;

    stream
        .write_all(b"command_list_begin\nping\nping\ncommand_list_end\n")
        .await
        .unwrap();
    let reply = read_exact_str(&mut stream, b"OK\n".len()).await;
    assert_eq!(reply, "OK\n");
}

#[tokio::test]
async fn command_list_verbose_emits_list_ok_then_ok() {
    let (addr, _manager, _cancel) = start_server(Limits::default()).await;
    let mut stream = connect(addr).await;
    read_exact_str(&mut stream, b"OK MPD 0.20.0\n".len()).await;

    stream
        .write_all(b"command_list_ok_begin\nping\nping\ncommand_list_end\n")
        .await
        .unwrap();
    let reply = read_exact_str(&mut stream, b"list_OK\nlist_OK\nOK\n".len()).await;
    assert_eq!(reply, "list_OK\nlist_OK\nOK\n");
}

#[tokio::test]
async fn idle_then_external_event_delivers_notification() {
    let (addr, manager, _cancel) = start_server(Limits::default()).await;
    let mut stream = connect(addr).await;
    read_exact_str(&mut stream, b"OK MPD 0.20.0\n".len()).await;

    stream.write_all(b"idle player\n").await.unwrap();
    // Give the client task a moment to reach the parked idle state before
    // the event fires.
    tokio::time::sleep(Duration::from_millis(50)).await;

    manager.idle_add(jukebox_core::idle::PLAYER);

    let reply = read_exact_str(&mut stream, b"changed: player\nOK\n".len()).await;
    assert_eq!(reply, "changed: player\nOK\n");
}

#[tokio::test]
async fn noidle_after_idle_yields_just_ok() {
    let (addr, _manager, _cancel) = start_server(Limits::default()).await;
    let mut stream = connect(addr).await;
    read_exact_str(&mut stream, b"OK MPD 0.20.0\n".len()).await;

    stream.write_all(b"idle database\n").await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    stream.write_all(b"noidle\n").await.unwrap();

    let reply = read_exact_str(&mut stream, b"OK\n".len()).await;
    assert_eq!(reply, "OK\n");
}

#[tokio::test]
async fn eleventh_connection_is_refused() {
    let mut limits = Limits::default();
    limits.max_connections = 10;
    let (addr, manager, _cancel) = start_server(limits).await;

    let mut streams = Vec::new();
    for _ in 0..10 {
        let mut s = connect(addr).await;
        read_exact_str(&mut s, b"OK MPD 0.20.0\n".len()).await;
        streams.push(s);
    }
    // Give each accepted client task a moment to register itself before
    // asserting the live count.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(manager.connection_count(), 10);

    let mut eleventh = connect(addr).await;
    let mut buf = [0u8; 1];
    // The 11th connection is accepted at the TCP layer (the listener
    // backlog doesn't know about application limits) but the core refuses
    // it immediately: no greeting, and the socket is closed without data.
    let result = timeout(Duration::from_secs(2), eleventh.read(&mut buf)).await;
    match result {
        Ok(Ok(0)) => {}, // closed with no bytes: refused as expected
        Ok(Ok(n)) => panic!("expected no greeting, got {n} bytes"),
        Ok(Err(_)) => {}, // connection reset is also an acceptable refusal signal
        Err(_) => panic!("11th connection was not refused within the timeout"),
    }

    // The refused 11th connection must not have been counted as live.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(manager.connection_count(), 10);
}

#[tokio::test]
async fn unrecognized_command_gets_ack_not_ok() {
    let (addr, _manager, _cancel) = start_server(Limits::default()).await;
    let mut stream = connect(addr).await;
    read_exact_str(&mut stream, b"OK MPD 0.20.0\n".len()).await;

    stream.write_all(b"frobnicate\n").await.unwrap();
    let mut buf = [0u8; 256];
    let n = timeout(Duration::from_secs(5), stream.read(&mut buf))
        .await
        .unwrap()
        .unwrap();
    let reply = String::from_utf8_lossy(&buf[..n]);
    assert!(reply.starts_with("ACK "));
    assert!(reply.contains("frobnicate"));
}
