use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use pairchat::tcp::{select_ready, Companion, Session, SessionEnd};
use pairchat::{ClientEvent, RelayClient};

const POLL: Duration = Duration::from_millis(50);
const WAIT: Duration = Duration::from_secs(5);

/// Connect two clients to a throwaway listener and wrap the accepted ends.
async fn companions() -> (Companion, Companion, RelayClient, RelayClient) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let first_client = TcpStream::connect(addr).await.unwrap();
    let (first_stream, first_addr) = listener.accept().await.unwrap();
    let second_client = TcpStream::connect(addr).await.unwrap();
    let (second_stream, second_addr) = listener.accept().await.unwrap();

    (
        Companion::new(first_stream, first_addr),
        Companion::new(second_stream, second_addr),
        RelayClient::new(first_client),
        RelayClient::new(second_client),
    )
}

async fn next(client: &mut RelayClient) -> ClientEvent {
    timeout(WAIT, client.next_event())
        .await
        .expect("timed out waiting for event")
        .expect("receive failed")
        .expect("connection closed")
}

#[tokio::test]
async fn test_select_ready_times_out_when_idle() {
    let (first, second, _a, _b) = companions().await;
    let companions = [first, second];

    let ready = select_ready(&companions, POLL).await;
    assert!(ready.is_empty());
}

#[tokio::test]
async fn test_select_ready_reports_only_ready_companions() {
    let (first, second, _a, mut b) = companions().await;
    let companions = [first, second];

    b.get_mut().write_all(b"000ECHO").await.unwrap();
    let ready = timeout(WAIT, async {
        loop {
            let ready = select_ready(&companions, POLL).await;
            if !ready.is_empty() {
                return ready;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(ready, vec![1]);
}

#[tokio::test]
async fn test_select_ready_reports_ready_companion_under_budget_pressure() {
    let (first, second, _a, mut b) = companions().await;
    let companions = [first, second];

    b.get_mut().write_all(b"000ECHO").await.unwrap();
    timeout(WAIT, async {
        while select_ready(&companions, POLL).await.is_empty() {}
    })
    .await
    .unwrap();

    // Each ready channel receive spends one unit of the task's budget, so the
    // budget runs out at every position inside `select_ready` over the loop.
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<u32>();
    for i in 0..500 {
        tx.send(i).unwrap();
    }
    for _ in 0..500 {
        rx.recv().await.unwrap();
        assert_eq!(select_ready(&companions, POLL).await, vec![1]);
    }
}

#[tokio::test]
async fn test_companion_reads_commands() {
    let (mut first, _second, mut a, _b) = companions().await;

    a.get_mut().write_all(b"004ECHOpingGGGSEND").await.unwrap();
    let command = first.receive_command().await.unwrap();
    assert_eq!(command.iden, pairchat::Identifier::Echo);
    assert_eq!(command.payload, b"ping");

    let command = first.receive_command().await.unwrap();
    assert_eq!(command.iden, pairchat::Identifier::Unkn);

    drop(a);
    let err = first.receive_command().await.unwrap_err();
    assert!(err.is_disconnect());
}

#[tokio::test]
async fn test_session_ends_when_companion_resets() {
    let (first, second, mut a, b) = companions().await;
    let session = tokio::spawn(Session::new(1, first, second).run(POLL, CancellationToken::new()));

    let started = ClientEvent::Connected("CHAT_SUCCESSFULLY_STARTED".into());
    assert_eq!(next(&mut a).await, started);

    drop(b);
    assert_eq!(
        next(&mut a).await,
        ClientEvent::Disconnected("CHAT_STOPPED_BY_COMPANION".into())
    );

    let end = timeout(WAIT, session).await.unwrap().unwrap();
    assert_eq!(end, SessionEnd::Disconnected);
}

#[tokio::test]
async fn test_session_survives_both_companions_vanishing() {
    let (first, second, a, b) = companions().await;
    drop(a);
    drop(b);

    let end = timeout(WAIT, Session::new(2, first, second).run(POLL, CancellationToken::new()))
        .await
        .unwrap();
    assert_eq!(end, SessionEnd::Disconnected);
}

#[tokio::test]
async fn test_session_stops_on_shutdown() {
    let (first, second, mut a, mut b) = companions().await;
    let shutdown = CancellationToken::new();
    let session = tokio::spawn(Session::new(3, first, second).run(POLL, shutdown.clone()));

    let started = ClientEvent::Connected("CHAT_SUCCESSFULLY_STARTED".into());
    assert_eq!(next(&mut a).await, started);
    assert_eq!(next(&mut b).await, started);

    shutdown.cancel();
    let end = timeout(WAIT, session).await.unwrap().unwrap();
    assert_eq!(end, SessionEnd::Shutdown);

    let stopped = ClientEvent::Disconnected("CHAT_STOPPED_BY_COMPANION".into());
    assert_eq!(next(&mut a).await, stopped);
    assert_eq!(next(&mut b).await, stopped);
}

#[tokio::test]
async fn test_redundant_connect_is_acknowledged() {
    let (first, second, mut a, _b) = companions().await;
    let _session = tokio::spawn(Session::new(4, first, second).run(POLL, CancellationToken::new()));

    let started = ClientEvent::Connected("CHAT_SUCCESSFULLY_STARTED".into());
    assert_eq!(next(&mut a).await, started);

    a.send_command(pairchat::Command::new(pairchat::Identifier::Conn))
        .await
        .unwrap();
    assert_eq!(next(&mut a).await, started);
}
