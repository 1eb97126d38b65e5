use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use xmlstream_client::{
    ClientConfig, ClientEvent, ConnectError, Element, Endpoint, LivenessProbe, Readiness,
    SendError, XmlStreamClient,
};

const WAIT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(250);

fn fast_config() -> ClientConfig {
    ClientConfig::default()
        .with_poll_interval(Duration::from_millis(20))
        .with_reconnect_interval(Duration::from_millis(50))
}

fn listener() -> (TcpListener, Endpoint) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("loopback bind should succeed");
    let endpoint = Endpoint::from(listener.local_addr().expect("listener should have an address"));
    (listener, endpoint)
}

/// Next `StatusChanged` value, skipping other events.
fn next_status(rx: &Receiver<ClientEvent>, timeout: Duration) -> Option<bool> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.checked_duration_since(Instant::now())?;
        match rx.recv_timeout(remaining) {
            Ok(ClientEvent::StatusChanged(alive)) => return Some(alive),
            Ok(_) => continue,
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => return None,
        }
    }
}

fn next_element(rx: &Receiver<ClientEvent>) -> Element {
    let deadline = Instant::now() + WAIT;
    loop {
        let remaining = deadline
            .checked_duration_since(Instant::now())
            .expect("element should arrive in time");
        match rx.recv_timeout(remaining).expect("event should arrive in time") {
            ClientEvent::DataReceived(element) => return element,
            _ => continue,
        }
    }
}

/// Answers every chunk the way the reference echo server does.
fn spawn_echo_server(listener: TcpListener) -> thread::JoinHandle<io::Result<()>> {
    thread::spawn(move || {
        let (mut stream, _) = listener.accept()?;
        let mut buf = [0u8; 4096];
        loop {
            let n = stream.read(&mut buf)?;
            if n == 0 {
                return Ok(());
            }
            let chunk = String::from_utf8_lossy(&buf[..n]);
            let reply = format!(
                "<answer><note>You were sending</note><returning>{chunk}</returning></answer>\n"
            );
            stream.write_all(reply.as_bytes())?;
        }
    })
}

#[test]
fn connect_publishes_exactly_one_status_true() {
    let (listener, endpoint) = listener();
    let client = XmlStreamClient::new(endpoint, fast_config()).expect("client should start");
    let events = client.subscribe();

    client.connect().expect("connect should succeed");
    let (_peer, _) = listener.accept().expect("peer should accept");

    assert_eq!(next_status(&events, WAIT), Some(true));
    assert!(client.is_connected());
    assert!(client.is_alive());
    // Several watcher cycles pass without a repeat.
    assert_eq!(next_status(&events, QUIET), None);

    client.close();
}

#[test]
fn echo_round_trip() {
    let (listener, endpoint) = listener();
    let server = spawn_echo_server(listener);
    let client = XmlStreamClient::new(endpoint, fast_config()).expect("client should start");
    let events = client.subscribe();

    client.connect().expect("connect should succeed");
    client.send_text("hello").expect("send should succeed");

    let answer = next_element(&events);
    assert_eq!(answer.name(), "answer");
    assert_eq!(
        answer.find("note").map(Element::text).as_deref(),
        Some("You were sending")
    );
    assert_eq!(
        answer.find("returning").map(Element::text).as_deref(),
        Some("hello")
    );

    client.close();
    server
        .join()
        .expect("echo server should not panic")
        .expect("echo server should exit cleanly");
}

#[test]
fn element_payload_is_serialized_on_the_wire() {
    let (listener, endpoint) = listener();
    let client = XmlStreamClient::new(endpoint, fast_config()).expect("client should start");

    client.connect().expect("connect should succeed");
    let (mut peer, _) = listener.accept().expect("peer should accept");

    let element = Element::new("greeting").with_attr("lang", "en").with_text("hi");
    client.send_element(&element).expect("send should succeed");
    client.disconnect();

    let mut wire = String::new();
    peer.read_to_string(&mut wire).expect("peer should read until close");
    assert_eq!(Element::parse(&wire).expect("wire should hold one element"), element);
}

#[test]
fn noise_between_elements_is_skipped() {
    let (listener, endpoint) = listener();
    let client = XmlStreamClient::new(endpoint, fast_config()).expect("client should start");
    let events = client.subscribe();

    client.connect().expect("connect should succeed");
    let (mut peer, _) = listener.accept().expect("peer should accept");
    peer.write_all(b"<a>1</a>not xml</stray>\n<b/>")
        .expect("peer write should succeed");

    assert_eq!(next_element(&events), Element::new("a").with_text("1"));
    assert_eq!(next_element(&events), Element::new("b"));
    assert!(client.is_alive());

    client.close();
}

#[test]
fn peer_close_is_detected_without_reading() {
    const POLL: Duration = Duration::from_millis(100);

    let (listener, endpoint) = listener();
    let config = fast_config()
        .with_poll_interval(POLL)
        .with_auto_reconnect(false);
    let client = XmlStreamClient::new(endpoint, config).expect("client should start");
    let events = client.subscribe();

    client.connect().expect("connect should succeed");
    let (peer, _) = listener.accept().expect("peer should accept");
    assert_eq!(next_status(&events, WAIT), Some(true));

    let dropped = Instant::now();
    drop(peer);

    assert_eq!(next_status(&events, WAIT), Some(false));
    let noticed = dropped.elapsed();
    // One interval until the next probe, plus scheduling slack.
    assert!(noticed < POLL * 3, "loss noticed after {noticed:?}");
    assert!(!client.is_alive());
    // No reconnect when disabled.
    assert_eq!(next_status(&events, QUIET), None);

    client.close();
}

#[test]
fn reconnects_after_listener_comes_back() {
    let (listener, endpoint) = listener();
    let addr: SocketAddr = listener.local_addr().expect("listener should have an address");
    let client = XmlStreamClient::new(endpoint, fast_config()).expect("client should start");
    let events = client.subscribe();

    client.connect().expect("connect should succeed");
    let (peer, _) = listener.accept().expect("peer should accept");
    assert_eq!(next_status(&events, WAIT), Some(true));

    drop(peer);
    drop(listener);
    assert_eq!(next_status(&events, WAIT), Some(false));

    // Attempts fail while nothing listens.
    let deadline = Instant::now() + WAIT;
    loop {
        match events.recv_timeout(WAIT).expect("reconnect failure should be reported") {
            ClientEvent::ReconnectFailed { attempt, error } => {
                assert!(attempt >= 1);
                assert!(!error.is_empty());
                break;
            }
            other => assert!(Instant::now() < deadline, "unexpected event {other:?}"),
        }
    }

    let listener = TcpListener::bind(addr).expect("rebind on same port should succeed");
    let (_peer, _) = listener.accept().expect("reconnect should reach the new listener");

    assert_eq!(next_status(&events, WAIT), Some(true));
    assert!(client.is_alive());

    client.close();
}

#[test]
fn explicit_disconnect_does_not_reconnect() {
    let (listener, endpoint) = listener();
    let client = XmlStreamClient::new(endpoint, fast_config()).expect("client should start");
    let events = client.subscribe();

    client.connect().expect("connect should succeed");
    let (_peer, _) = listener.accept().expect("peer should accept");
    assert_eq!(next_status(&events, WAIT), Some(true));

    client.disconnect();
    assert_eq!(next_status(&events, WAIT), Some(false));
    assert!(!client.is_connected());

    thread::sleep(QUIET);
    listener
        .set_nonblocking(true)
        .expect("listener should switch to non-blocking");
    let second = listener.accept();
    assert!(
        matches!(&second, Err(err) if err.kind() == io::ErrorKind::WouldBlock),
        "client reconnected after explicit disconnect"
    );
    assert_eq!(next_status(&events, Duration::ZERO), None);

    client.close();
}

#[test]
fn double_disconnect_publishes_one_status_false() {
    let (listener, endpoint) = listener();
    let client = XmlStreamClient::new(endpoint, fast_config()).expect("client should start");
    let events = client.subscribe();

    client.connect().expect("connect should succeed");
    let (_peer, _) = listener.accept().expect("peer should accept");

    client.disconnect();
    client.disconnect();
    client.close();

    let statuses: Vec<bool> = events
        .try_iter()
        .filter_map(|event| match event {
            ClientEvent::StatusChanged(alive) => Some(alive),
            _ => None,
        })
        .collect();
    assert_eq!(statuses, [true, false]);
}

#[test]
fn send_while_disconnected_fails() {
    let (_listener, endpoint) = listener();
    let client = XmlStreamClient::new(endpoint, fast_config()).expect("client should start");

    let err = client.send_text("lost").expect_err("send should fail");
    assert!(matches!(err, SendError::NotConnected));
}

#[test]
fn send_racing_disconnect_fails_visibly() {
    let (listener, endpoint) = listener();
    let config = fast_config().with_auto_reconnect(false);
    let client = Arc::new(XmlStreamClient::new(endpoint, config).expect("client should start"));

    client.connect().expect("connect should succeed");
    // The peer never reads, so a large send blocks once the socket buffers fill.
    let (_peer, _) = listener.accept().expect("peer should accept");

    let (started_tx, started_rx) = mpsc::channel();
    let sender = {
        let client = Arc::clone(&client);
        thread::spawn(move || {
            let payload = "x".repeat(64 * 1024 * 1024);
            let _ = started_tx.send(());
            client.send_text(&payload)
        })
    };
    started_rx.recv_timeout(WAIT).expect("sender should start");
    thread::sleep(QUIET);

    client.disconnect();

    let in_flight = sender.join().expect("sender should not panic");
    assert!(
        matches!(in_flight, Err(SendError::Frame(_))),
        "in-flight send returned {in_flight:?}"
    );
    assert!(matches!(client.send_text("late"), Err(SendError::NotConnected)));

    client.close();
}

#[test]
fn connect_to_closed_port_fails_without_status() {
    let (listener, endpoint) = listener();
    drop(listener);
    let client = XmlStreamClient::new(endpoint, fast_config()).expect("client should start");
    let events = client.subscribe();

    let err = client.connect().expect_err("connect should fail");
    assert!(matches!(err, ConnectError::Transport(_)));
    assert!(!client.is_connected());
    assert_eq!(next_status(&events, QUIET), None);
}

#[derive(Clone, Default)]
struct ScriptedProbe {
    answer: Arc<Mutex<Option<Readiness>>>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedProbe {
    fn set(&self, readiness: Readiness) {
        *self.answer.lock().expect("probe lock should not be poisoned") = Some(readiness);
    }
}

impl LivenessProbe for ScriptedProbe {
    fn probe(&self, _stream: &TcpStream) -> io::Result<Readiness> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let answer = *self.answer.lock().expect("probe lock should not be poisoned");
        Ok(answer.unwrap_or(Readiness::Idle))
    }
}

#[test]
fn manual_probe_cycle_publishes_loss() {
    let (listener, endpoint) = listener();
    let probe = ScriptedProbe::default();
    let config = ClientConfig::default()
        .with_poll_interval(Duration::from_secs(3600))
        .with_auto_reconnect(false);
    let client =
        XmlStreamClient::with_probe(endpoint, config, probe.clone()).expect("client should start");
    let events = client.subscribe();

    client.connect().expect("connect should succeed");
    let (_peer, _) = listener.accept().expect("peer should accept");
    assert_eq!(next_status(&events, WAIT), Some(true));

    probe.set(Readiness::DataPending);
    assert!(client.probe_liveness());
    assert_eq!(next_status(&events, QUIET), None);

    probe.set(Readiness::Closed);
    assert!(!client.probe_liveness());
    assert_eq!(next_status(&events, WAIT), Some(false));

    assert!(!client.probe_liveness());
    assert_eq!(next_status(&events, QUIET), None);

    client.close();
}

#[test]
fn close_stops_the_watcher() {
    let (listener, endpoint) = listener();
    let probe = ScriptedProbe::default();
    let client = XmlStreamClient::with_probe(endpoint, fast_config(), probe.clone())
        .expect("client should start");

    client.connect().expect("connect should succeed");
    let (_peer, _) = listener.accept().expect("peer should accept");
    thread::sleep(Duration::from_millis(100));
    assert!(probe.calls.load(Ordering::SeqCst) > 0);

    client.close();
    client.close();
    let calls = probe.calls.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(100));
    assert_eq!(probe.calls.load(Ordering::SeqCst), calls);

    assert!(matches!(client.connect(), Err(ConnectError::Closed)));
    assert!(!client.is_connected());
}

#[test]
fn callback_can_reply_through_the_client() {
    let (listener, endpoint) = listener();
    let client = Arc::new(XmlStreamClient::new(endpoint, fast_config()).expect("client should start"));

    let weak = Arc::downgrade(&client);
    client.on_event(move |event| {
        if let ClientEvent::DataReceived(element) = event {
            if let Some(client) = weak.upgrade() {
                let ack = Element::new("ack").with_attr("for", element.name());
                client.send_element(&ack).expect("reply should send");
            }
        }
    });

    client.connect().expect("connect should succeed");
    let (mut peer, _) = listener.accept().expect("peer should accept");
    peer.set_read_timeout(Some(WAIT))
        .expect("read timeout should apply");
    peer.write_all(b"<ping/>").expect("peer write should succeed");

    let expected = b"<ack for=\"ping\"/>";
    let mut buf = vec![0u8; expected.len()];
    peer.read_exact(&mut buf).expect("ack should arrive");
    assert_eq!(buf, expected);

    client.close();
}
