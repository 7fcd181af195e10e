
use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;
use wirecore::pool::{
    ConnectionFactory, ConnectionId, HostAndPort, PoolConnection, PoolOptions, PoolRuntime,
    ReactorFactory,
};
use wirecore::reactor::PollReactor;
use wirecore::ErrorKind;

const PROBE: &[u8] = b"ping";

// One real connection end to end: the runtime dials the listener, the
// setup probe round-trips, the request is fulfilled, and the pooled
// connection serves the next request too.
#[test]
fn runtime_round_trips_a_probe() {
    let _logger = test_utils::init_logger();

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let server = std::thread::spawn(move || {
        let (mut sock, _) = listener.accept().unwrap();
        let mut buf = [0_u8; PROBE.len()];
        while sock.read_exact(&mut buf).is_ok() {
            if sock.write_all(&buf).is_err() {
                break;
            }
        }
    });

    let host = HostAndPort::new("127.0.0.1", addr.port());
    let runtime = PoolRuntime::with_probe(PoolOptions::default(), PROBE.to_vec()).unwrap();

    let (tx, rx) = mpsc::channel();
    runtime
        .pool()
        .get(
            &host,
            Duration::from_secs(5),
            Box::new(move |swconn| {
                let outcome = swconn.map(|handle| handle.id()).map_err(|e| e.kind());
                tx.send(outcome).unwrap();
            }),
        )
        .unwrap();

    let first: Result<ConnectionId, ErrorKind> =
        rx.recv_timeout(Duration::from_secs(10)).unwrap();
    let first = first.expect("expected a live connection");

    // released back to the pool, the same transport serves the next get
    let (tx, rx) = mpsc::channel();
    runtime
        .pool()
        .get(
            &host,
            Duration::from_secs(5),
            Box::new(move |swconn| {
                let outcome = swconn.map(|handle| handle.id()).map_err(|e| e.kind());
                tx.send(outcome).unwrap();
            }),
        )
        .unwrap();
    let second = rx.recv_timeout(Duration::from_secs(10)).unwrap();
    assert_eq!(second, Ok(first));

    runtime.shutdown().unwrap();
    server.join().unwrap();
}

// A host that cannot be dialed fails its setup with HostUnreachable,
// delivered through the setup callback on the reactor worker.
#[test]
fn dial_failure_surfaces_as_host_unreachable() {
    let reactor = Arc::new(PollReactor::new().unwrap());
    let worker = Arc::clone(&reactor).spawn_worker().unwrap();

    // .invalid never resolves (RFC 6761)
    let host: HostAndPort = "wirecore.test.invalid:1".parse().unwrap();
    let factory = ReactorFactory::with_probe(Arc::clone(&reactor), PROBE.to_vec());
    let conn = factory.make_connection(&host);

    let (tx, rx) = mpsc::channel();
    conn.setup(
        Duration::from_secs(5),
        Box::new(move |conn, status| {
            tx.send(status.map_err(|e| e.kind())).unwrap();
            drop(conn);
        }),
    );

    assert_eq!(
        rx.recv_timeout(Duration::from_secs(10)).unwrap(),
        Err(ErrorKind::HostUnreachable)
    );

    reactor.shutdown().unwrap();
    worker.join().unwrap();
}

// The probe deadline and a late reply race for the same completion
// record; the deadline must win, deliver NetworkTimeout once, and the
// reply arriving afterwards must go nowhere.
#[test]
fn probe_deadline_beats_a_late_reply() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let (release_tx, release_rx) = mpsc::channel();
    let server = std::thread::spawn(move || {
        let (mut sock, _) = listener.accept().unwrap();
        let mut buf = [0_u8; PROBE.len()];
        sock.read_exact(&mut buf).unwrap();
        // answer only once the deadline has long passed
        release_rx.recv().unwrap();
        let _ = sock.write_all(&buf);
    });

    let reactor = Arc::new(PollReactor::new().unwrap());
    let worker = Arc::clone(&reactor).spawn_worker().unwrap();

    let host = HostAndPort::new("127.0.0.1", addr.port());
    let factory = ReactorFactory::with_probe(Arc::clone(&reactor), PROBE.to_vec());
    let conn = factory.make_connection(&host);

    let outcomes = Arc::new(Mutex::new(Vec::new()));
    let fired = Arc::new(AtomicUsize::new(0));

    let outcomes_in = Arc::clone(&outcomes);
    let fired_in = Arc::clone(&fired);
    conn.setup(
        Duration::from_millis(200),
        Box::new(move |conn, status| {
            outcomes_in
                .lock()
                .unwrap()
                .push(status.map_err(|e| e.kind()));
            fired_in.fetch_add(1, Ordering::SeqCst);
            drop(conn);
        }),
    );

    let deadline = std::time::Instant::now() + Duration::from_secs(10);
    while fired.load(Ordering::SeqCst) == 0 {
        assert!(std::time::Instant::now() < deadline, "deadline never fired");
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(*outcomes.lock().unwrap(), [Err(ErrorKind::NetworkTimeout)]);

    // let the reply arrive now; the cancelled op must not complete
    release_tx.send(()).unwrap();
    server.join().unwrap();
    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(fired.load(Ordering::SeqCst), 1);

    reactor.shutdown().unwrap();
    worker.join().unwrap();
}
