
use pool_fixture::Fixture;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wirecore::pool::{ConnectionHandle, ConnectionId, ConnectionPool, HostAndPort, PoolOptions};
use wirecore::{ErrorKind, WireError, WireResult};

const GET_TIMEOUT: Duration = Duration::from_secs(5);

fn host() -> HostAndPort {
    "db0.example.net:20017".parse().unwrap()
}

type SharedSlot<T> = Arc<Mutex<Option<T>>>;

fn slot<T>() -> SharedSlot<T> {
    Arc::new(Mutex::new(None))
}

// get() a connection and immediately release it back to the pool,
// returning its identity.
fn get_and_release(pool: &ConnectionPool, fixture: &Fixture) -> ConnectionId {
    fixture.push_setup(Ok(()));
    let id = slot::<ConnectionId>();
    let id_in = Arc::clone(&id);
    pool.get(
        &host(),
        GET_TIMEOUT,
        Box::new(move |swconn| {
            let handle = swconn.expect("expected a connection");
            *id_in.lock().unwrap() = Some(handle.id());
        }),
    )
    .unwrap();
    let got = id.lock().unwrap().take();
    got.expect("request was not fulfilled")
}

fn get_and_hold(pool: &ConnectionPool, handle_slot: &SharedSlot<ConnectionHandle>) {
    let handle_in = Arc::clone(handle_slot);
    pool.get(
        &host(),
        GET_TIMEOUT,
        Box::new(move |swconn| {
            *handle_in.lock().unwrap() = Some(swconn.expect("expected a connection"));
        }),
    )
    .unwrap();
}

#[test]
fn same_conn_is_reused() {
    let _logger = test_utils::init_logger();
    let fixture = Fixture::new();
    let pool = ConnectionPool::new(fixture.factory(), PoolOptions::default());

    let conn1 = get_and_release(&pool, &fixture);
    let conn2 = get_and_release(&pool, &fixture);

    assert_eq!(conn1, conn2);
    assert_eq!(fixture.connections_made(), 1);
}

#[test]
fn different_hosts_get_different_conns() {
    let fixture = Fixture::new();
    let pool = ConnectionPool::new(fixture.factory(), PoolOptions::default());

    let ids = [
        "localhost:30000".parse().unwrap(),
        "localhost:30001".parse().unwrap(),
    ]
    .map(|h: HostAndPort| {
        fixture.push_setup(Ok(()));
        let id = slot::<ConnectionId>();
        let id_in = Arc::clone(&id);
        pool.get(
            &h,
            GET_TIMEOUT,
            Box::new(move |swconn| {
                *id_in.lock().unwrap() = Some(swconn.unwrap().id());
            }),
        )
        .unwrap();
        let got = id.lock().unwrap().take();
        got.unwrap()
    });

    assert_ne!(ids[0], ids[1]);
}

// With maxConnections = 2, two simultaneous checkouts get two distinct
// connections; a third request waits until one is released and then
// receives exactly that connection.
#[test]
fn capacity_bound_blocks_the_third_request() {
    let fixture = Fixture::new();
    let pool = ConnectionPool::new(
        fixture.factory(),
        PoolOptions::default().with_max_connections(2),
    );

    let h1 = slot::<ConnectionHandle>();
    let h2 = slot::<ConnectionHandle>();
    let h3 = slot::<ConnectionHandle>();

    fixture.push_setup(Ok(()));
    fixture.push_setup(Ok(()));
    get_and_hold(&pool, &h1);
    get_and_hold(&pool, &h2);

    let id1 = h1.lock().unwrap().as_ref().map(|h| h.id()).unwrap();
    let id2 = h2.lock().unwrap().as_ref().map(|h| h.id()).unwrap();
    assert_ne!(id1, id2);

    // no capacity left: the third request must wait
    get_and_hold(&pool, &h3);
    assert!(h3.lock().unwrap().is_none());
    assert_eq!(fixture.connections_made(), 2);

    // releasing the first connection fulfills the waiter with it
    let released = h1.lock().unwrap().take();
    drop(released);
    let id3 = h3.lock().unwrap().as_ref().map(|h| h.id()).unwrap();
    assert_eq!(id3, id1);
}

// Requests are fulfilled deadline-ascending: a later request with an
// earlier deadline jumps the queue.
#[test]
fn earliest_deadline_is_fulfilled_first() {
    let fixture = Fixture::new();
    let pool = ConnectionPool::new(
        fixture.factory(),
        PoolOptions::default().with_max_connections(1),
    );

    let order = Arc::new(Mutex::new(Vec::new()));

    for (tag, timeout) in [("2s", Duration::from_secs(2)), ("1s", Duration::from_secs(1))] {
        let order_in = Arc::clone(&order);
        pool.get(
            &host(),
            timeout,
            Box::new(move |swconn| {
                order_in.lock().unwrap().push(tag);
                drop(swconn);
            }),
        )
        .unwrap();
    }
    assert!(order.lock().unwrap().is_empty());

    // one setup completes; the 1s request must win, and the released
    // connection then serves the 2s request
    fixture.push_setup(Ok(()));
    assert_eq!(*order.lock().unwrap(), ["1s", "2s"]);
}

#[test]
fn request_times_out_with_exceeded_time_limit() {
    let fixture = Fixture::new();
    let pool = ConnectionPool::new(fixture.factory(), PoolOptions::default());

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_in = Arc::clone(&seen);
    pool.get(
        &host(),
        GET_TIMEOUT,
        Box::new(move |swconn| {
            seen_in
                .lock()
                .unwrap()
                .push(swconn.map(|_| ()).map_err(|e| e.kind()));
        }),
    )
    .unwrap();

    fixture.set_now(Duration::from_millis(4999));
    assert!(seen.lock().unwrap().is_empty());

    fixture.set_now(Duration::from_millis(1));
    assert_eq!(*seen.lock().unwrap(), [Err(ErrorKind::ExceededTimeLimit)]);

    // the deadline scan runs exactly once per request
    fixture.set_now(Duration::from_secs(60));
    assert_eq!(seen.lock().unwrap().len(), 1);
}

// A ready connection is refreshed every refreshRequirement of idleness.
#[test]
fn idle_connections_get_refreshed() {
    let fixture = Fixture::new();
    let pool = ConnectionPool::new(
        fixture.factory(),
        PoolOptions::default().with_refresh_requirement(Duration::from_secs(1)),
    );

    get_and_release(&pool, &fixture);
    assert_eq!(fixture.pending_refresh_count(), 0);

    fixture.set_now(Duration::from_secs(1));
    assert_eq!(fixture.pending_refresh_count(), 1);
    fixture.push_refresh(Ok(()));

    // refreshed at t=1s; nothing more until t=2s
    fixture.set_now(Duration::from_millis(500));
    assert_eq!(fixture.pending_refresh_count(), 0);

    fixture.set_now(Duration::from_millis(500));
    assert_eq!(fixture.pending_refresh_count(), 1);
    fixture.push_refresh(Ok(()));
}

// A connection handed back after sitting out longer than the refresh
// requirement is refreshed before it can serve anyone else.
#[test]
fn stale_returns_are_refreshed() {
    let fixture = Fixture::new();
    let pool = ConnectionPool::new(
        fixture.factory(),
        PoolOptions::default().with_refresh_requirement(Duration::from_secs(1)),
    );

    let held = slot::<ConnectionHandle>();
    fixture.push_setup(Ok(()));
    get_and_hold(&pool, &held);

    // hold it past the refresh requirement, then release
    fixture.set_now(Duration::from_secs(2));
    let handle = held.lock().unwrap().take();
    drop(handle);

    assert_eq!(fixture.pending_refresh_count(), 1);
    fixture.push_refresh(Ok(()));

    // refreshed and pooled again: next get reuses it without a new spawn
    let id = get_and_release(&pool, &fixture);
    assert_eq!(fixture.connections_made(), 1);
    assert_eq!(id, ConnectionId::new(0));
}

#[test]
fn failed_setup_spawns_a_replacement() {
    let fixture = Fixture::new();
    let pool = ConnectionPool::new(fixture.factory(), PoolOptions::default());

    let held = slot::<ConnectionHandle>();
    get_and_hold(&pool, &held);
    assert_eq!(fixture.pending_setup_count(), 1);

    fixture.push_setup(Err(WireError::HostUnreachable("connection refused".into())));

    // the request is still queued, so a replacement spawn happens
    assert_eq!(fixture.pending_setup_count(), 1);
    fixture.push_setup(Ok(()));
    assert!(held.lock().unwrap().is_some());
    assert_eq!(fixture.connections_made(), 2);
}

#[test]
fn failed_connections_are_dropped_not_pooled() {
    let fixture = Fixture::new();
    let pool = ConnectionPool::new(fixture.factory(), PoolOptions::default());

    let held = slot::<ConnectionHandle>();
    fixture.push_setup(Ok(()));
    get_and_hold(&pool, &held);

    {
        let mut guard = held.lock().unwrap();
        let handle = guard.as_mut().unwrap();
        handle.indicate_failed();
    }
    let handle = held.lock().unwrap().take();
    drop(handle);

    assert_eq!(fixture.connections_dropped(), [ConnectionId::new(0)]);

    // the next get spawns a fresh connection
    let id = get_and_release(&pool, &fixture);
    assert_eq!(id, ConnectionId::new(1));
}

// The pool keeps minConnections warm once the first request has been
// seen, bounded above by maxConnections.
#[test]
fn minimum_is_topped_up_after_first_request() {
    let fixture = Fixture::new();
    let pool = ConnectionPool::new(
        fixture.factory(),
        PoolOptions::default()
            .with_min_connections(3)
            .with_max_connections(5),
    );

    assert_eq!(fixture.connections_made(), 0);

    let held = slot::<ConnectionHandle>();
    get_and_hold(&pool, &held);

    // one spawn for the request itself, two more for the minimum
    assert_eq!(fixture.connections_made(), 3);
    assert_eq!(fixture.pending_setup_count(), 3);
}

#[test]
fn capacity_is_never_exceeded_while_spawning() {
    let fixture = Fixture::new();
    let pool = ConnectionPool::new(
        fixture.factory(),
        PoolOptions::default().with_max_connections(2),
    );

    for _ in 0..5 {
        pool.get(&host(), GET_TIMEOUT, Box::new(|swconn| drop(swconn)))
            .unwrap();
    }
    assert_eq!(fixture.connections_made(), 2);
    assert_eq!(fixture.pending_setup_count(), 2);
}

// With hostTimeout passed and no activity, the per-host pool drops its
// connections and disappears; the next request builds a fresh one.
#[test]
fn host_timeout_drops_the_pool() {
    let fixture = Fixture::new();
    let pool = ConnectionPool::new(
        fixture.factory(),
        PoolOptions::default()
            .with_host_timeout(Duration::from_secs(1))
            .with_refresh_requirement(Duration::from_secs(10)),
    );

    let id0 = get_and_release(&pool, &fixture);
    assert_eq!(id0, ConnectionId::new(0));

    fixture.set_now(Duration::from_secs(1));
    assert_eq!(fixture.connections_dropped(), [ConnectionId::new(0)]);
    // no leaked timers: the request, host, and eviction timers are gone
    assert_eq!(fixture.live_timer_count(), 0);

    fixture.set_now(Duration::from_millis(1));
    let id1 = get_and_release(&pool, &fixture);
    assert_eq!(id1, ConnectionId::new(1));
}

#[test]
fn new_request_revives_an_idle_pool() {
    let fixture = Fixture::new();
    let pool = ConnectionPool::new(
        fixture.factory(),
        PoolOptions::default()
            .with_host_timeout(Duration::from_secs(2))
            .with_refresh_requirement(Duration::from_secs(10)),
    );

    get_and_release(&pool, &fixture);

    // activity before the host timeout keeps the pool (and its
    // connection) alive
    fixture.set_now(Duration::from_secs(1));
    let id = get_and_release(&pool, &fixture);
    assert_eq!(id, ConnectionId::new(0));
    assert!(fixture.connections_dropped().is_empty());
}

#[test]
fn shutdown_fails_queued_requests_exactly_once() {
    let fixture = Fixture::new();
    let pool = ConnectionPool::new(fixture.factory(), PoolOptions::default());

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_in = Arc::clone(&seen);
    pool.get(
        &host(),
        GET_TIMEOUT,
        Box::new(move |swconn: WireResult<ConnectionHandle>| {
            seen_in
                .lock()
                .unwrap()
                .push(swconn.map(|_| ()).map_err(|e| e.kind()));
        }),
    )
    .unwrap();

    pool.shutdown().unwrap();
    assert_eq!(*seen.lock().unwrap(), [Err(ErrorKind::ShutdownInProgress)]);

    // the deadline passing later must not fire the callback again
    fixture.set_now(Duration::from_secs(60));
    assert_eq!(seen.lock().unwrap().len(), 1);
}
