use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

use authd_client::{AuthCore, ClientInfo, ConnectConfig, Event, Io, StartClientError, Timer};
use bytes::Bytes;
use slog::{o, Discard, Logger};

type Core = AuthCore<u32>;

fn test_logger() -> Logger {
    Logger::root(Discard, o!())
}

fn cfg(host: &str, port: u16, password: &str, reconnect_secs: u64, timeout_secs: u64) -> ConnectConfig {
    ConnectConfig {
        host: host.to_string(),
        port,
        password: password.to_string(),
        reconnect_delay: Duration::from_secs(reconnect_secs),
        request_timeout: Duration::from_secs(timeout_secs),
    }
}

fn client_info(name: &str, username: &str, host: &str, ip: &str, password: &str, info: &str) -> ClientInfo {
    ClientInfo {
        name: name.to_string(),
        username: username.to_string(),
        host: host.to_string(),
        source_ip: ip.parse::<IpAddr>().unwrap(),
        password: password.to_string(),
        info: info.to_string(),
    }
}

fn pop_send(core: &mut Core) -> Bytes {
    match core.poll_io().expect("expected Io::Send") {
        Io::Send { data, .. } => data,
        other => panic!("expected Io::Send, got {other:?}"),
    }
}

fn pop_timer_start(core: &mut Core, want: Timer) {
    match core.poll_io().expect("expected Io::TimerStart") {
        Io::TimerStart { timer, .. } => assert_eq!(timer, want),
        other => panic!("expected Io::TimerStart, got {other:?}"),
    }
}

fn pop_timer_stop(core: &mut Core, want: Timer) {
    match core.poll_io().expect("expected Io::TimerStop") {
        Io::TimerStop { timer, .. } => assert_eq!(timer, want),
        other => panic!("expected Io::TimerStop, got {other:?}"),
    }
}

fn pop_close(core: &mut Core) {
    match core.poll_io().expect("expected Io::Close") {
        Io::Close { .. } => {}
        other => panic!("expected Io::Close, got {other:?}"),
    }
}

fn drain_io(core: &mut Core) -> Vec<Io> {
    let mut out = Vec::new();
    while let Some(io) = core.poll_io() {
        out.push(io);
    }
    out
}

/// Extracts the correlation id (second token) out of a `FullAuth` line.
fn full_auth_id(line: &[u8]) -> String {
    let text = String::from_utf8_lossy(line);
    text.split_whitespace().nth(1).unwrap().to_string()
}

fn localhost(port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4)), port)
}

/// Brings a freshly created connection with a literal-IP host all the
/// way to `Ready`, returning any greeting bytes sent.
fn bring_up(core: &mut Core, conn: authd_client::ConnectionHandle, now: Instant) -> Bytes {
    // literal IP hosts skip straight to Connecting, no Io::Resolve.
    assert!(matches!(core.poll_io(), Some(Io::Connect { .. })));
    core.on_connected(conn, now);
    pop_send(core)
}

#[test]
fn s1_happy_path() {
    let mut core = Core::new("srv1", test_logger());
    let now = Instant::now();

    let conn = core.connect_or_update(cfg("a.example", 9000, "", 60, 30), now);
    match core.poll_io().expect("expected Io::Resolve") {
        Io::Resolve { host, .. } => assert_eq!(host, "a.example"),
        other => panic!("expected Io::Resolve, got {other:?}"),
    }
    core.on_resolved(conn, localhost(9000));
    assert!(matches!(core.poll_io(), Some(Io::Connect { .. })));
    core.on_connected(conn, now);
    let greeting = pop_send(&mut core);
    assert!(greeting.starts_with(b"Server srv1"));
    assert!(core.poll_io().is_none());

    core.start_client(
        1,
        client_info("alice", "u", "h", "1.2.3.4", "p", "real name"),
        now,
    )
    .unwrap();
    pop_timer_start(&mut core, Timer::RequestTimeout);
    let full_auth = pop_send(&mut core);
    let text = String::from_utf8(full_auth.to_vec()).unwrap();
    assert!(text.starts_with("FullAuth "));
    assert!(text.ends_with(":real name\r\n"));
    let id = full_auth_id(&full_auth);

    core.on_readable(
        conn,
        format!("DoneAuth {id} alice2 visible.example User\r\n").as_bytes(),
        now,
    );
    pop_timer_stop(&mut core, Timer::RequestTimeout);
    assert!(core.poll_io().is_none());

    match core.poll_event().expect("expected Event::Admit") {
        Event::Admit {
            client,
            username,
            real_username,
            visible_host,
            account,
        } => {
            assert_eq!(client, 1);
            assert_eq!(username, "alice2");
            assert_eq!(real_username, "alice2");
            assert_eq!(visible_host, "visible.example");
            assert_eq!(account, None);
        }
        other => panic!("expected Event::Admit, got {other:?}"),
    }
    assert!(core.poll_event().is_none());
}

#[test]
fn s2_rejection() {
    let mut core = Core::new("srv1", test_logger());
    let now = Instant::now();
    let conn = core.connect_or_update(cfg("10.0.0.1", 9000, "", 60, 30), now);
    bring_up(&mut core, conn, now);

    core.start_client(
        7,
        client_info("carol", "u", "h", "5.6.7.8", "", "carol c."),
        now,
    )
    .unwrap();
    pop_timer_start(&mut core, Timer::RequestTimeout);
    let full_auth = pop_send(&mut core);
    let id = full_auth_id(&full_auth);

    core.on_readable(conn, format!("BadAuth {id} :banned by policy\r\n").as_bytes(), now);
    pop_timer_stop(&mut core, Timer::RequestTimeout);

    match core.poll_event().expect("expected Event::Reject") {
        Event::Reject { client, reason } => {
            assert_eq!(client, 7);
            assert_eq!(reason, "banned by policy");
        }
        other => panic!("expected Event::Reject, got {other:?}"),
    }
}

#[test]
fn s3_connection_failure_resends_on_reconnect() {
    let mut core = Core::new("srv1", test_logger());
    let now = Instant::now();
    let conn = core.connect_or_update(cfg("10.0.0.2", 9000, "", 60, 30), now);
    bring_up(&mut core, conn, now);

    core.start_client(
        9,
        client_info("bob", "u", "h", "9.9.9.9", "", "bob b."),
        now,
    )
    .unwrap();
    pop_timer_start(&mut core, Timer::RequestTimeout);
    let first = pop_send(&mut core);
    let id = full_auth_id(&first);

    core.on_eof(conn, now);
    pop_timer_stop(&mut core, Timer::RequestTimeout);
    pop_close(&mut core);
    pop_timer_start(&mut core, Timer::Reconnect);
    assert!(core.poll_io().is_none());

    core.on_timer(conn, Timer::Reconnect, now + Duration::from_secs(61));
    assert!(matches!(core.poll_io(), Some(Io::Connect { .. })));
    core.on_connected(conn, now + Duration::from_secs(61));
    pop_timer_start(&mut core, Timer::RequestTimeout);

    let io = drain_io(&mut core);
    let full_auths: Vec<&Bytes> = io
        .iter()
        .filter_map(|e| match e {
            Io::Send { data, .. } => Some(data),
            _ => None,
        })
        .collect();
    let combined: String = full_auths
        .iter()
        .map(|b| String::from_utf8_lossy(b).into_owned())
        .collect();
    assert_eq!(combined.matches("FullAuth").count(), 1);
    assert!(combined.contains(&format!("FullAuth {id} ")));
}

#[test]
fn s4_rotation_with_successor_resends_in_order() {
    let mut core = Core::new("srv1", test_logger());
    let now = Instant::now();
    let a = core.connect_or_update(cfg("10.0.1.1", 9000, "", 60, 30), now);
    bring_up(&mut core, a, now);

    core.start_client(10, client_info("p", "u", "h", "1.1.1.1", "", "p p."), now)
        .unwrap();
    pop_timer_start(&mut core, Timer::RequestTimeout);
    let p_full_auth = pop_send(&mut core);
    let p_id = full_auth_id(&p_full_auth);

    core.start_client(11, client_info("q", "u", "h", "2.2.2.2", "", "q q."), now)
        .unwrap();
    let q_full_auth = pop_send(&mut core);
    let q_id = full_auth_id(&q_full_auth);

    core.mark_all_closing();
    let b = core.connect_or_update(cfg("10.0.1.2", 9000, "", 60, 30), now);
    assert!(core.poll_event().is_none(), "A was already closing, no overlap warning expected");
    assert!(matches!(core.poll_io(), Some(Io::Connect { .. })));

    core.close_unused(now);
    // A's teardown: both timers were already quiet (no in-flight timer to stop besides
    // request-timeout, which stays armed until the requests are disposed or re-sent).
    let drained_before_connect = drain_io(&mut core);
    assert!(drained_before_connect
        .iter()
        .any(|io| matches!(io, Io::TimerStop { timer: Timer::RequestTimeout, .. })));

    core.on_connected(b, now);
    let io = drain_io(&mut core);
    let sends: String = io
        .iter()
        .filter_map(|e| match e {
            Io::Send { data, .. } => Some(String::from_utf8_lossy(data).into_owned()),
            _ => None,
        })
        .collect();
    let p_pos = sends.find(&format!("FullAuth {p_id} ")).expect("p re-sent");
    let q_pos = sends.find(&format!("FullAuth {q_id} ")).expect("q re-sent");
    assert!(p_pos < q_pos, "requests must be re-sent in original order");
}

#[test]
fn s5_rotation_without_successor_fails_open() {
    let mut core = Core::new("srv1", test_logger());
    let now = Instant::now();
    let a = core.connect_or_update(cfg("10.0.2.1", 9000, "", 60, 30), now);
    bring_up(&mut core, a, now);

    core.start_client(20, client_info("p", "u", "h", "1.1.1.1", "", "p p."), now)
        .unwrap();
    pop_timer_start(&mut core, Timer::RequestTimeout);
    pop_send(&mut core);
    core.start_client(21, client_info("q", "u", "h", "2.2.2.2", "", "q q."), now)
        .unwrap();
    pop_send(&mut core);

    core.mark_all_closing();
    core.close_unused(now);

    let mut admitted = Vec::new();
    while let Some(event) = core.poll_event() {
        match event {
            Event::Admit {
                client,
                username,
                real_username,
                visible_host,
                account,
            } => {
                assert_eq!(username, real_username);
                assert_eq!(visible_host, "");
                assert_eq!(account, None);
                admitted.push(client);
            }
            other => panic!("expected only Event::Admit during fail-open drain, got {other:?}"),
        }
    }
    admitted.sort();
    assert_eq!(admitted, vec![20, 21]);

    // No connection survives to carry a new request.
    let err = core
        .start_client(22, client_info("r", "u", "h", "3.3.3.3", "", "r r."), now)
        .unwrap_err();
    assert_eq!(err, StartClientError::NoActiveConnection);
}

#[test]
fn s6_protocol_violation_keeps_connection_alive() {
    let mut core = Core::new("srv1", test_logger());
    let now = Instant::now();
    let conn = core.connect_or_update(cfg("10.0.3.1", 9000, "", 60, 30), now);
    bring_up(&mut core, conn, now);

    core.on_readable(conn, b"DoneAuth deadbeef\r\n", now);

    match core.poll_event().expect("expected Event::ProtocolViolation") {
        Event::ProtocolViolation { connection, message } => {
            assert_eq!(connection, conn);
            assert!(message.contains("DoneAuth"));
        }
        other => panic!("expected Event::ProtocolViolation, got {other:?}"),
    }
    assert!(core.poll_event().is_none());
    assert!(core.poll_io().is_none());

    // The connection is still usable: a fresh request goes through normally.
    core.start_client(30, client_info("dave", "u", "h", "4.4.4.4", "", "dave d."), now)
        .unwrap();
    pop_timer_start(&mut core, Timer::RequestTimeout);
    let full_auth = pop_send(&mut core);
    assert!(full_auth.starts_with(b"FullAuth"));
}
