use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;

use crate::ids::ConnectionHandle;

/// Which of a connection's two timers fired or is being (re)armed.
///
/// Exactly one `RequestTimeout` timer may be active per connection at a
/// time (distilled §3 invariant); `Reconnect` is independent of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timer {
    Reconnect,
    RequestTimeout,
}

/// An action the host must perform on the core's behalf.
///
/// This core performs no I/O, DNS resolution, or timer management itself
/// (distilled §1 lists them as external collaborators); instead it
/// describes the action to take and lets the host execute it against the
/// real socket/resolver/timer wheel, then report the outcome back through
/// `AuthCore::on_*`. Draining `poll_io` to exhaustion after every `on_*`
/// call is the host's contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Io {
    /// Resolve `host` to an address; report back via `on_resolved` /
    /// `on_resolve_failed`.
    Resolve {
        connection: ConnectionHandle,
        host: String,
    },
    /// Open a nonblocking socket and begin connecting to `addr`; report
    /// back via `on_connected` / `on_connect_failed`.
    Connect {
        connection: ConnectionHandle,
        addr: SocketAddr,
    },
    /// Register or unregister interest in writable-ready events.
    WantWritable {
        connection: ConnectionHandle,
        enable: bool,
    },
    /// Write `data` to the connection's socket. Always call back with
    /// `on_write_result`, reporting however many bytes were actually
    /// written and, if the write was partial or would block, whatever
    /// wasn't (empty on a full write) — byte accounting only credits
    /// bytes the host confirms were transferred, never the full buffer
    /// handed to this action.
    Send {
        connection: ConnectionHandle,
        data: Bytes,
    },
    /// Close the connection's socket.
    Close { connection: ConnectionHandle },
    /// Arm (or re-arm) `timer`, firing after `delay` relative to "now".
    TimerStart {
        connection: ConnectionHandle,
        timer: Timer,
        delay: Duration,
    },
    /// Cancel `timer` if it is still pending.
    TimerStop {
        connection: ConnectionHandle,
        timer: Timer,
    },
}

/// A fact the host must react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event<C> {
    /// The authority approved the client. The host should copy these
    /// fields onto its own client object and resume registration.
    Admit {
        client: C,
        username: String,
        real_username: String,
        visible_host: String,
        account: Option<String>,
    },
    /// The authority rejected the client, or its connection was
    /// decommissioned without a successor to hand off to.
    Reject { client: C, reason: String },
    /// The authority sent a malformed or unrecognized-but-invalid line.
    /// The connection is kept; this is purely informational.
    ProtocolViolation {
        connection: ConnectionHandle,
        message: String,
    },
    /// `connect_or_update` created a new connection while a prior one was
    /// still active and not yet marked closing.
    OverlappingConnections { host: String, port: u16 },
}
