use std::collections::VecDeque;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use slab::Slab;
use slog::{debug, trace, warn, Logger};

use crate::counters::ByteCounters;
use crate::event::{Io, Timer};
use crate::flags::ConnFlags;
use crate::ids::{ConnectionHandle, RequestId};
use crate::limits::Limits;
use crate::protocol::{self, LineReader};
use crate::request::{RequestList, RequestNode};

/// Connection state, independent of the `closing` flag (see the
/// DESIGN NOTES on the orthogonal Closing flag: it is a separate
/// dimension, not a variant of this enum, so a connection can be
/// "reused" by clearing `closing` without touching `state`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnState {
    Idle,
    Resolving,
    Connecting,
    Greeting,
    Ready,
}

/// One connection to the authority: its own socket (represented only as
/// an opaque handle the host tracks), both timers, the outbound queue,
/// the inbound line buffer, flags, and the list of requests it carries.
pub(crate) struct Connection {
    pub handle: ConnectionHandle,
    pub host: String,
    pub port: u16,
    pub addr: Option<SocketAddr>,
    pub password: String,
    pub reconnect_delay: Duration,
    pub request_timeout: Duration,
    pub recv: ByteCounters,
    pub sent: ByteCounters,
    pub inbound: LineReader,
    outbound: VecDeque<Bytes>,
    pub flags: ConnFlags,
    pub closing: bool,
    pub requests: RequestList,
    reconnect_timer: Option<Instant>,
    request_timeout_armed: Option<RequestId>,
    pub state: ConnState,
    server_name: String,
    log: Logger,
}

impl Connection {
    pub fn new(
        handle: ConnectionHandle,
        host: String,
        port: u16,
        password: String,
        reconnect_delay: Duration,
        request_timeout: Duration,
        server_name: String,
        log: Logger,
    ) -> Self {
        Self {
            handle,
            host,
            port,
            addr: None,
            password,
            reconnect_delay,
            request_timeout,
            recv: ByteCounters::default(),
            sent: ByteCounters::default(),
            inbound: LineReader::new(Limits::BUFSIZE),
            outbound: VecDeque::new(),
            flags: ConnFlags::empty(),
            closing: false,
            requests: RequestList::default(),
            reconnect_timer: None,
            request_timeout_armed: None,
            state: ConnState::Idle,
            server_name,
            log,
        }
    }

    pub fn matches(&self, host: &str, port: u16) -> bool {
        self.host == host && self.port == port
    }

    pub fn is_ready(&self) -> bool {
        self.state == ConnState::Ready
    }

    /// Applies an update from `connect_or_update` against an already
    /// existing connection: clears `closing`, updates the tunables, and
    /// re-evaluates (never extends) any pending reconnect.
    pub fn update_config(
        &mut self,
        password: String,
        reconnect_delay: Duration,
        request_timeout: Duration,
        now: Instant,
        out: &mut VecDeque<Io>,
    ) {
        self.closing = false;
        self.password = password;
        self.reconnect_delay = reconnect_delay;
        self.request_timeout = request_timeout;
        self.flags.insert(ConnFlags::ANNOUNCE_EXISTING_USERS);
        if self.reconnect_timer.is_some() {
            self.arm_reconnect(now, out);
        }
    }

    /// Begins connecting a freshly created connection: straight to
    /// `Connecting` if the hostname is a literal address, otherwise
    /// `Resolving`.
    pub fn start(&mut self, out: &mut VecDeque<Io>) {
        match self.host.parse::<IpAddr>() {
            Ok(ip) => {
                let addr = SocketAddr::new(ip, self.port);
                self.addr = Some(addr);
                self.state = ConnState::Connecting;
                out.push_back(Io::Connect {
                    connection: self.handle,
                    addr,
                });
            }
            Err(_) => {
                self.state = ConnState::Resolving;
                out.push_back(Io::Resolve {
                    connection: self.handle,
                    host: self.host.clone(),
                });
            }
        }
    }

    pub fn on_resolved(&mut self, addr: SocketAddr, out: &mut VecDeque<Io>) {
        if self.state != ConnState::Resolving {
            return;
        }
        self.addr = Some(addr);
        self.state = ConnState::Connecting;
        out.push_back(Io::Connect {
            connection: self.handle,
            addr,
        });
    }

    pub fn on_resolve_failed<C>(
        &mut self,
        arena: &mut Slab<RequestNode<C>>,
        now: Instant,
        out: &mut VecDeque<Io>,
    ) {
        warn!(self.log, "failed to resolve authority hostname"; "host" => &self.host);
        self.on_connection_lost(arena, now, out);
    }

    pub fn on_connect_failed<C>(
        &mut self,
        arena: &mut Slab<RequestNode<C>>,
        now: Instant,
        out: &mut VecDeque<Io>,
    ) {
        warn!(self.log, "failed to connect to authority"; "host" => &self.host, "port" => self.port);
        self.on_connection_lost(arena, now, out);
    }

    /// Handshake begins as soon as the socket is writable. The
    /// handshake-complete flag is set immediately per distilled §4.1;
    /// `Ready` follows once the greeting (and any already-queued
    /// requests) have been handed off for flushing.
    pub fn on_connected<C>(
        &mut self,
        arena: &mut Slab<RequestNode<C>>,
        now: Instant,
        out: &mut VecDeque<Io>,
    ) {
        debug!(self.log, "connected to authority");
        self.state = ConnState::Greeting;
        self.flags.insert(ConnFlags::HANDSHAKE_COMPLETE);
        self.queue_greeting();
        let pending: Vec<RequestId> = self.requests.iter(arena).collect();
        for id in pending {
            self.send_request(id, arena, now, out);
        }
        self.try_flush(out);
        if !self.flags.contains(ConnFlags::BLOCKED) {
            self.state = ConnState::Ready;
        }
    }

    fn queue_greeting(&mut self) {
        self.outbound
            .push_back(protocol::greeting_line(&self.server_name, &self.password));
        if self.flags.contains(ConnFlags::ANNOUNCE_EXISTING_USERS) {
            self.outbound.push_back(protocol::end_users_line());
            self.flags.remove(ConnFlags::ANNOUNCE_EXISTING_USERS);
        }
    }

    /// Serializes and enqueues a `FullAuth` line for `id`. Defers
    /// silently if the handshake hasn't completed yet — the request
    /// stays queued and is sent from `on_connected`'s resend loop.
    pub fn send_request<C>(
        &mut self,
        id: RequestId,
        arena: &mut Slab<RequestNode<C>>,
        now: Instant,
        out: &mut VecDeque<Io>,
    ) {
        if !self.flags.contains(ConnFlags::HANDSHAKE_COMPLETE) {
            return;
        }
        if self.request_timeout_armed.is_none() {
            self.request_timeout_armed = Some(id);
            arena[id.0].arms_timeout = true;
            out.push_back(Io::TimerStart {
                connection: self.handle,
                timer: Timer::RequestTimeout,
                delay: self.request_timeout,
            });
        }
        let _ = now;
        let node = &arena[id.0];
        let line = protocol::full_auth_line(
            &id.to_hex(),
            &node.info.name,
            &node.info.username,
            &node.info.host,
            &node.info.source_ip.to_string(),
            &node.info.password,
            &node.info.info,
        );
        self.outbound.push_back(line);
        trace!(self.log, "queued FullAuth"; "id" => id.to_hex());
        self.try_flush(out);
    }

    pub fn send_exit_user(&mut self, id: RequestId, out: &mut VecDeque<Io>) {
        if !self.is_ready() {
            return;
        }
        self.outbound.push_back(protocol::exit_user_line(&id.to_hex()));
        self.try_flush(out);
    }

    fn try_flush(&mut self, out: &mut VecDeque<Io>) {
        if self.flags.contains(ConnFlags::BLOCKED) || self.outbound.is_empty() {
            return;
        }
        let mut data = BytesMut::new();
        for chunk in self.outbound.drain(..) {
            data.extend_from_slice(&chunk);
        }
        out.push_back(Io::Send {
            connection: self.handle,
            data: data.freeze(),
        });
    }

    /// Accounts for bytes the host confirms were actually written for the
    /// outstanding `Io::Send`, and requeues whatever wasn't (`remaining`,
    /// empty on a full write). Only progress the host reports back is
    /// ever counted, never the full length handed to `Io::Send`.
    pub fn on_write_result(&mut self, sent: usize, remaining: Bytes, out: &mut VecDeque<Io>) {
        self.sent.add(sent);
        if remaining.is_empty() {
            return;
        }
        let was_blocked = self.flags.contains(ConnFlags::BLOCKED);
        self.flags.insert(ConnFlags::BLOCKED);
        self.outbound.push_front(remaining);
        if !was_blocked {
            out.push_back(Io::WantWritable {
                connection: self.handle,
                enable: true,
            });
        }
    }

    pub fn on_writable(&mut self, out: &mut VecDeque<Io>) {
        self.flags.remove(ConnFlags::BLOCKED);
        self.try_flush(out);
        if !self.flags.contains(ConnFlags::BLOCKED) {
            out.push_back(Io::WantWritable {
                connection: self.handle,
                enable: false,
            });
            if self.state == ConnState::Greeting {
                self.state = ConnState::Ready;
            }
        }
    }

    /// Accounts inbound bytes and returns every complete, non-blank line
    /// found, tokenized to at most `Limits::MAXPARA` tokens.
    pub fn on_readable(&mut self, data: &[u8]) -> Vec<Vec<String>> {
        self.recv.add(data.len());
        let lines = self.inbound.feed(data);
        lines
            .into_iter()
            .map(|line| {
                self.recv.message();
                protocol::tokenize(&line, Limits::MAXPARA)
            })
            .collect()
    }

    /// Arms (or shortens) the reconnect timer relative to `now`, never
    /// extending an already-pending expiry.
    pub fn arm_reconnect(&mut self, now: Instant, out: &mut VecDeque<Io>) {
        let proposed = now + self.reconnect_delay;
        let should_arm = match self.reconnect_timer {
            Some(existing) => proposed < existing,
            None => true,
        };
        if should_arm {
            self.reconnect_timer = Some(proposed);
            out.push_back(Io::TimerStart {
                connection: self.handle,
                timer: Timer::Reconnect,
                delay: proposed.saturating_duration_since(now),
            });
        }
    }

    fn disarm_reconnect(&mut self, out: &mut VecDeque<Io>) {
        if self.reconnect_timer.take().is_some() {
            out.push_back(Io::TimerStop {
                connection: self.handle,
                timer: Timer::Reconnect,
            });
        }
    }

    fn disarm_request_timeout<C>(&mut self, arena: &mut Slab<RequestNode<C>>, out: &mut VecDeque<Io>) {
        if let Some(id) = self.request_timeout_armed.take() {
            if let Some(node) = arena.get_mut(id.0) {
                node.arms_timeout = false;
            }
            out.push_back(Io::TimerStop {
                connection: self.handle,
                timer: Timer::RequestTimeout,
            });
        }
    }

    /// Unlinks `id` from this connection's list and disarms the
    /// request-timeout timer if `id` was the one holding it armed.
    /// Does not remove `id` from the shared arena; the caller owns that.
    pub fn dispose_request<C>(
        &mut self,
        id: RequestId,
        arena: &mut Slab<RequestNode<C>>,
        out: &mut VecDeque<Io>,
    ) {
        self.requests.remove(arena, id);
        if self.request_timeout_armed == Some(id) {
            self.disarm_request_timeout(arena, out);
        }
    }

    /// The request-timeout timer fired: per distilled §4.4 this tears
    /// the whole connection down and reschedules, rather than failing
    /// just the oldest request.
    pub fn on_request_timeout<C>(
        &mut self,
        arena: &mut Slab<RequestNode<C>>,
        now: Instant,
        out: &mut VecDeque<Io>,
    ) {
        if self.request_timeout_armed.is_none() {
            return;
        }
        warn!(self.log, "authority did not respond in time, reconnecting");
        self.on_connection_lost(arena, now, out);
    }

    pub fn on_reconnect_timer(&mut self, out: &mut VecDeque<Io>) {
        self.reconnect_timer = None;
        self.start(out);
    }

    /// Transport failure, EOF, connect failure, or response timeout: all
    /// funnel through here. Requests are preserved on the list; only the
    /// socket, buffers, and timers are reset.
    pub fn on_connection_lost<C>(
        &mut self,
        arena: &mut Slab<RequestNode<C>>,
        now: Instant,
        out: &mut VecDeque<Io>,
    ) {
        self.disarm_request_timeout(arena, out);
        self.disarm_reconnect(out);
        self.flags.remove(ConnFlags::BLOCKED | ConnFlags::HANDSHAKE_COMPLETE);
        self.outbound.clear();
        self.inbound = LineReader::new(Limits::BUFSIZE);
        if self.state != ConnState::Idle {
            out.push_back(Io::Close {
                connection: self.handle,
            });
        }
        self.addr = None;
        self.state = ConnState::Idle;
        self.arm_reconnect(now, out);
    }

    /// Final teardown used by `close_unused` once a connection's request
    /// list has already been drained: cancels both timers and closes
    /// the socket if one is open.
    pub fn shutdown(&mut self, out: &mut VecDeque<Io>) {
        self.disarm_reconnect(out);
        if self.request_timeout_armed.take().is_some() {
            out.push_back(Io::TimerStop {
                connection: self.handle,
                timer: Timer::RequestTimeout,
            });
        }
        if self.state != ConnState::Idle {
            out.push_back(Io::Close {
                connection: self.handle,
            });
        }
    }
}
