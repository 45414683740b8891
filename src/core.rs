use std::collections::VecDeque;
use std::hash::Hash;
use std::net::SocketAddr;
use std::time::Instant;

use bytes::Bytes;
use fnv::FnvHashMap;
use slab::Slab;
use slog::{o, warn, Logger};

use crate::client::ClientInfo;
use crate::config::ConnectConfig;
use crate::connection::Connection;
use crate::dispatch;
use crate::error::StartClientError;
use crate::event::{Event, Io, Timer};
use crate::ids::{ConnectionHandle, RequestId};
use crate::registry::Registry;
use crate::request::RequestNode;

/// The sans-I/O authorization client core.
///
/// `AuthCore` performs no socket I/O, DNS resolution, or timer
/// management itself. The host drives it by calling the `on_*` methods
/// when something happens (bytes arrive, a connect completes, a timer
/// fires) and by draining [`Self::poll_io`] and [`Self::poll_event`]
/// to exhaustion after every such call — the same `poll()` / action-queue
/// shape `quinn_proto::Endpoint` uses for the same reason: it makes the
/// whole state machine unit-testable without a real network.
///
/// `C` is an opaque, host-supplied client identifier. The core never
/// dereferences it; it only uses it as a map key and as an [`Event`]
/// payload, because Rust's aliasing rules don't allow holding a mutably
/// shared reference to the host's client object the way the distilled
/// design's `struct Client *` back-pointer does.
pub struct AuthCore<C: Copy + Eq + Hash> {
    pub(crate) registry: Registry,
    pub(crate) requests: Slab<RequestNode<C>>,
    pub(crate) client_requests: FnvHashMap<C, RequestId>,
    pub(crate) io: VecDeque<Io>,
    pub(crate) events: VecDeque<Event<C>>,
    server_name: String,
    pub(crate) log: Logger,
}

impl<C: Copy + Eq + Hash> AuthCore<C> {
    pub fn new(server_name: impl Into<String>, log: Logger) -> Self {
        Self {
            registry: Registry::default(),
            requests: Slab::new(),
            client_requests: FnvHashMap::default(),
            io: VecDeque::new(),
            events: VecDeque::new(),
            server_name: server_name.into(),
            log,
        }
    }

    /// Creates or reconfigures the connection for `config.host:config.port`.
    ///
    /// An existing match has its `closing` flag cleared and its tunables
    /// updated in place (shortening, never extending, a pending
    /// reconnect). Otherwise a new connection is created and becomes the
    /// registry's new active connection; if the previous active
    /// connection was not already closing, an
    /// [`Event::OverlappingConnections`] is raised.
    pub fn connect_or_update(&mut self, config: ConnectConfig, now: Instant) -> ConnectionHandle {
        let ConnectConfig {
            host,
            port,
            password,
            reconnect_delay,
            request_timeout,
        } = config;
        if let Some(existing) = self.registry.find_by_host_port(&host, port) {
            self.registry.get_mut(existing).update_config(
                password,
                reconnect_delay,
                request_timeout,
                now,
                &mut self.io,
            );
            return existing;
        }
        let prev_active = self.registry.active();
        let server_name = self.server_name.clone();
        let log = self.log.new(o!("iauth" => format!("{host}:{port}")));
        let host_for_conn = host.clone();
        let handle = self.registry.insert_with(move |handle| {
            Connection::new(
                handle,
                host_for_conn,
                port,
                password,
                reconnect_delay,
                request_timeout,
                server_name,
                log,
            )
        });
        self.registry.get_mut(handle).start(&mut self.io);
        if let Some(prev) = prev_active {
            if !self.registry.get(prev).closing {
                warn!(self.log, "new authority connection while a previous one is still active";
                    "host" => &host, "port" => port);
                self.events
                    .push_back(Event::OverlappingConnections { host, port });
            }
        }
        handle
    }

    /// Marks every connection `closing`. Typically called before
    /// reparsing configuration, so that only connections re-registered
    /// by a following burst of `connect_or_update` calls retain service.
    pub fn mark_all_closing(&mut self) {
        self.registry.mark_all_closing();
    }

    /// Drains and frees every connection still marked `closing`.
    ///
    /// Each closing connection's request list is spliced onto the
    /// active non-closing connection (re-sending every moved request
    /// there) if one exists; otherwise every request on the list is
    /// admitted fail-open, with the client's provisional username
    /// copied into the real-username field.
    pub fn close_unused(&mut self, now: Instant) {
        let closing = self.registry.closing_handles();
        let target = self.registry.active().filter(|h| !closing.contains(h));
        for handle in closing {
            let (head, tail) = self.registry.get_mut(handle).requests.take();
            let mut ids = Vec::new();
            let mut cur = head;
            while let Some(id) = cur {
                ids.push(id);
                cur = self.requests[id.0].next();
            }
            match target {
                Some(target) if !ids.is_empty() => {
                    for &id in &ids {
                        self.requests[id.0].conn = target;
                    }
                    self.registry
                        .get_mut(target)
                        .requests
                        .append_chain(&mut self.requests, head, tail);
                    if !self.registry.get(target).closing {
                        for &id in &ids {
                            self.registry.get_mut(target).send_request(
                                id,
                                &mut self.requests,
                                now,
                                &mut self.io,
                            );
                        }
                    }
                }
                _ => {
                    for id in ids {
                        let node = &self.requests[id.0];
                        let client = node.client;
                        let username = node.info.username.clone();
                        self.client_requests.remove(&client);
                        self.requests.remove(id.0);
                        self.events.push_back(Event::Admit {
                            client,
                            username: username.clone(),
                            real_username: username,
                            visible_host: String::new(),
                            account: None,
                        });
                    }
                }
            }
            let mut conn = self.registry.remove(handle);
            conn.shutdown(&mut self.io);
        }
    }

    /// Starts an authorization request for `client`.
    ///
    /// Fails if `client` already has one pending, or if no non-closing
    /// connection exists to carry it — the one allocation failure the
    /// distilled error taxonomy calls out as reaching the caller
    /// directly rather than being handled as a connection-level event.
    pub fn start_client(
        &mut self,
        client: C,
        info: ClientInfo,
        now: Instant,
    ) -> Result<(), StartClientError> {
        if self.client_requests.contains_key(&client) {
            return Err(StartClientError::AlreadyPending);
        }
        let Some(active) = self.registry.active() else {
            return Err(StartClientError::NoActiveConnection);
        };
        let entry = self.requests.vacant_entry();
        let id = RequestId(entry.key());
        entry.insert(RequestNode::new(client, active, info));
        self.client_requests.insert(client, id);
        let conn = self.registry.get_mut(active);
        conn.requests.append(&mut self.requests, id);
        conn.send_request(id, &mut self.requests, now, &mut self.io);
        Ok(())
    }

    /// Cancels `client`'s pending request, if any, and notifies the
    /// authority with `ExitUser` — but only when there was in fact a
    /// request to cancel, so the round-trip law in distilled §8 holds
    /// exactly ("enqueues exactly one `ExitUser` line iff...").
    pub fn exit_client(&mut self, client: C, now: Instant) {
        let _ = now;
        let Some(id) = self.client_requests.remove(&client) else {
            return;
        };
        let owner = self.requests[id.0].conn;
        self.registry
            .get_mut(owner)
            .dispose_request(id, &mut self.requests, &mut self.io);
        self.requests.remove(id.0);
        if let Some(active) = self.registry.active() {
            self.registry.get_mut(active).send_exit_user(id, &mut self.io);
        }
    }

    pub fn on_resolved(&mut self, conn: ConnectionHandle, addr: SocketAddr) {
        self.registry.get_mut(conn).on_resolved(addr, &mut self.io);
    }

    pub fn on_resolve_failed(&mut self, conn: ConnectionHandle, now: Instant) {
        self.registry
            .get_mut(conn)
            .on_resolve_failed(&mut self.requests, now, &mut self.io);
    }

    pub fn on_connected(&mut self, conn: ConnectionHandle, now: Instant) {
        self.registry
            .get_mut(conn)
            .on_connected(&mut self.requests, now, &mut self.io);
    }

    pub fn on_connect_failed(&mut self, conn: ConnectionHandle, now: Instant) {
        self.registry
            .get_mut(conn)
            .on_connect_failed(&mut self.requests, now, &mut self.io);
    }

    pub fn on_io_error(&mut self, conn: ConnectionHandle, now: Instant) {
        self.registry
            .get_mut(conn)
            .on_connection_lost(&mut self.requests, now, &mut self.io);
    }

    pub fn on_eof(&mut self, conn: ConnectionHandle, now: Instant) {
        self.registry
            .get_mut(conn)
            .on_connection_lost(&mut self.requests, now, &mut self.io);
    }

    pub fn on_readable(&mut self, conn: ConnectionHandle, data: &[u8], now: Instant) {
        let lines = self.registry.get_mut(conn).on_readable(data);
        for tokens in lines {
            dispatch::dispatch_line(self, conn, tokens, now);
        }
    }

    pub fn on_writable(&mut self, conn: ConnectionHandle) {
        self.registry.get_mut(conn).on_writable(&mut self.io);
    }

    pub fn on_write_result(&mut self, conn: ConnectionHandle, sent: usize, remaining: Bytes) {
        self.registry
            .get_mut(conn)
            .on_write_result(sent, remaining, &mut self.io);
    }

    pub fn on_timer(&mut self, conn: ConnectionHandle, timer: Timer, now: Instant) {
        match timer {
            Timer::Reconnect => self.registry.get_mut(conn).on_reconnect_timer(&mut self.io),
            Timer::RequestTimeout => {
                self.registry
                    .get_mut(conn)
                    .on_request_timeout(&mut self.requests, now, &mut self.io)
            }
        }
    }

    /// Pops the next pending I/O action, if any.
    pub fn poll_io(&mut self) -> Option<Io> {
        self.io.pop_front()
    }

    /// Pops the next pending application event, if any.
    pub fn poll_event(&mut self) -> Option<Event<C>> {
        self.events.pop_front()
    }
}
