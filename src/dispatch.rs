use std::hash::Hash;
use std::time::Instant;

use slog::warn;

use crate::core::AuthCore;
use crate::event::Event;
use crate::flags::ConnFlags;
use crate::ids::{ConnectionHandle, RequestId};
use crate::limits::{truncate_bounded, Limits};
use crate::protocol::{parse_inbound, Inbound};

/// Dispatches one already-tokenized line received on `conn`.
///
/// `conn` is the connection the bytes physically arrived on; command
/// handlers instead dispose requests via the request's own owning
/// connection (looked up through the arena), which is usually the same
/// connection but keeps the invariant sound even in the window right
/// after a splice.
pub(crate) fn dispatch_line<C: Copy + Eq + Hash>(
    core: &mut AuthCore<C>,
    conn: ConnectionHandle,
    tokens: Vec<String>,
    now: Instant,
) {
    if tokens.is_empty() {
        return;
    }
    match parse_inbound(&tokens) {
        Ok(Some(Inbound::DoneAuth {
            id,
            username,
            hostname,
            account,
        })) => handle_done_auth(core, conn, id, username, hostname, account),
        Ok(Some(Inbound::BadAuth { id, reason })) => handle_bad_auth(core, conn, id, reason),
        Ok(None) => {}
        Err(message) => report_violation(core, conn, message),
    }
    if core.registry.get(conn).flags.contains(ConnFlags::ABORT_ASAP) {
        core.registry
            .get_mut(conn)
            .on_connection_lost(&mut core.requests, now, &mut core.io);
    }
}

fn handle_done_auth<C: Copy + Eq + Hash>(
    core: &mut AuthCore<C>,
    conn: ConnectionHandle,
    id: String,
    username: String,
    hostname: String,
    account: Option<String>,
) {
    let Some(req_id) = RequestId::from_hex(&id) else {
        report_violation(core, conn, format!("DoneAuth with a malformed id `{id}`"));
        return;
    };
    if core.requests.get(req_id.0).is_none() {
        report_violation(core, conn, format!("DoneAuth for an unknown request `{id}`"));
        return;
    }
    let client = core.requests[req_id.0].client;
    let owner = core.requests[req_id.0].conn;
    let real_username = truncate_bounded(&username, Limits::NICKLEN);
    let visible_host = truncate_bounded(&hostname, Limits::HOSTLEN);
    dispose(core, owner, req_id, client);
    core.events.push_back(Event::Admit {
        client,
        username: real_username.clone(),
        real_username,
        visible_host,
        account,
    });
}

fn handle_bad_auth<C: Copy + Eq + Hash>(
    core: &mut AuthCore<C>,
    conn: ConnectionHandle,
    id: String,
    reason: String,
) {
    let Some(req_id) = RequestId::from_hex(&id) else {
        report_violation(core, conn, format!("BadAuth with a malformed id `{id}`"));
        return;
    };
    if core.requests.get(req_id.0).is_none() {
        report_violation(core, conn, format!("BadAuth for an unknown request `{id}`"));
        return;
    }
    let client = core.requests[req_id.0].client;
    let owner = core.requests[req_id.0].conn;
    dispose(core, owner, req_id, client);
    core.events.push_back(Event::Reject { client, reason });
}

fn dispose<C: Copy + Eq + Hash>(
    core: &mut AuthCore<C>,
    owner: ConnectionHandle,
    req_id: RequestId,
    client: C,
) {
    core.registry
        .get_mut(owner)
        .dispose_request(req_id, &mut core.requests, &mut core.io);
    core.requests.remove(req_id.0);
    core.client_requests.remove(&client);
}

fn report_violation<C: Copy + Eq + Hash>(core: &mut AuthCore<C>, conn: ConnectionHandle, message: String) {
    warn!(core.log, "protocol violation from authority"; "message" => &message);
    core.events.push_back(Event::ProtocolViolation {
        connection: conn,
        message,
    });
}
