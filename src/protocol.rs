//! Line-oriented wire codec: splitting an inbound byte stream into lines,
//! tokenizing a line into a command and arguments, and building the four
//! outbound line shapes.

use bytes::{Bytes, BytesMut};

/// Scans an inbound byte stream for CR/LF-terminated lines.
///
/// Blank lines are discarded. A line that grows past `cap` bytes without
/// finding a terminator is truncated: bytes beyond the cap are dropped
/// until the next terminator, at which point exactly `cap` bytes are
/// delivered as the line.
pub(crate) struct LineReader {
    buf: BytesMut,
    truncating: bool,
    cap: usize,
}

impl LineReader {
    pub fn new(cap: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(cap),
            truncating: false,
            cap,
        }
    }

    /// Feeds newly-read bytes in and returns every complete, non-blank
    /// line found (terminator stripped).
    pub fn feed(&mut self, data: &[u8]) -> Vec<Bytes> {
        let mut lines = Vec::new();
        for &b in data {
            if b == b'\r' || b == b'\n' {
                if !self.buf.is_empty() {
                    lines.push(self.buf.split().freeze());
                }
                self.truncating = false;
                continue;
            }
            if self.truncating {
                continue;
            }
            if self.buf.len() >= self.cap {
                self.truncating = true;
                continue;
            }
            self.buf.extend_from_slice(&[b]);
        }
        lines
    }
}

/// Splits `line` on runs of spaces into at most `max_tokens` tokens. A
/// token beginning with `:` consumes the remainder of the line verbatim
/// (colon stripped) as the final token, whether or not `max_tokens` has
/// been reached yet.
pub(crate) fn tokenize(line: &[u8], max_tokens: usize) -> Vec<String> {
    let line = String::from_utf8_lossy(line);
    let mut tokens = Vec::new();
    let mut rest = line.trim_start_matches(' ');
    while !rest.is_empty() && tokens.len() + 1 < max_tokens.max(1) {
        if let Some(tail) = rest.strip_prefix(':') {
            tokens.push(tail.to_string());
            rest = "";
            break;
        }
        match rest.find(' ') {
            Some(idx) => {
                tokens.push(rest[..idx].to_string());
                rest = rest[idx..].trim_start_matches(' ');
            }
            None => {
                tokens.push(rest.to_string());
                rest = "";
            }
        }
    }
    if !rest.is_empty() {
        let tail = rest.strip_prefix(':').unwrap_or(rest);
        tokens.push(tail.to_string());
    }
    tokens
}

/// A parsed command from the authority, or `None` for an unrecognized (but
/// structurally valid) command name — the distilled spec calls these out
/// to be silently ignored, since the authority may be newer than this
/// client.
pub(crate) enum Inbound {
    DoneAuth {
        id: String,
        username: String,
        hostname: String,
        account: Option<String>,
    },
    BadAuth {
        id: String,
        reason: String,
    },
}

/// Parses a tokenized line into a known command.
///
/// Returns `Err(message)` for a recognized command with bad arity or an
/// empty required field — a protocol violation, not a parse failure to
/// propagate as a `Result` to the caller's caller; the connection is kept
/// either way. Returns `Ok(None)` for an unknown command name.
pub(crate) fn parse_inbound(tokens: &[String]) -> Result<Option<Inbound>, String> {
    let Some((command, args)) = tokens.split_first() else {
        return Ok(None);
    };
    match command.to_ascii_lowercase().as_str() {
        "doneauth" => {
            if args.len() < 4 {
                return Err(format!(
                    "DoneAuth with {} argument(s), need at least 4",
                    args.len()
                ));
            }
            Ok(Some(Inbound::DoneAuth {
                id: args[0].clone(),
                username: args[1].clone(),
                hostname: args[2].clone(),
                account: args.get(4).cloned(),
            }))
        }
        "badauth" => {
            if args.len() < 2 {
                return Err(format!(
                    "BadAuth with {} argument(s), need at least 2",
                    args.len()
                ));
            }
            let reason = args[1..].join(" ");
            if reason.is_empty() {
                return Err("BadAuth with an empty reason".to_string());
            }
            Ok(Some(Inbound::BadAuth {
                id: args[0].clone(),
                reason,
            }))
        }
        _ => Ok(None),
    }
}

pub(crate) fn greeting_line(server_name: &str, password: &str) -> Bytes {
    let line = if password.is_empty() {
        format!("Server {server_name}\r\n")
    } else {
        format!("Server {server_name} {password}\r\n")
    };
    Bytes::from(line)
}

pub(crate) fn end_users_line() -> Bytes {
    Bytes::from_static(b"EndUsers\r\n")
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn full_auth_line(
    id: &str,
    nick: &str,
    user: &str,
    host: &str,
    source_ip: &str,
    password: &str,
    info: &str,
) -> Bytes {
    Bytes::from(format!(
        "FullAuth {id} {nick} {user} {host} {source_ip} {password} :{info}\r\n"
    ))
}

pub(crate) fn exit_user_line(id: &str) -> Bytes {
    Bytes::from(format!("ExitUser {id}\r\n"))
}
