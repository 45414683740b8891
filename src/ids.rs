/// Opaque handle to a connection inside the registry.
///
/// Wraps a [`slab::Slab`] key. Never dereferenced by the core; only used
/// as an index and as an `Io`/`Event` payload so the host can tell
/// connections apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionHandle(pub(crate) usize);

/// Opaque handle to a pending authorization request.
///
/// Doubles as the wire correlation id: its hex encoding is what travels
/// in `FullAuth`/`DoneAuth`/`BadAuth`/`ExitUser` lines. Bijective for as
/// long as the request is alive, which is exactly the lifetime the
/// correlation id needs to be stable for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct RequestId(pub(crate) usize);

impl RequestId {
    pub(crate) fn to_hex(self) -> String {
        format!("{:x}", self.0)
    }

    pub(crate) fn from_hex(id: &str) -> Option<Self> {
        usize::from_str_radix(id, 16).ok().map(RequestId)
    }
}
