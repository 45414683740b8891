use std::collections::VecDeque;
use std::ops::{Index, IndexMut};

use slab::Slab;

use crate::connection::Connection;
use crate::ids::ConnectionHandle;

/// Process-wide ordered collection of connections to the authority.
///
/// `order` tracks creation order, newest first, so "the active
/// connection" (distilled §2/§4.7: "the newest non-closing one") is
/// just the first non-closing entry in it.
#[derive(Default)]
pub(crate) struct Registry {
    conns: Slab<Connection>,
    order: VecDeque<ConnectionHandle>,
}

impl Registry {
    pub fn insert_with(&mut self, build: impl FnOnce(ConnectionHandle) -> Connection) -> ConnectionHandle {
        let entry = self.conns.vacant_entry();
        let handle = ConnectionHandle(entry.key());
        entry.insert(build(handle));
        self.order.push_front(handle);
        handle
    }

    pub fn find_by_host_port(&self, host: &str, port: u16) -> Option<ConnectionHandle> {
        self.order
            .iter()
            .find(|h| self.conns[h.0].matches(host, port))
            .copied()
    }

    /// The newest connection that isn't marked `closing`.
    pub fn active(&self) -> Option<ConnectionHandle> {
        self.order
            .iter()
            .find(|h| !self.conns[h.0].closing)
            .copied()
    }

    pub fn get(&self, handle: ConnectionHandle) -> &Connection {
        &self.conns[handle.0]
    }

    pub fn get_mut(&mut self, handle: ConnectionHandle) -> &mut Connection {
        &mut self.conns[handle.0]
    }

    pub fn mark_all_closing(&mut self) {
        for handle in &self.order {
            self.conns[handle.0].closing = true;
        }
    }

    /// Every connection still flagged `closing`, in registry order.
    pub fn closing_handles(&self) -> Vec<ConnectionHandle> {
        self.order
            .iter()
            .filter(|h| self.conns[h.0].closing)
            .copied()
            .collect()
    }

    pub fn remove(&mut self, handle: ConnectionHandle) -> Connection {
        self.order.retain(|h| *h != handle);
        self.conns.remove(handle.0)
    }
}

impl Index<ConnectionHandle> for Registry {
    type Output = Connection;
    fn index(&self, handle: ConnectionHandle) -> &Connection {
        self.get(handle)
    }
}

impl IndexMut<ConnectionHandle> for Registry {
    fn index_mut(&mut self, handle: ConnectionHandle) -> &mut Connection {
        self.get_mut(handle)
    }
}
