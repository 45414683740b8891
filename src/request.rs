use slab::Slab;

use crate::client::ClientInfo;
use crate::ids::{ConnectionHandle, RequestId};

/// One pending authorization request.
///
/// Lives in an arena (`Slab<RequestNode<C>>`) owned by `AuthCore`, not
/// behind a raw pointer — the arena's key doubles as the wire correlation
/// id (see [`RequestId`]). `prev`/`next` make it a node of an intrusive
/// doubly-linked list threaded through whichever connection's
/// [`RequestList`] currently owns it, so `close_unused` can splice a
/// whole list onto another connection in O(1).
pub(crate) struct RequestNode<C> {
    pub client: C,
    pub conn: ConnectionHandle,
    pub info: ClientInfo,
    pub arms_timeout: bool,
    prev: Option<RequestId>,
    next: Option<RequestId>,
}

impl<C> RequestNode<C> {
    pub fn new(client: C, conn: ConnectionHandle, info: ClientInfo) -> Self {
        Self {
            client,
            conn,
            info,
            arms_timeout: false,
            prev: None,
            next: None,
        }
    }

    /// Next node in whichever list currently owns this one. Used to walk
    /// a chain that has been detached via [`RequestList::take`], before
    /// it is spliced onto its destination.
    pub(crate) fn next(&self) -> Option<RequestId> {
        self.next
    }
}

/// Head/tail pointers into a shared [`RequestNode`] arena. Does not own
/// the arena itself — every method takes it as an explicit argument —
/// because a single arena is shared by every connection's list, and a
/// splice just repoints `prev`/`next` without touching the arena's
/// allocation at all.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct RequestList {
    head: Option<RequestId>,
    tail: Option<RequestId>,
}

impl RequestList {
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub fn append<C>(&mut self, arena: &mut Slab<RequestNode<C>>, id: RequestId) {
        arena[id.0].prev = self.tail;
        arena[id.0].next = None;
        match self.tail {
            Some(t) => arena[t.0].next = Some(id),
            None => self.head = Some(id),
        }
        self.tail = Some(id);
    }

    pub fn remove<C>(&mut self, arena: &mut Slab<RequestNode<C>>, id: RequestId) {
        let (prev, next) = (arena[id.0].prev, arena[id.0].next);
        match prev {
            Some(p) => arena[p.0].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => arena[n.0].prev = prev,
            None => self.tail = prev,
        }
        arena[id.0].prev = None;
        arena[id.0].next = None;
    }

    /// Detaches the whole list from this head, leaving it empty.
    pub fn take(&mut self) -> (Option<RequestId>, Option<RequestId>) {
        (self.head.take(), self.tail.take())
    }

    /// Appends an already-detached chain (as returned by [`Self::take`])
    /// onto the tail of this list.
    pub fn append_chain<C>(
        &mut self,
        arena: &mut Slab<RequestNode<C>>,
        head: Option<RequestId>,
        tail: Option<RequestId>,
    ) {
        let Some(chain_head) = head else { return };
        match self.tail {
            Some(t) => {
                arena[t.0].next = Some(chain_head);
                arena[chain_head.0].prev = Some(t);
            }
            None => self.head = Some(chain_head),
        }
        self.tail = tail;
    }

    pub fn iter<'a, C>(&self, arena: &'a Slab<RequestNode<C>>) -> RequestListIter<'a, C> {
        RequestListIter {
            arena,
            cur: self.head,
        }
    }
}

pub(crate) struct RequestListIter<'a, C> {
    arena: &'a Slab<RequestNode<C>>,
    cur: Option<RequestId>,
}

impl<'a, C> Iterator for RequestListIter<'a, C> {
    type Item = RequestId;

    fn next(&mut self) -> Option<RequestId> {
        let id = self.cur?;
        self.cur = self.arena[id.0].next;
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn info() -> ClientInfo {
        ClientInfo {
            name: "nick".into(),
            username: "user".into(),
            host: "host".into(),
            source_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            password: String::new(),
            info: "real name".into(),
        }
    }

    #[test]
    fn append_and_iterate_preserves_order() {
        let mut arena: Slab<RequestNode<u32>> = Slab::new();
        let mut list = RequestList::default();
        let conn = ConnectionHandle(0);
        let ids: Vec<RequestId> = (0..3)
            .map(|c| RequestId(arena.insert(RequestNode::new(c, conn, info()))))
            .collect();
        for &id in &ids {
            list.append(&mut arena, id);
        }
        let collected: Vec<_> = list.iter(&arena).collect();
        assert_eq!(collected, ids);
    }

    #[test]
    fn remove_middle_relinks_neighbors() {
        let mut arena: Slab<RequestNode<u32>> = Slab::new();
        let mut list = RequestList::default();
        let conn = ConnectionHandle(0);
        let ids: Vec<RequestId> = (0..3)
            .map(|c| RequestId(arena.insert(RequestNode::new(c, conn, info()))))
            .collect();
        for &id in &ids {
            list.append(&mut arena, id);
        }
        list.remove(&mut arena, ids[1]);
        let collected: Vec<_> = list.iter(&arena).collect();
        assert_eq!(collected, vec![ids[0], ids[2]]);
    }

    #[test]
    fn splice_preserves_order_across_lists() {
        let mut arena: Slab<RequestNode<u32>> = Slab::new();
        let conn = ConnectionHandle(0);
        let mut a = RequestList::default();
        let mut b = RequestList::default();
        let p = RequestId(arena.insert(RequestNode::new(1u32, conn, info())));
        let q = RequestId(arena.insert(RequestNode::new(2u32, conn, info())));
        let r = RequestId(arena.insert(RequestNode::new(3u32, conn, info())));
        a.append(&mut arena, p);
        a.append(&mut arena, q);
        b.append(&mut arena, r);
        let (h, t) = a.take();
        b.append_chain(&mut arena, h, t);
        let collected: Vec<_> = b.iter(&arena).collect();
        assert_eq!(collected, vec![r, p, q]);
        assert!(a.is_empty());
    }
}
