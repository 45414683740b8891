bitflags::bitflags! {
    /// Per-connection status bits, orthogonal to [`crate::connection::ConnState`]
    /// and to the `closing` field (which is modeled as its own dimension —
    /// see distilled DESIGN NOTES on the Closing flag).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct ConnFlags: u8 {
        /// A send reported "would block"; draining is paused until the next
        /// writable event.
        const BLOCKED = 0b0001;
        /// The greeting has been queued. Requests may now be sent.
        const HANDSHAKE_COMPLETE = 0b0010;
        /// Set by a command handler to force an immediate disconnect once
        /// dispatch returns.
        const ABORT_ASAP = 0b0100;
        /// The next greeting should end with `EndUsers`.
        const ANNOUNCE_EXISTING_USERS = 0b1000;
    }
}
