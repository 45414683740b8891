//! Sans-I/O core for an out-of-band user authorization client.
//!
//! A chat server links this crate in to delegate new-user admission
//! decisions to an external authority process over a small line-oriented
//! protocol. [`AuthCore`] owns the connection, request, and timer state
//! machines; it never touches a socket, a DNS resolver, or the system
//! clock directly. Instead it hands back [`Io`] actions for the host to
//! perform and reports outcomes back in through `on_*` methods, and it
//! surfaces verdicts and violations through [`Event`]. This keeps the
//! whole state machine testable without a real network, the same shape
//! `quinn_proto::Endpoint` uses for QUIC.
//!
//! A typical event loop:
//!
//! ```ignore
//! let mut core = AuthCore::new("my-server", logger);
//! core.connect_or_update(config, Instant::now());
//! loop {
//!     while let Some(io) = core.poll_io() {
//!         host.perform(io);
//!     }
//!     while let Some(event) = core.poll_event() {
//!         host.apply(event);
//!     }
//!     host.wait_for_next_thing(&mut core);
//! }
//! ```

mod client;
mod config;
mod connection;
mod core;
mod counters;
mod dispatch;
mod error;
mod event;
mod flags;
mod ids;
mod limits;
mod protocol;
mod registry;
mod request;

pub use client::ClientInfo;
pub use config::ConnectConfig;
pub use core::AuthCore;
pub use error::StartClientError;
pub use event::{Event, Io, Timer};
pub use ids::ConnectionHandle;
