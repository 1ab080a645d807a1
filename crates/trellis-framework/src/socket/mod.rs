//! The event transport.
//!
//! A [`Connection`] is the handle a transport creates per peer. Mounting it
//! against the channel registry yields a [`Session`], which owns everything
//! per-connection: the access map, the ancestor caches and a
//! [`SocketRouter`] holding the mounted listeners.

mod connection;
mod router;
mod session;

pub use connection::{Connection, Outbound};
pub use router::{
    Dispatched, HandlerTree, NAME_CACHE_LIMIT, SocketEvent, SocketHandler, SocketRouter,
};
pub use session::{AccessEntry, Session};

pub(crate) use router::PatternTable;
