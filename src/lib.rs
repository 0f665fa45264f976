//! Control plane of an OSCAR (AIM / ICQ) client session: a single logical session spread over
//!  several connections, each serving a subset of the protocol's SNAC families.
//!
//! * [registry::ConnectionRegistry] tracks which connection serves which family, and holds
//!   packets for families that have no ready connection yet
//! * [rate::RateLimiter] holds packets back according to the server's rate classes
//! * [bootstrap::ServiceBootstrap] drives every new connection through the handshake
//! * [dispatcher::Dispatcher] routes outgoing packets to connections and received packets to
//!   per-family handlers
//! * [session::Session] ties it all together and receives socket events from a
//!   [transport::Transport]

pub mod bootstrap;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod events;
pub mod family;
pub mod rate;
pub mod registry;
pub mod session;
pub mod snac;
pub mod test_util;
pub mod tlv;
pub mod transport;
pub mod util;
