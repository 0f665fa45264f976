//! Recording implementations of the transport seams, useful for testing the control plane and
//!  code built on top of it without sockets.
//!
//! They are part of the regular (non-#[cfg(test)]) code so applications can drive a
//!  [crate::session::Session] in their own tests.

pub mod sink;
pub mod transport;

pub use sink::RecordingSink;
pub use transport::RecordingTransport;

