use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tracing::{debug, warn};

use crate::config::RateThreshold;
use crate::rate::RateLimiter;
use crate::transport::SnacSink;
use crate::util::lock::MutexExt;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ConnectionId(pub u32);

/// The handshake every connection goes through before it carries application traffic
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum BootstrapState {
    /// socket is connecting, or connected but the server has not announced its families yet
    Connecting,
    /// server announced the families it serves on this connection, versions were requested
    FamiliesAnnounced,
    /// server answered the version request, rate limits were requested
    VersionsExchanged,
    RateLimitsInstalled,
    Ready,
}

/// One physical, independently framed byte stream to some OSCAR server
pub struct Connection {
    id: ConnectionId,
    host: String,
    port: u16,
    cookie: Option<Bytes>,
    connecting: AtomicBool,
    ready: AtomicBool,
    disconnected: AtomicBool,
    bootstrap_state: Mutex<BootstrapState>,
    /// 0 until the server announced its versions
    oservice_version: AtomicU16,
    rate_limiter: RateLimiter,
}

impl Debug for Connection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Connection{{{:?}@{}:{}}}", self.id, self.host, self.port)
    }
}

impl Connection {
    pub fn new(id: ConnectionId, host: &str, port: u16, cookie: Option<Bytes>, sink: Arc<dyn SnacSink>, rate_limit_threshold: RateThreshold) -> Connection {
        Connection {
            id,
            host: host.to_string(),
            port,
            cookie,
            connecting: AtomicBool::new(true),
            ready: AtomicBool::new(false),
            disconnected: AtomicBool::new(false),
            bootstrap_state: Mutex::new(BootstrapState::Connecting),
            oservice_version: AtomicU16::new(0),
            rate_limiter: RateLimiter::new(id, sink, rate_limit_threshold),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn cookie(&self) -> Option<&Bytes> {
        self.cookie.as_ref()
    }

    pub fn is_connecting(&self) -> bool {
        self.connecting.load(Ordering::Acquire)
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::Acquire)
    }

    pub(crate) fn mark_ready(&self) {
        self.connecting.store(false, Ordering::Release);
        self.ready.store(true, Ordering::Release);
    }

    pub(crate) fn mark_disconnected(&self) {
        self.connecting.store(false, Ordering::Release);
        self.ready.store(false, Ordering::Release);
        self.disconnected.store(true, Ordering::Release);
    }

    pub fn bootstrap_state(&self) -> BootstrapState {
        *self.bootstrap_state.locked()
    }

    /// Moves the bootstrap state machine from `from` to `to`. Returns `false` (leaving the state
    ///  unchanged) if the connection is not in state `from`, e.g. because the server repeated a
    ///  handshake message.
    #[must_use]
    pub(crate) fn advance(&self, from: BootstrapState, to: BootstrapState) -> bool {
        let mut state = self.bootstrap_state.locked();
        if *state != from {
            warn!("{:?}: received handshake step for {:?} -> {:?} in state {:?} - ignoring", self, from, to, *state);
            return false;
        }
        debug!("{:?}: bootstrap {:?} -> {:?}", self, from, to);
        *state = to;
        true
    }

    /// the generic service family's version as announced by the server on this connection
    pub fn oservice_version(&self) -> Option<u16> {
        match self.oservice_version.load(Ordering::Acquire) {
            0 => None,
            v => Some(v),
        }
    }

    pub(crate) fn set_oservice_version(&self, version: u16) {
        self.oservice_version.store(version, Ordering::Release);
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::RecordingSink;

    fn connection() -> Connection {
        Connection::new(ConnectionId(1), "bos.example.com", 5190, None, Arc::new(RecordingSink::default()), RateThreshold::Limit)
    }

    #[test]
    fn test_flags() {
        let conn = connection();
        assert!(conn.is_connecting());
        assert!(!conn.is_ready());

        conn.mark_ready();
        assert!(!conn.is_connecting());
        assert!(conn.is_ready());

        conn.mark_disconnected();
        assert!(!conn.is_ready());
        assert!(conn.is_disconnected());
    }

    #[test]
    fn test_advance() {
        let conn = connection();
        assert!(conn.advance(BootstrapState::Connecting, BootstrapState::FamiliesAnnounced));
        assert!(!conn.advance(BootstrapState::Connecting, BootstrapState::FamiliesAnnounced));
        assert_eq!(conn.bootstrap_state(), BootstrapState::FamiliesAnnounced);
    }

    #[test]
    fn test_oservice_version() {
        let conn = connection();
        assert_eq!(conn.oservice_version(), None);
        conn.set_oservice_version(4);
        assert_eq!(conn.oservice_version(), Some(4));
    }

    #[test]
    fn test_debug() {
        assert_eq!(format!("{:?}", connection()), "Connection{ConnectionId(1)@bos.example.com:5190}");
    }
}
