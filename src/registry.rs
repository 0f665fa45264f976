use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use bytes::Bytes;
use rustc_hash::FxHashMap;
use tracing::{debug, info, trace, warn};

use crate::config::SessionConfig;
use crate::connection::{Connection, ConnectionId};
use crate::events::{ConnectionLoss, SessionEvent, SessionEventNotifier};
use crate::family::{FamilyCatalog, FamilyId};
use crate::snac::Snac;
use crate::transport::{ConnectionWriter, Transport};
use crate::util::lock::{MutexExt, RwLockExt};

/// Identifies a peer-to-peer rendezvous negotiation
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct RendezvousCookie(pub [u8; 8]);

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DirectConnection {
    pub cookie: RendezvousCookie,
    pub peer: String,
}

/// Owns all of a session's connections, the assignment of families to connections and the
///  packets that wait for a family's connection to become ready.
///
/// Each structure is guarded separately, so handlers running for different connections never
///  serialize on unrelated state. No lock is held while calling out of the registry.
pub struct ConnectionRegistry {
    config: Arc<SessionConfig>,
    catalog: Arc<FamilyCatalog>,
    transport: Arc<dyn Transport>,
    events: Arc<SessionEventNotifier>,

    next_id: AtomicU32,
    logged_in: AtomicBool,

    connections: RwLock<FxHashMap<ConnectionId, Arc<Connection>>>,
    primary: RwLock<Option<Arc<Connection>>>,
    families: RwLock<FxHashMap<FamilyId, Arc<Connection>>>,
    delayed: Mutex<FxHashMap<FamilyId, Vec<Snac>>>,
    direct: Mutex<FxHashMap<RendezvousCookie, Arc<DirectConnection>>>,
}

impl ConnectionRegistry {
    pub fn new(
        config: Arc<SessionConfig>,
        catalog: Arc<FamilyCatalog>,
        transport: Arc<dyn Transport>,
        events: Arc<SessionEventNotifier>,
    ) -> ConnectionRegistry {
        ConnectionRegistry {
            config,
            catalog,
            transport,
            events,
            next_id: AtomicU32::new(1),
            logged_in: AtomicBool::new(false),
            connections: Default::default(),
            primary: Default::default(),
            families: Default::default(),
            delayed: Default::default(),
            direct: Default::default(),
        }
    }

    pub fn is_logged_in(&self) -> bool {
        self.logged_in.load(Ordering::Acquire)
    }

    pub(crate) fn set_logged_in(&self) {
        self.logged_in.store(true, Ordering::Release);
    }

    /// Creates a connection with a fresh id. A connection for [FamilyId::OSERVICE] becomes the
    ///  session's primary connection, any other family is assigned to the new connection.
    pub fn create_connection(&self, family: FamilyId, host: &str, port: u16, cookie: Option<Bytes>) -> Arc<Connection> {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let writer = Arc::new(ConnectionWriter::new(id, self.transport.clone()));
        let connection = Arc::new(Connection::new(id, host, port, cookie, writer, self.config.rate_limit_threshold));

        debug!("created {:?} for family {:?}", connection, family);
        self.connections.write_locked().insert(id, connection.clone());

        if family == FamilyId::OSERVICE {
            if let Some(prev) = self.primary.write_locked().replace(connection.clone()) {
                warn!("{:?} replaces {:?} as primary connection", connection, prev);
            }
        }
        else {
            self.assign_family(family, &connection);
        }
        connection
    }

    /// Binds `family` to `connection`, replacing a previous binding. Families this client does
    ///  not support are never bound - the call is a no-op for them, returning `false`.
    pub fn assign_family(&self, family: FamilyId, connection: &Arc<Connection>) -> bool {
        if !self.catalog.is_supported(family) {
            debug!("not assigning unsupported family {:?} to {:?}", family, connection);
            return false;
        }

        trace!("assigning family {:?} ({}) to {:?}", family, self.catalog.name(family), connection);
        self.families.write_locked().insert(family, connection.clone());
        true
    }

    pub fn get_connection(&self, family: FamilyId) -> Option<Arc<Connection>> {
        self.families.read_locked().get(&family).cloned()
    }

    pub fn connection(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.read_locked().get(&id).cloned()
    }

    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.connections.read_locked().values().cloned().collect()
    }

    pub fn primary(&self) -> Option<Arc<Connection>> {
        self.primary.read_locked().clone()
    }

    pub fn is_primary(&self, connection: &Connection) -> bool {
        self.primary.read_locked()
            .as_ref()
            .map(|p| p.id() == connection.id())
            .unwrap_or(false)
    }

    /// The families bound to a connection. This always includes [FamilyId::OSERVICE], which every
    ///  connection serves implicitly.
    pub fn get_families(&self, connection: &Connection) -> BTreeSet<FamilyId> {
        let mut result: BTreeSet<FamilyId> = self.families.read_locked().iter()
            .filter(|(_, c)| c.id() == connection.id())
            .map(|(&f, _)| f)
            .collect();
        result.insert(FamilyId::OSERVICE);
        result
    }

    /// Removes a connection and all its family bindings. If `is_error` is set, the loss is
    ///  classified by session phase and connection role, and reported as a [SessionEvent] (which
    ///  is also returned).
    ///
    /// Delayed packets for the connection's families are discarded, so the next packet for such
    ///  a family requests service anew. There is no automatic reconnect.
    pub fn deregister(&self, connection: &Arc<Connection>, is_error: bool) -> Option<SessionEvent> {
        let families = self.get_families(connection);
        let was_primary = self.is_primary(connection);

        info!("deregistering {:?} serving {:?}", connection, families);

        self.families.write_locked()
            .retain(|_, c| c.id() != connection.id());
        self.connections.write_locked().remove(&connection.id());
        if was_primary {
            let mut primary = self.primary.write_locked();
            if primary.as_ref().map(|p| p.id() == connection.id()).unwrap_or(false) {
                *primary = None;
            }
        }

        connection.mark_disconnected();
        connection.rate_limiter().shutdown();

        {
            let mut delayed = self.delayed.locked();
            for family in families.iter().filter(|&&f| f != FamilyId::OSERVICE || was_primary) {
                if let Some(dropped) = delayed.remove(family) {
                    warn!("discarding {} delayed packets for family {:?}", dropped.len(), family);
                }
            }
        }

        if !is_error {
            return None;
        }

        let event = match (self.is_logged_in(), families.contains(&FamilyId::AUTH), was_primary) {
            (false, true, _) => SessionEvent::LoginFailed(ConnectionLoss::CannotReachAuthorizer),
            (false, false, true) => SessionEvent::LoginFailed(ConnectionLoss::CannotReachPrimary),
            (true, _, true) => SessionEvent::SessionError(ConnectionLoss::LostPrimary),
            _ => SessionEvent::Warning(ConnectionLoss::LostSecondary),
        };
        warn!("{:?} failed: {:?}", connection, event);
        self.events.send_event(event.clone());
        Some(event)
    }

    /// Appends a packet to the family's delayed queue, atomically with respect to
    ///  [Self::activate]: if `connection` became ready in the meantime, the packet is handed back
    ///  for direct submission instead.
    ///
    /// Returns `Ok(true)` if this created the queue, i.e. if the caller is responsible for
    ///  requesting service for the family. That request must be issued after this returns, with
    ///  the delayed-queue lock released.
    pub(crate) fn enqueue_unless_ready(&self, connection: Option<&Arc<Connection>>, family: FamilyId, snac: Snac) -> Result<bool, Snac> {
        let mut delayed = self.delayed.locked();
        if connection.map(|c| c.is_ready()).unwrap_or(false) {
            return Err(snac);
        }

        match delayed.get_mut(&family) {
            Some(queue) => {
                queue.push(snac);
                Ok(false)
            }
            None => {
                debug!("delaying packets for family {:?} until it has a ready connection", family);
                delayed.insert(family, vec![snac]);
                Ok(true)
            }
        }
    }

    /// Removes and returns the family's delayed queue; empty if there is none
    pub fn drain_delayed(&self, family: FamilyId) -> Vec<Snac> {
        self.delayed.locked()
            .remove(&family)
            .unwrap_or_default()
    }

    /// Marks a connection as ready and flushes the delayed queues of `families` in FIFO order
    ///  through `submit`. Both happen under the delayed-queue lock, so no packet sent
    ///  concurrently can overtake the delayed ones.
    pub(crate) fn activate(&self, connection: &Connection, families: &[FamilyId], submit: impl Fn(Snac)) -> usize {
        let mut delayed = self.delayed.locked();
        connection.mark_ready();

        let mut num_flushed = 0;
        for family in families {
            if let Some(queue) = delayed.remove(family) {
                debug!("flushing {} delayed packets for family {:?} to {:?}", queue.len(), family, connection);
                num_flushed += queue.len();
                queue.into_iter().for_each(&submit);
            }
        }
        num_flushed
    }

    pub fn add_direct(&self, direct: DirectConnection) {
        self.direct.locked().insert(direct.cookie, Arc::new(direct));
    }

    pub fn find_direct(&self, cookie: &RendezvousCookie, remove: bool) -> Option<Arc<DirectConnection>> {
        let mut direct = self.direct.locked();
        if remove {
            direct.remove(cookie)
        }
        else {
            direct.get(cookie).cloned()
        }
    }
}
