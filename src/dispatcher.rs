use std::collections::hash_map::Entry;
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use rustc_hash::FxHashMap;
use tokio::sync::RwLock;
use tracing::{debug, trace, warn};

use crate::bootstrap::oservice_messages::{new_service_request_payload, OServiceSubtype};
use crate::connection::ConnectionId;
use crate::family::{FamilyCatalog, FamilyId};
use crate::registry::ConnectionRegistry;
use crate::snac::{RequestIds, Snac};

/// Feature components plug into a session by handling all received SNACs of one family.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait FamilyHandler: Send + Sync + 'static {
    fn family(&self) -> FamilyId;

    /// Handles a SNAC received on `connection`. Errors are logged by the dispatcher, they do not
    ///  affect the connection.
    ///
    /// This holds up the connection's receive loop, so non-trivial work should be offloaded.
    async fn handle(&self, connection: ConnectionId, snac: &Snac) -> anyhow::Result<()>;
}

/// Routes outgoing SNACs to their family's connection - or delays them until there is one - and
///  received SNACs to their family's handler.
pub struct Dispatcher {
    catalog: Arc<FamilyCatalog>,
    registry: Arc<ConnectionRegistry>,
    request_ids: Arc<RequestIds>,
    handlers: RwLock<FxHashMap<FamilyId, Arc<dyn FamilyHandler>>>,
}

impl Dispatcher {
    pub fn new(catalog: Arc<FamilyCatalog>, registry: Arc<ConnectionRegistry>, request_ids: Arc<RequestIds>) -> Dispatcher {
        Dispatcher {
            catalog,
            registry,
            request_ids,
            handlers: Default::default(),
        }
    }

    pub fn request_ids(&self) -> &RequestIds {
        &self.request_ids
    }

    /// Accepts a SNAC for transmission. This never blocks.
    ///
    /// If the SNAC's family has a ready connection, the SNAC goes to that connection's rate
    ///  limiter. Otherwise it is delayed until the family's connection becomes ready, and the
    ///  first SNAC delayed for a family without any connection requests service for it.
    pub fn send(&self, snac: Snac) {
        let family = snac.family();
        if family == FamilyId::OSERVICE {
            self.send_on_primary(snac);
            return;
        }

        if !self.catalog.is_supported(family) {
            warn!("dropping SNAC for unsupported family {:?}/0x{:04X}", family, snac.subtype());
            return;
        }

        let connection = self.registry.get_connection(family);
        match self.registry.enqueue_unless_ready(connection.as_ref(), family, snac) {
            Err(snac) => {
                if let Some(connection) = connection {
                    connection.rate_limiter().submit(snac);
                }
            }
            Ok(true) => {
                // NB: the delayed-queue lock is released at this point
                match connection {
                    Some(connection) => debug!("family {:?} waits for {:?} to become ready", family, connection),
                    None => self.request_service(family),
                }
            }
            Ok(false) => {}
        }
    }

    /// Session-wide SNACs of the generic service family go through the primary connection, and
    ///  wait for it to become ready.
    pub fn send_on_primary(&self, snac: Snac) {
        let primary = self.registry.primary();
        match self.registry.enqueue_unless_ready(primary.as_ref(), FamilyId::OSERVICE, snac) {
            Err(snac) => {
                if let Some(primary) = primary {
                    primary.rate_limiter().submit(snac);
                }
            }
            Ok(_) => {
                trace!("delaying generic service SNAC until the primary connection is ready");
            }
        }
    }

    /// asks the server, through the primary connection, where to connect for a family
    pub fn request_service(&self, family: FamilyId) {
        debug!("requesting service for family {:?} ({})", family, self.catalog.name(family));
        let snac = self.request_ids.snac(
            FamilyId::OSERVICE,
            OServiceSubtype::NewServiceRequest.into(),
            new_service_request_payload(family),
        );
        self.send_on_primary(snac);
    }

    pub async fn register_handler(&self, handler: Arc<dyn FamilyHandler>) -> anyhow::Result<()> {
        match self.handlers.write().await
            .entry(handler.family())
        {
            Entry::Occupied(_) => {
                Err(anyhow!("registering a second handler for family {:?}", handler.family()))
            }
            Entry::Vacant(e) => {
                e.insert(handler);
                Ok(())
            }
        }
    }

    pub async fn deregister_handler(&self, family: FamilyId) -> anyhow::Result<()> {
        let prev = self.handlers.write().await
            .remove(&family);
        if prev.is_none() {
            return Err(anyhow!("deregistering a handler that was not previously registered: {:?}", family));
        }
        Ok(())
    }

    /// Hands a received SNAC to its family's handler. SNACs without a handler are dropped.
    pub async fn receive(&self, connection: ConnectionId, snac: Snac) {
        let handler = self.handlers.read().await
            .get(&snac.family())
            .cloned();

        match handler {
            Some(handler) => {
                if let Err(e) = handler.handle(connection, &snac).await {
                    warn!("error handling SNAC {:?}/0x{:04X} from {:?} - dropping: {}", snac.family(), snac.subtype(), connection, e);
                }
            }
            None => {
                debug!("received SNAC {:?}/0x{:04X} on {:?} for which there is no handler - ignoring", snac.family(), snac.subtype(), connection);
            }
        }
    }
}
