use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::broadcast;
use tracing::{debug, info, span, trace, warn, Instrument, Level};
use uuid::Uuid;

use crate::bootstrap::ServiceBootstrap;
use crate::config::SessionConfig;
use crate::connection::{Connection, ConnectionId};
use crate::dispatcher::{Dispatcher, FamilyHandler};
use crate::events::{SessionEvent, SessionEventNotifier};
use crate::family::{FamilyCatalog, FamilyId};
use crate::registry::ConnectionRegistry;
use crate::snac::{FlapChannel, RequestIds, Snac};
use crate::transport::Transport;

/// The control plane of a single logged-in (or logging-in) OSCAR session: it owns all of the
///  session's connections and everything shared between them.
///
/// The transport drives a session by reporting socket events; feature components use it to send
///  SNACs and to register handlers for received SNACs.
pub struct Session {
    events: Arc<SessionEventNotifier>,
    registry: Arc<ConnectionRegistry>,
    dispatcher: Arc<Dispatcher>,
    bootstrap: ServiceBootstrap,
    transport: Arc<dyn Transport>,
}

impl Session {
    pub fn new(config: SessionConfig, transport: Arc<dyn Transport>) -> anyhow::Result<Session> {
        config.validate()?;

        let config = Arc::new(config);
        let catalog = Arc::new(FamilyCatalog::new());
        let events = Arc::new(SessionEventNotifier::new(config.event_channel_capacity));
        let registry = Arc::new(ConnectionRegistry::new(config.clone(), catalog.clone(), transport.clone(), events.clone()));
        let dispatcher = Arc::new(Dispatcher::new(catalog.clone(), registry.clone(), Arc::new(RequestIds::new())));
        let bootstrap = ServiceBootstrap::new(config, catalog, registry.clone(), dispatcher.clone(), transport.clone(), events.clone());

        Ok(Session {
            events,
            registry,
            dispatcher,
            bootstrap,
            transport,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn is_logged_in(&self) -> bool {
        self.registry.is_logged_in()
    }

    /// Opens the connection to the authorization server. The login exchange on that connection
    ///  is up to a [FamilyHandler] for [FamilyId::AUTH].
    pub fn connect_authorizer(&self, host: &str, port: u16) -> ConnectionId {
        self.bootstrap.open_connection(FamilyId::AUTH, host, port, None).id()
    }

    /// Opens the primary connection with the address and cookie the authorization server handed
    ///  out. Its handshake completes the login.
    pub fn connect_primary(&self, host: &str, port: u16, cookie: Bytes) -> ConnectionId {
        self.bootstrap.open_connection(FamilyId::OSERVICE, host, port, Some(cookie)).id()
    }

    pub fn send(&self, snac: Snac) {
        self.dispatcher.send(snac)
    }

    pub fn snac(&self, family: FamilyId, subtype: u16, payload: Bytes) -> Snac {
        self.dispatcher.request_ids().snac(family, subtype, payload)
    }

    pub async fn register_handler(&self, handler: Arc<dyn FamilyHandler>) -> anyhow::Result<()> {
        self.dispatcher.register_handler(handler).await
    }

    pub async fn on_connected(&self, id: ConnectionId) {
        let Some(connection) = self.connection(id) else {
            return;
        };
        self.bootstrap.on_connected(&connection).await;
    }

    /// Handles the payload of a FLAP frame received on a connection
    pub async fn on_frame(&self, id: ConnectionId, channel: FlapChannel, payload: Bytes) {
        let correlation_id = Uuid::new_v4();
        let span = span!(Level::TRACE, "frame_received", ?correlation_id, connection = id.0);

        self.handle_frame(id, channel, payload)
            .instrument(span)
            .await
    }

    async fn handle_frame(&self, id: ConnectionId, channel: FlapChannel, payload: Bytes) {
        let Some(connection) = self.connection(id) else {
            return;
        };
        trace!("received {:?} frame on {:?}: {:?}", channel, connection, payload.as_ref());

        match channel {
            FlapChannel::SignOn => {
                debug!("{:?}: server hello", connection);
            }
            FlapChannel::Snac => {
                let snac = match Snac::try_deser(payload) {
                    Ok(snac) => snac,
                    Err(e) => {
                        warn!("{:?}: received unparsable SNAC - dropping: {}", connection, e);
                        return;
                    }
                };

                let snac = if snac.family() == FamilyId::OSERVICE {
                    self.bootstrap.on_oservice(&connection, snac)
                }
                else {
                    Some(snac)
                };
                if let Some(snac) = snac {
                    self.dispatcher.receive(id, snac).await;
                }
            }
            FlapChannel::Error => {
                warn!("{:?}: server sent FLAP error frame: {:?}", connection, payload.as_ref());
            }
            FlapChannel::SignOff => {
                if self.registry.get_families(&connection).contains(&FamilyId::AUTH) {
                    debug!("{:?}: sign-off on the authorization connection", connection);
                }
                else {
                    info!("{:?}: server signed off", connection);
                    self.registry.deregister(&connection, true);
                    self.transport.close(id);
                }
            }
            FlapChannel::KeepAlive => {}
        }
    }

    /// A socket failed. The loss is reported as a [SessionEvent] according to session phase and
    ///  connection role; there is no automatic reconnect.
    pub fn on_connection_error(&self, id: ConnectionId, error: &anyhow::Error) {
        let Some(connection) = self.connection(id) else {
            return;
        };
        warn!("{:?}: connection error: {}", connection, error);
        self.registry.deregister(&connection, true);
        self.transport.close(id);
    }

    /// a socket was closed regularly
    pub fn on_closed(&self, id: ConnectionId) {
        if let Some(connection) = self.connection(id) {
            self.registry.deregister(&connection, false);
        }
    }

    /// closes all connections without reporting their loss
    pub fn shutdown(&self) {
        info!("shutting down session");
        for connection in self.registry.connections() {
            self.registry.deregister(&connection, false);
            self.transport.close(connection.id());
        }
    }

    fn connection(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        let result = self.registry.connection(id);
        if result.is_none() {
            debug!("event for unknown connection {:?} - ignoring", id);
        }
        result
    }
}
