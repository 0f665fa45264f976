//! The handshake every connection except the authorization connection goes through before it
//!  carries application traffic:
//!
//! ```ascii
//! client                                    server
//!   |  (FLAP sign-on with redirect cookie)    |
//!   | <------------------ server ready (families)
//!   | client versions (descending family id) ->
//!   | <--------------------- server versions  |
//!   | rate request -------------------------> |
//!   | <------------------ rate parameters     |
//!   | rate ack (class ids, received order) -> |
//!   | [login only: parameter requests]  ----> |
//!   | client ready (families + tool info) --> |
//! ```
//!
//! After sending 'client ready', the connection is ready for data, and packets that were delayed
//!  for its families are flushed.

pub mod oservice_messages;

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, error, info, trace, warn};

use crate::bootstrap::oservice_messages::{client_ready_payload, client_versions_payload, error_code, sign_on_payload, Motd, NewServiceRedirect, OServiceSubtype, ServerReady, ServerVersions};
use crate::config::SessionConfig;
use crate::connection::{BootstrapState, Connection};
use crate::dispatcher::Dispatcher;
use crate::events::{ChatServiceAvailableData, ProgressData, ServiceReadyData, SessionEvent, SessionEventNotifier};
use crate::family::{FamilyCatalog, FamilyId};
use crate::rate::rate_messages::{ack_payload, RateChange, RateChangeCode, RateParameters};
use crate::registry::ConnectionRegistry;
use crate::snac::{FlapChannel, Snac};
use crate::transport::Transport;

const PROGRESS_TOTAL: u8 = 6;

/// Parameter requests the primary connection sends during login, before it reports 'client
///  ready'. Requests for families that are not served by the primary connection are skipped.
const LOGIN_PARAMETER_REQUESTS: [(FamilyId, u16); 7] = [
    (FamilyId::OSERVICE, 0x000E), // own user info
    (FamilyId::SSI, 0x0002),      // contact list limits
    (FamilyId::SSI, 0x0004),      // contact list
    (FamilyId::LOCATE, 0x0002),   // location limits
    (FamilyId::BUDDY, 0x0002),    // buddy list limits
    (FamilyId::ICBM, 0x0004),     // messaging parameters
    (FamilyId::BOS, 0x0002),      // privacy limits
];

pub struct ServiceBootstrap {
    config: Arc<SessionConfig>,
    catalog: Arc<FamilyCatalog>,
    registry: Arc<ConnectionRegistry>,
    dispatcher: Arc<Dispatcher>,
    transport: Arc<dyn Transport>,
    events: Arc<SessionEventNotifier>,
}

impl ServiceBootstrap {
    pub fn new(
        config: Arc<SessionConfig>,
        catalog: Arc<FamilyCatalog>,
        registry: Arc<ConnectionRegistry>,
        dispatcher: Arc<Dispatcher>,
        transport: Arc<dyn Transport>,
        events: Arc<SessionEventNotifier>,
    ) -> ServiceBootstrap {
        ServiceBootstrap {
            config,
            catalog,
            registry,
            dispatcher,
            transport,
            events,
        }
    }

    /// Creates a connection for `family` and starts connecting its socket
    pub fn open_connection(&self, family: FamilyId, host: &str, port: u16, cookie: Option<Bytes>) -> Arc<Connection> {
        let connection = self.registry.create_connection(family, host, port, cookie);
        info!("connecting {:?} for family {:?}", connection, family);
        self.transport.open(connection.id(), host, port);
        connection
    }

    /// The socket is connected: unthrottled transmission starts, and the redirect cookie (if
    ///  any) is sent to identify the session to the server.
    pub async fn on_connected(&self, connection: &Arc<Connection>) {
        debug!("{:?} is connected", connection);
        connection.rate_limiter().start();

        if self.registry.get_families(connection).contains(&FamilyId::AUTH) {
            // the authorization connection does not go through the handshake
            self.activate(connection);
            return;
        }

        if let Some(cookie) = connection.cookie() {
            if let Err(e) = self.transport.send_flap(connection.id(), FlapChannel::SignOn, sign_on_payload(cookie)).await {
                warn!("{:?}: error sending sign-on cookie: {}", connection, e);
            }
        }

        if self.is_login_connection(connection) {
            self.progress("Connection established, cookie sent", 4);
        }
    }

    /// Handles a SNAC of the generic service family received on `connection`. Errors are handled
    ///  here: unrecoverable handshake errors end the connection, everything else is logged.
    ///
    /// SNACs that are not part of the control plane are handed back, to be dispatched to the
    ///  family's handler like any other received SNAC.
    pub fn on_oservice(&self, connection: &Arc<Connection>, snac: Snac) -> Option<Snac> {
        let Ok(subtype) = OServiceSubtype::try_from(snac.subtype()) else {
            return Some(snac);
        };

        let result = match subtype {
            OServiceSubtype::ServerReady => self.on_server_ready(connection, snac.payload),
            OServiceSubtype::ServerVersions => {
                self.on_server_versions(connection, snac.payload);
                Ok(())
            }
            OServiceSubtype::RateResponse => self.on_rate_response(connection, snac.payload),
            OServiceSubtype::NewServiceRedirect => {
                self.on_new_service_redirect(snac.payload);
                Ok(())
            }
            OServiceSubtype::RateChange => {
                self.on_rate_change(connection, snac.payload);
                Ok(())
            }
            OServiceSubtype::Error => {
                warn!("{:?}: server reported generic service error {:?} for request #{}", connection, error_code(snac.payload), snac.header.request_id);
                Ok(())
            }
            OServiceSubtype::Motd => {
                match Motd::try_deser(snac.payload) {
                    Ok(motd) => info!("{:?}: message of the day (type {}): {:?}", connection, motd.motd_type, motd.text),
                    Err(e) => debug!("{:?}: unparsable message of the day - ignoring: {}", connection, e),
                }
                Ok(())
            }
            other => {
                debug!("{:?}: generic service SNAC {:?} is not handled by the control plane", connection, other);
                return Some(snac);
            }
        };

        if let Err(e) = result {
            error!("{:?}: handshake failed, dropping connection: {}", connection, e);
            self.registry.deregister(connection, true);
            self.transport.close(connection.id());
        }
        None
    }

    /// step 1: bind the announced families, and request their versions
    fn on_server_ready(&self, connection: &Arc<Connection>, payload: Bytes) -> anyhow::Result<()> {
        let ready = ServerReady::try_deser(payload)?;
        debug!("{:?}: server announced families {:?}", connection, ready.families);

        if !connection.advance(BootstrapState::Connecting, BootstrapState::FamiliesAnnounced) {
            return Ok(());
        }

        for &family in &ready.families {
            if family != FamilyId::OSERVICE {
                self.registry.assign_family(family, connection);
            }
        }

        // descending family ids are what servers expect
        let families = self.registry.get_families(connection);
        let payload = client_versions_payload(families.into_iter().rev(), &self.catalog);
        self.submit(connection, OServiceSubtype::ClientVersions, payload);
        Ok(())
    }

    /// step 2: the server's versions are not checked beyond the generic service's, which
    ///  determines the layout of the rate parameters. A malformed payload does not hold up the
    ///  handshake.
    fn on_server_versions(&self, connection: &Arc<Connection>, payload: Bytes) {
        let versions = ServerVersions::deser(payload);
        trace!("{:?}: server versions {:?}", connection, versions.versions);

        if !connection.advance(BootstrapState::FamiliesAnnounced, BootstrapState::VersionsExchanged) {
            return;
        }

        if let Some(version) = versions.version(FamilyId::OSERVICE) {
            connection.set_oservice_version(version);
        }
        self.submit(connection, OServiceSubtype::RateRequest, Bytes::new());
    }

    /// steps 3 to 5: install rate limits, acknowledge them, and declare the connection ready
    fn on_rate_response(&self, connection: &Arc<Connection>, mut payload: Bytes) -> anyhow::Result<()> {
        let oservice_version = connection.oservice_version()
            .or_else(|| self.catalog.version(FamilyId::OSERVICE))
            .unwrap_or_default();
        let parameters = RateParameters::try_deser(&mut payload, oservice_version >= 3)?;

        if !connection.advance(BootstrapState::VersionsExchanged, BootstrapState::RateLimitsInstalled) {
            return Ok(());
        }

        let class_ids = connection.rate_limiter().install(parameters);
        debug!("{:?}: installed rate classes {:?}", connection, class_ids);
        self.submit(connection, OServiceSubtype::RateAck, ack_payload(&class_ids));

        if self.is_login_connection(connection) {
            self.progress("Finalizing connection", 5);
            if self.config.login_parameter_requests {
                self.request_login_parameters(connection);
            }
        }

        self.on_ready(connection);
        Ok(())
    }

    fn request_login_parameters(&self, connection: &Arc<Connection>) {
        let families = self.registry.get_families(connection);
        for (family, subtype) in LOGIN_PARAMETER_REQUESTS {
            if families.contains(&family) {
                let snac = self.dispatcher.request_ids().snac(family, subtype, Bytes::new());
                connection.rate_limiter().submit(snac);
            }
            else {
                debug!("{:?} does not serve family {:?} - not requesting its parameters", connection, family);
            }
        }
    }

    fn on_ready(&self, connection: &Arc<Connection>) {
        if !connection.advance(BootstrapState::RateLimitsInstalled, BootstrapState::Ready) {
            return;
        }

        let families = self.registry.get_families(connection);
        self.submit(connection, OServiceSubtype::ClientReady, client_ready_payload(families.iter().copied(), &self.catalog));

        let was_login = self.is_login_connection(connection);
        self.activate(connection);

        info!("{:?} is ready for families {:?}", connection, families);
        self.events.send_event(SessionEvent::ServiceReady(ServiceReadyData {
            connection: connection.id(),
            families: families.clone(),
        }));

        if families.contains(&FamilyId::CHAT_NAV) {
            self.events.send_event(SessionEvent::ChatNavigationAvailable);
        }
        if families.contains(&FamilyId::CHAT) {
            self.events.send_event(SessionEvent::ChatServiceAvailable(ChatServiceAvailableData {
                connection: connection.id(),
            }));
        }

        if was_login {
            self.registry.set_logged_in();
            self.progress("Signed on", PROGRESS_TOTAL);
            self.events.send_event(SessionEvent::SignedOn);
        }
    }

    /// marks the connection ready and flushes the packets delayed for its families
    fn activate(&self, connection: &Arc<Connection>) {
        let is_primary = self.registry.is_primary(connection);
        let families = self.registry.get_families(connection).into_iter()
            .filter(|&f| f != FamilyId::OSERVICE || is_primary)
            .collect::<Vec<_>>();

        let num_flushed = self.registry.activate(connection, &families, |snac| connection.rate_limiter().submit(snac));
        if num_flushed > 0 {
            debug!("{:?}: flushed {} delayed packets", connection, num_flushed);
        }
    }

    fn on_new_service_redirect(&self, payload: Bytes) {
        let redirect = match NewServiceRedirect::try_deser(payload, self.config.default_port) {
            Ok(redirect) => redirect,
            Err(e) => {
                warn!("unparsable new service redirect - ignoring: {}", e);
                return;
            }
        };

        if !self.catalog.is_supported(redirect.family) {
            warn!("server redirected unsupported family {:?} - ignoring", redirect.family);
            return;
        }
        let existing = self.registry.get_connection(redirect.family);
        let connection = self.open_connection(redirect.family, &redirect.host, redirect.port, redirect.cookie);

        // A connection that never became ready is superseded by the new one. Its family is
        //  rebound already, so delayed packets stay queued for the new connection.
        if let Some(existing) = existing {
            if existing.is_ready() || self.registry.is_primary(&existing) {
                debug!("family {:?} moves from {:?} to {:?}", redirect.family, existing, connection);
            }
            else {
                info!("{:?} is superseded by {:?} for family {:?} - closing it", existing, connection, redirect.family);
                self.registry.deregister(&existing, false);
                self.transport.close(existing.id());
            }
        }
    }

    fn on_rate_change(&self, connection: &Arc<Connection>, mut payload: Bytes) {
        let extended = connection.oservice_version().unwrap_or_default() >= 3;
        let change = match RateChange::try_deser(&mut payload, extended) {
            Ok(change) => change,
            Err(e) => {
                warn!("{:?}: unparsable rate change - ignoring: {}", connection, e);
                return;
            }
        };

        match change.code {
            RateChangeCode::Warning | RateChangeCode::Limited => {
                warn!("{:?}: rate class {:?} {:?} - current level {}", connection, change.params.id, change.code, change.params.current_level);
            }
            RateChangeCode::Changed | RateChangeCode::Cleared => {
                debug!("{:?}: rate class {:?} {:?}", connection, change.params.id, change.code);
            }
        }

        if !connection.rate_limiter().update_class(change.params) {
            debug!("{:?}: rate change for unknown rate class - ignoring", connection);
        }
    }

    /// the primary connection, while the session is logging in
    fn is_login_connection(&self, connection: &Connection) -> bool {
        !self.registry.is_logged_in() && self.registry.is_primary(connection)
    }

    fn submit(&self, connection: &Connection, subtype: OServiceSubtype, payload: Bytes) {
        let snac = self.dispatcher.request_ids().snac(FamilyId::OSERVICE, subtype.into(), payload);
        connection.rate_limiter().submit(snac);
    }

    fn progress(&self, text: &str, step: u8) {
        if self.config.report_progress {
            self.events.send_event(SessionEvent::Progress(ProgressData {
                text: text.to_string(),
                step,
                total: PROGRESS_TOTAL,
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;
    use bytes::{BufMut, BytesMut};
    use rstest::rstest;
    use tokio::time;
    use super::*;
    use crate::rate::rate_class::tests::test_params;
    use crate::snac::RequestIds;
    use crate::test_util::RecordingTransport;
    use crate::tlv::Tlv;

    struct Fixture {
        transport: Arc<RecordingTransport>,
        registry: Arc<ConnectionRegistry>,
        bootstrap: ServiceBootstrap,
    }

    fn fixture(config: SessionConfig) -> Fixture {
        let config = Arc::new(config);
        let catalog = Arc::new(FamilyCatalog::new());
        let transport = Arc::new(RecordingTransport::default());
        let events = Arc::new(SessionEventNotifier::new(16));
        let registry = Arc::new(ConnectionRegistry::new(config.clone(), catalog.clone(), transport.clone(), events.clone()));
        let dispatcher = Arc::new(Dispatcher::new(catalog.clone(), registry.clone(), Arc::new(RequestIds::starting_at(1))));
        let bootstrap = ServiceBootstrap::new(config, catalog, registry.clone(), dispatcher, transport.clone(), events);
        Fixture { transport, registry, bootstrap }
    }

    fn oservice(subtype: OServiceSubtype, payload: Bytes) -> Snac {
        Snac::new(FamilyId::OSERVICE, subtype.into(), 0, payload)
    }

    fn u16s(values: &[u16]) -> Bytes {
        let mut buf = BytesMut::new();
        for &v in values {
            buf.put_u16(v);
        }
        buf.freeze()
    }

    fn rate_response(ids: &[u16]) -> Bytes {
        let mut buf = BytesMut::new();
        RateParameters {
            classes: ids.iter().map(|&id| test_params(id, 2, 1000)).collect(),
            members: vec![],
        }.ser(&mut buf, false);
        buf.freeze()
    }

    async fn settle() {
        time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test]
    async fn test_versions_are_requested_in_descending_order() {
        let f = fixture(SessionConfig::new());
        let conn = f.bootstrap.open_connection(FamilyId::BART, "bart", 5190, None);
        f.bootstrap.on_connected(&conn).await;

        f.bootstrap.on_oservice(&conn, oservice(OServiceSubtype::ServerReady, u16s(&[0x0001, 0x0010, 0x0002, 0x0013])));
        settle().await;

        assert_eq!(conn.bootstrap_state(), BootstrapState::FamiliesAnnounced);
        let snacs = f.transport.snacs(conn.id());
        assert_eq!(snacs.len(), 1);
        assert_eq!(snacs[0].payload, u16s(&[0x0013, 4, 0x0010, 1, 0x0002, 1, 0x0001, 3]));
    }

    #[tokio::test]
    async fn test_old_oservice_version_uses_short_rate_parameters() {
        let f = fixture(SessionConfig::new());
        let conn = f.bootstrap.open_connection(FamilyId::BART, "bart", 5190, None);
        f.bootstrap.on_connected(&conn).await;
        f.bootstrap.on_oservice(&conn, oservice(OServiceSubtype::ServerReady, u16s(&[0x0001, 0x0010])));
        f.bootstrap.on_oservice(&conn, oservice(OServiceSubtype::ServerVersions, u16s(&[0x0001, 2, 0x0010, 1])));
        assert_eq!(conn.oservice_version(), Some(2));

        f.bootstrap.on_oservice(&conn, oservice(OServiceSubtype::RateResponse, rate_response(&[2, 1])));
        settle().await;

        assert_eq!(conn.bootstrap_state(), BootstrapState::Ready);
        assert!(conn.is_ready());
        assert!(conn.rate_limiter().class(crate::rate::rate_class::RateClassId(2)).is_some());
    }

    #[tokio::test]
    async fn test_login_parameter_requests_can_be_disabled() {
        let mut config = SessionConfig::new();
        config.login_parameter_requests = false;
        let f = fixture(config);
        let conn = f.bootstrap.open_connection(FamilyId::OSERVICE, "bos", 5190, Some(Bytes::from_static(b"c")));
        f.bootstrap.on_connected(&conn).await;
        f.bootstrap.on_oservice(&conn, oservice(OServiceSubtype::ServerReady, u16s(&[0x0001, 0x0004])));
        f.bootstrap.on_oservice(&conn, oservice(OServiceSubtype::ServerVersions, u16s(&[0x0001, 3])));
        f.bootstrap.on_oservice(&conn, oservice(OServiceSubtype::RateResponse, {
            let mut buf = BytesMut::new();
            RateParameters { classes: vec![test_params(1, 2, 1000)], members: vec![] }.ser(&mut buf, true);
            buf.freeze()
        }));
        settle().await;

        let subtypes = f.transport.snacs(conn.id()).iter()
            .map(|s| s.subtype())
            .collect::<Vec<_>>();
        assert_eq!(subtypes, vec![0x0017, 0x0006, 0x0008, 0x0002]);
        assert!(f.registry.is_logged_in());
    }

    #[tokio::test]
    async fn test_handshake_out_of_order_is_ignored() {
        let f = fixture(SessionConfig::new());
        let conn = f.bootstrap.open_connection(FamilyId::BART, "bart", 5190, None);
        f.bootstrap.on_connected(&conn).await;

        f.bootstrap.on_oservice(&conn, oservice(OServiceSubtype::RateResponse, rate_response(&[1])));
        settle().await;

        assert_eq!(conn.bootstrap_state(), BootstrapState::Connecting);
        assert!(!conn.rate_limiter().has_classes());
        assert!(f.transport.snacs(conn.id()).is_empty());
    }

    #[tokio::test]
    async fn test_rate_change_updates_class() {
        let f = fixture(SessionConfig::new());
        let conn = f.bootstrap.open_connection(FamilyId::BART, "bart", 5190, None);
        conn.rate_limiter().install(RateParameters { classes: vec![test_params(1, 2, 1000)], members: vec![] });

        let mut buf = BytesMut::new();
        buf.put_u16(2);
        test_params(1, 5, 200).ser(&mut buf, false);
        f.bootstrap.on_oservice(&conn, oservice(OServiceSubtype::RateChange, buf.freeze()));

        let class = conn.rate_limiter().class(crate::rate::rate_class::RateClassId(1)).unwrap();
        assert_eq!(class.current_level(), 200);
        assert_eq!(class.params().window_size, 5);

        // garbage is logged and dropped
        f.bootstrap.on_oservice(&conn, oservice(OServiceSubtype::RateChange, Bytes::from_static(b"\0\x09")));
        assert!(f.registry.connection(conn.id()).is_some());
    }

    #[tokio::test]
    async fn test_redirect_for_unsupported_family_is_ignored() {
        let f = fixture(SessionConfig::new());
        let primary = f.bootstrap.open_connection(FamilyId::OSERVICE, "bos", 5190, None);

        let mut buf = BytesMut::new();
        Tlv::new(0x000D, u16s(&[0x0044])).ser(&mut buf);
        Tlv::new(0x0005, Bytes::from_static(b"odd.example.com")).ser(&mut buf);
        f.bootstrap.on_oservice(&primary, oservice(OServiceSubtype::NewServiceRedirect, buf.freeze()));

        f.bootstrap.on_oservice(&primary, oservice(OServiceSubtype::NewServiceRedirect, Bytes::from_static(b"\0")));

        assert_eq!(f.transport.opened().len(), 1);
        assert_eq!(f.registry.connections().len(), 1);
    }

    #[tokio::test]
    async fn test_informational_subtypes_are_consumed() {
        let f = fixture(SessionConfig::new());
        let conn = f.bootstrap.open_connection(FamilyId::BART, "bart", 5190, None);

        assert!(f.bootstrap.on_oservice(&conn, oservice(OServiceSubtype::Error, u16s(&[5]))).is_none());
        assert!(f.bootstrap.on_oservice(&conn, oservice(OServiceSubtype::Motd, Bytes::from_static(b"\0\x04\0\x0b\0\x02hi"))).is_none());
        assert!(f.bootstrap.on_oservice(&conn, oservice(OServiceSubtype::Motd, Bytes::from_static(b"\0"))).is_none());

        assert_eq!(conn.bootstrap_state(), BootstrapState::Connecting);
        assert!(f.registry.connection(conn.id()).is_some());
    }

    #[rstest]
    #[case::self_info(0x000F)]
    #[case::unknown(0x0099)]
    #[case::client_side_subtype(0x0002)]
    #[tokio::test]
    async fn test_other_subtypes_are_handed_back(#[case] subtype: u16) {
        let f = fixture(SessionConfig::new());
        let conn = f.bootstrap.open_connection(FamilyId::BART, "bart", 5190, None);

        let snac = Snac::new(FamilyId::OSERVICE, subtype, 7, Bytes::from_static(b"info"));
        assert_eq!(f.bootstrap.on_oservice(&conn, snac.clone()), Some(snac));
        assert_eq!(conn.bootstrap_state(), BootstrapState::Connecting);
    }

    #[tokio::test]
    async fn test_server_versions_with_trailing_byte_continue_handshake() {
        let f = fixture(SessionConfig::new());
        let conn = f.bootstrap.open_connection(FamilyId::OSERVICE, "bos", 5190, Some(Bytes::from_static(b"c")));
        f.bootstrap.on_connected(&conn).await;
        f.bootstrap.on_oservice(&conn, oservice(OServiceSubtype::ServerReady, u16s(&[0x0001, 0x0004])));

        f.bootstrap.on_oservice(&conn, oservice(OServiceSubtype::ServerVersions, Bytes::from_static(b"\0\x01\0\x03\0")));
        settle().await;

        assert_eq!(conn.bootstrap_state(), BootstrapState::VersionsExchanged);
        assert_eq!(conn.oservice_version(), Some(3));
        assert_eq!(f.transport.snac_types(conn.id()).last(), Some(&(FamilyId::OSERVICE, 0x0006)));
        assert!(f.registry.connection(conn.id()).is_some());
        assert!(f.transport.closed().is_empty());
    }

    fn redirect(family: u16, host: &'static [u8]) -> Snac {
        let mut buf = BytesMut::new();
        Tlv::new(0x000D, u16s(&[family])).ser(&mut buf);
        Tlv::new(0x0005, Bytes::from_static(host)).ser(&mut buf);
        oservice(OServiceSubtype::NewServiceRedirect, buf.freeze())
    }

    #[tokio::test]
    async fn test_second_redirect_supersedes_connecting_connection() {
        let f = fixture(SessionConfig::new());
        let primary = f.bootstrap.open_connection(FamilyId::OSERVICE, "bos", 5190, None);

        f.bootstrap.on_oservice(&primary, redirect(0x000D, b"chatnav1.example.com"));
        let first = f.registry.get_connection(FamilyId::CHAT_NAV).unwrap();
        let queued = Snac::new(FamilyId::CHAT_NAV, 2, 9, Bytes::new());
        assert_eq!(f.registry.enqueue_unless_ready(Some(&first), FamilyId::CHAT_NAV, queued.clone()), Ok(true));

        f.bootstrap.on_oservice(&primary, redirect(0x000D, b"chatnav2.example.com"));

        let second = f.registry.get_connection(FamilyId::CHAT_NAV).unwrap();
        assert_ne!(second.id(), first.id());
        assert_eq!(second.host(), "chatnav2.example.com");
        assert!(f.registry.connection(first.id()).is_none());
        assert!(first.is_disconnected());
        assert_eq!(f.transport.closed(), vec![first.id()]);
        assert_eq!(f.registry.drain_delayed(FamilyId::CHAT_NAV), vec![queued]);
    }

    #[tokio::test]
    async fn test_redirect_does_not_close_ready_connection() {
        let f = fixture(SessionConfig::new());
        let primary = f.bootstrap.open_connection(FamilyId::OSERVICE, "bos", 5190, None);
        primary.rate_limiter().start();
        f.registry.assign_family(FamilyId::CHAT_NAV, &primary);
        f.registry.activate(&primary, &[FamilyId::OSERVICE, FamilyId::CHAT_NAV], |_| {});

        f.bootstrap.on_oservice(&primary, redirect(0x000D, b"chatnav.example.com"));

        assert_ne!(f.registry.get_connection(FamilyId::CHAT_NAV).unwrap().id(), primary.id());
        assert!(f.registry.connection(primary.id()).is_some());
        assert!(f.transport.closed().is_empty());
    }
}
