use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;

use crate::connection::ConnectionId;
use crate::family::FamilyId;
use crate::snac::{FlapChannel, Snac};
use crate::transport::Transport;
use crate::util::lock::MutexExt;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OpenedConnection {
    pub connection: ConnectionId,
    pub host: String,
    pub port: u16,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SentFrame {
    pub connection: ConnectionId,
    pub channel: FlapChannel,
    pub payload: Bytes,
}

/// A [Transport] without sockets: it records what the control plane asks of it, and leaves
///  feeding socket events back into the session to the test.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    opened: Mutex<Vec<OpenedConnection>>,
    frames: Mutex<Vec<SentFrame>>,
    closed: Mutex<Vec<ConnectionId>>,
}

impl RecordingTransport {
    pub fn opened(&self) -> Vec<OpenedConnection> {
        self.opened.locked().clone()
    }

    pub fn frames(&self) -> Vec<SentFrame> {
        self.frames.locked().clone()
    }

    pub fn closed(&self) -> Vec<ConnectionId> {
        self.closed.locked().clone()
    }

    /// the SNACs sent on a connection so far, in order. Frames that are no valid SNACs are
    ///  skipped.
    pub fn snacs(&self, connection: ConnectionId) -> Vec<Snac> {
        self.frames.locked().iter()
            .filter(|f| f.connection == connection && f.channel == FlapChannel::Snac)
            .filter_map(|f| Snac::try_deser(f.payload.clone()).ok())
            .collect()
    }

    /// (family, subtype) of the SNACs sent on a connection so far
    pub fn snac_types(&self, connection: ConnectionId) -> Vec<(FamilyId, u16)> {
        self.snacs(connection).iter()
            .map(|s| (s.family(), s.subtype()))
            .collect()
    }

    pub fn clear_frames(&self) {
        self.frames.locked().clear();
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    fn open(&self, connection: ConnectionId, host: &str, port: u16) {
        self.opened.locked().push(OpenedConnection {
            connection,
            host: host.to_string(),
            port,
        });
    }

    async fn send_flap(&self, connection: ConnectionId, channel: FlapChannel, payload: Bytes) -> anyhow::Result<()> {
        self.frames.locked().push(SentFrame { connection, channel, payload });
        Ok(())
    }

    fn close(&self, connection: ConnectionId) {
        self.closed.locked().push(connection);
    }
}
