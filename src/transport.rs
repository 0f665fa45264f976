use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
#[cfg(test)] use mockall::automock;
use tracing::{error, trace};

use crate::connection::ConnectionId;
use crate::snac::{FlapChannel, Snac};

/// The physical side of a session: sockets and FLAP framing. Implementations report socket
///  events back through [crate::session::Session::on_connected],
///  [crate::session::Session::on_frame], [crate::session::Session::on_connection_error] and
///  [crate::session::Session::on_closed].
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// start connecting a socket for a newly created connection. This must not block.
    fn open(&self, connection: ConnectionId, host: &str, port: u16);

    /// wrap a payload in a FLAP frame (assigning the connection's next sequence number) and
    ///  write it to the connection's socket
    async fn send_flap(&self, connection: ConnectionId, channel: FlapChannel, payload: Bytes) -> anyhow::Result<()>;

    fn close(&self, connection: ConnectionId);
}

/// Where a rate limiter delivers SNACs once they are cleared for transmission
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SnacSink: Send + Sync + 'static {
    async fn transmit(&self, snac: Snac);
}

pub struct ConnectionWriter {
    connection: ConnectionId,
    transport: Arc<dyn Transport>,
}

impl ConnectionWriter {
    pub fn new(connection: ConnectionId, transport: Arc<dyn Transport>) -> ConnectionWriter {
        ConnectionWriter { connection, transport }
    }
}

#[async_trait]
impl SnacSink for ConnectionWriter {
    async fn transmit(&self, snac: Snac) {
        trace!("sending SNAC {:?}/0x{:04X} #{} on {:?}", snac.family(), snac.subtype(), snac.header.request_id, self.connection);

        //NB: a failed write surfaces as a connection error through the transport's read side
        if let Err(e) = self.transport.send_flap(self.connection, FlapChannel::Snac, snac.ser()).await {
            error!("error sending SNAC {:?}/0x{:04X} on {:?}: {}", snac.family(), snac.subtype(), self.connection, e);
        }
    }
}
