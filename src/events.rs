use std::fmt::{Display, Formatter};
use std::collections::BTreeSet;

use tokio::sync::broadcast;
use tracing::trace;

use crate::connection::ConnectionId;
use crate::family::FamilyId;

/// Why a connection loss ended login or the session, or degraded it
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectionLoss {
    CannotReachAuthorizer,
    CannotReachPrimary,
    LostPrimary,
    LostSecondary,
}

impl Display for ConnectionLoss {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            ConnectionLoss::CannotReachAuthorizer => "cannot reach authorization server",
            ConnectionLoss::CannotReachPrimary => "cannot reach primary server",
            ConnectionLoss::LostPrimary => "lost primary connection",
            ConnectionLoss::LostSecondary => "lost secondary connection",
        };
        write!(f, "{}", text)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SessionEvent {
    /// fatal, login is aborted
    LoginFailed(ConnectionLoss),
    /// fatal, the session is over
    SessionError(ConnectionLoss),
    /// the session continues, but without the functionality of the lost connection's families
    Warning(ConnectionLoss),
    Progress(ProgressData),
    ServiceReady(ServiceReadyData),
    SignedOn,
    ChatNavigationAvailable,
    ChatServiceAvailable(ChatServiceAvailableData),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProgressData {
    pub text: String,
    pub step: u8,
    pub total: u8,
}

impl ProgressData {
    pub fn fraction(&self) -> f32 {
        self.step as f32 / self.total as f32
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServiceReadyData {
    pub connection: ConnectionId,
    pub families: BTreeSet<FamilyId>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ChatServiceAvailableData {
    pub connection: ConnectionId,
}


pub struct SessionEventNotifier {
    sender: broadcast::Sender<SessionEvent>,
}
impl SessionEventNotifier {
    pub fn new(capacity: usize) -> SessionEventNotifier {
        let (sender, _) = broadcast::channel(capacity);

        SessionEventNotifier {
            sender
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    pub fn send_event(&self, event: SessionEvent) {
        trace!("event: {:?}", event);
        let _ = self.sender.send(event);
    }
}
