use anyhow::bail;

/// The level band at which a rate class stops transmitting until its level has recovered.
///
/// Levels are a moving average of the time between sends, so a *higher* level means more
///  headroom: `max > clear > alert > limit > disconnect`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RateThreshold {
    /// pause before the server starts rate limiting (default)
    Limit,
    /// pause before the server even sends rate warnings
    Alert,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// used for redirect addresses that come without an explicit port
    pub default_port: u16,

    pub rate_limit_threshold: RateThreshold,

    /// capacity of the broadcast channel for [crate::events::SessionEvent]s. Subscribers that
    ///  fall behind by more than this lose the oldest events.
    pub event_channel_capacity: usize,

    /// emit [crate::events::SessionEvent::Progress] at milestones of the primary connection's
    ///  bootstrap
    pub report_progress: bool,

    /// send the battery of parameter requests (contact list, messaging, buddy, privacy, ...)
    ///  when the primary connection completes its bootstrap during login
    pub login_parameter_requests: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionConfig {
    pub fn new() -> SessionConfig {
        SessionConfig {
            default_port: 5190,
            rate_limit_threshold: RateThreshold::Limit,
            event_channel_capacity: 128,
            report_progress: true,
            login_parameter_requests: true,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.default_port == 0 {
            bail!("default port must not be 0");
        }
        if self.event_channel_capacity == 0 {
            bail!("event channel capacity must be positive");
        }
        Ok(())
    }
}
