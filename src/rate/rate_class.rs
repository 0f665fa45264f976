use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::{self, Instant};
use tokio::select;
use tracing::{debug, trace, warn};

use crate::config::RateThreshold;
use crate::snac::Snac;
use crate::transport::SnacSink;
use crate::util::lock::MutexExt;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct RateClassId(pub u16);

/// A rate class's parameters as the server sends them. All levels are in milliseconds: the
///  server tracks a moving average of the time between a client's SNACs in a class, and compares
///  it to the thresholds. Higher is better.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RateClassParams {
    pub id: RateClassId,
    /// number of sends the moving average spans
    pub window_size: u32,
    pub clear_level: u32,
    pub alert_level: u32,
    pub limit_level: u32,
    pub disconnect_level: u32,
    pub current_level: u32,
    pub max_level: u32,
    /// present only if the server speaks oservice version 3 or later
    pub last_time: Option<u32>,
    pub current_state: Option<u8>,
}

#[derive(Debug)]
pub(crate) enum NextTransmission {
    Send(Snac),
    WaitUntil(Instant),
    Idle,
}

struct RateClassState {
    params: RateClassParams,
    current_level: u32,
    last_send: Instant,
    queue: VecDeque<Snac>,
}

impl RateClassState {
    /// the level after sending at `now`: `((window - 1) * current + elapsed) / window`, capped at max
    fn projected_level(&self, now: Instant) -> u32 {
        let window = self.params.window_size.max(1) as u64;
        let elapsed = now.saturating_duration_since(self.last_send).as_millis() as u64;

        let projected = ((window - 1) * self.current_level as u64 + elapsed) / window;
        projected.min(self.params.max_level as u64) as u32
    }

    /// The level a send must stay above. `None` means the server's parameters leave no room
    ///  for throttling at all.
    fn effective_threshold(&self, threshold: RateThreshold) -> Option<u32> {
        let configured = match threshold {
            RateThreshold::Limit => self.params.limit_level,
            RateThreshold::Alert => self.params.alert_level,
        };

        if configured < self.params.max_level {
            Some(configured)
        }
        else if self.params.disconnect_level < self.params.max_level {
            Some(self.params.disconnect_level)
        }
        else {
            None
        }
    }

    /// elapsed time since the last send after which the projected level exceeds `threshold`
    fn required_elapsed(&self, threshold: u32) -> Duration {
        let window = self.params.window_size.max(1) as u64;
        let required = ((threshold as u64 + 1) * window)
            .saturating_sub((window - 1) * self.current_level as u64);
        Duration::from_millis(required)
    }
}


/// A server-defined congestion class with its own FIFO of SNACs waiting for transmission.
///
/// SNACs leave the queue in order, and only while sending them keeps the class's level above the
///  configured threshold - otherwise transmission pauses until the level has recovered.
pub struct RateClass {
    id: RateClassId,
    threshold: RateThreshold,
    state: Mutex<RateClassState>,
    wakeup: Notify,
}

impl RateClass {
    pub fn new(params: RateClassParams, threshold: RateThreshold, now: Instant) -> RateClass {
        let current_level = params.current_level.min(params.max_level);
        RateClass {
            id: params.id,
            threshold,
            state: Mutex::new(RateClassState {
                params,
                current_level,
                last_send: now,
                queue: VecDeque::new(),
            }),
            wakeup: Notify::new(),
        }
    }

    pub fn id(&self) -> RateClassId {
        self.id
    }

    pub fn params(&self) -> RateClassParams {
        self.state.locked().params.clone()
    }

    pub fn current_level(&self) -> u32 {
        self.state.locked().current_level
    }

    pub fn queue_len(&self) -> usize {
        self.state.locked().queue.len()
    }

    pub fn enqueue(&self, snac: Snac) {
        self.state.locked().queue.push_back(snac);
        self.wakeup.notify_one();
    }

    /// replace the parameters, e.g. after a rate change notification. Queued SNACs are kept.
    pub fn update_params(&self, params: RateClassParams) {
        {
            let mut state = self.state.locked();
            state.current_level = params.current_level.min(params.max_level);
            state.params = params;
        }
        self.wakeup.notify_one();
    }

    pub(crate) fn next_transmission(&self, now: Instant) -> NextTransmission {
        let mut state = self.state.locked();
        if state.queue.is_empty() {
            return NextTransmission::Idle;
        }

        let projected = state.projected_level(now);
        match state.effective_threshold(self.threshold) {
            Some(threshold) if projected <= threshold => {
                let deadline = state.last_send + state.required_elapsed(threshold);
                NextTransmission::WaitUntil(deadline)
            }
            _ => {
                state.current_level = projected;
                state.last_send = now;
                match state.queue.pop_front() {
                    Some(snac) => NextTransmission::Send(snac),
                    None => NextTransmission::Idle,
                }
            }
        }
    }
}

/// Transmits a class's queued SNACs for as long as the connection lives. The task is aborted
///  by the owning [crate::rate::RateLimiter].
pub(crate) async fn drain_loop(class: Arc<RateClass>, sink: Arc<dyn SnacSink>) {
    debug!("starting drain loop for rate class {:?}", class.id);

    loop {
        match class.next_transmission(Instant::now()) {
            NextTransmission::Send(snac) => {
                sink.transmit(snac).await;
            }
            NextTransmission::WaitUntil(deadline) => {
                trace!("rate class {:?}: level {} too low, pausing transmission", class.id, class.current_level());
                select! {
                    _ = time::sleep_until(deadline) => {}
                    _ = class.wakeup.notified() => {}
                }
            }
            NextTransmission::Idle => {
                class.wakeup.notified().await;
            }
        }
    }
}

pub(crate) fn warn_if_degenerate(params: &RateClassParams) {
    if params.max_level <= params.disconnect_level {
        warn!("rate class {:?} has max level {} <= disconnect level {} - sending unthrottled", params.id, params.max_level, params.disconnect_level);
    }
}
