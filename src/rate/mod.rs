//! Client side of OSCAR congestion control.
//!
//! Servers group (family, subtype) pairs into *rate classes* and track, per class, a moving
//!  average of the time between the client's SNACs. When that average drops below the class's
//!  limit level, the server starts rejecting SNACs; below the disconnect level it drops the
//!  connection. The [RateLimiter] mirrors the server's bookkeeping and holds SNACs back until
//!  sending them keeps the class safely above its threshold.
//!
//! SNACs whose (family, subtype) pair does not belong to any class - which includes all SNACs
//!  before the server sent its rate parameters - are passed on unthrottled.

pub mod rate_class;
pub mod rate_messages;

use std::sync::{Arc, Mutex, RwLock};

use rustc_hash::FxHashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::config::RateThreshold;
use crate::connection::ConnectionId;
use crate::family::FamilyId;
use crate::rate::rate_class::{drain_loop, warn_if_degenerate, RateClass, RateClassId, RateClassParams};
use crate::rate::rate_messages::RateParameters;
use crate::snac::Snac;
use crate::transport::SnacSink;
use crate::util::lock::{MutexExt, RwLockExt};

pub struct RateLimiter {
    connection: ConnectionId,
    sink: Arc<dyn SnacSink>,
    threshold: RateThreshold,
    classes: RwLock<FxHashMap<RateClassId, Arc<RateClass>>>,
    associations: RwLock<FxHashMap<(FamilyId, u16), RateClassId>>,
    unthrottled: mpsc::UnboundedSender<Snac>,
    unthrottled_receiver: Mutex<Option<mpsc::UnboundedReceiver<Snac>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RateLimiter {
    pub fn new(connection: ConnectionId, sink: Arc<dyn SnacSink>, threshold: RateThreshold) -> RateLimiter {
        let (unthrottled, unthrottled_receiver) = mpsc::unbounded_channel();
        RateLimiter {
            connection,
            sink,
            threshold,
            classes: Default::default(),
            associations: Default::default(),
            unthrottled,
            unthrottled_receiver: Mutex::new(Some(unthrottled_receiver)),
            tasks: Default::default(),
        }
    }

    /// Starts passing on unthrottled SNACs. Until then, they are buffered. This must be called
    ///  from inside a Tokio runtime.
    pub fn start(&self) {
        let Some(mut receiver) = self.unthrottled_receiver.locked().take() else {
            debug!("{:?}: rate limiter was already started", self.connection);
            return;
        };

        let sink = self.sink.clone();
        let handle = tokio::spawn(async move {
            while let Some(snac) = receiver.recv().await {
                sink.transmit(snac).await;
            }
        });
        self.tasks.locked().push(handle);
    }

    pub fn classify(&self, family: FamilyId, subtype: u16) -> Option<Arc<RateClass>> {
        let id = *self.associations.read_locked().get(&(family, subtype))?;
        self.classes.read_locked().get(&id).cloned()
    }

    pub fn class(&self, id: RateClassId) -> Option<Arc<RateClass>> {
        self.classes.read_locked().get(&id).cloned()
    }

    pub fn has_classes(&self) -> bool {
        !self.classes.read_locked().is_empty()
    }

    /// Accepts a SNAC for transmission. This never blocks: the SNAC is either queued in its
    ///  rate class or handed to the unthrottled lane.
    pub fn submit(&self, snac: Snac) {
        match self.classify(snac.family(), snac.subtype()) {
            Some(class) => {
                trace!("{:?}: queueing SNAC {:?}/0x{:04X} in rate class {:?}", self.connection, snac.family(), snac.subtype(), class.id());
                class.enqueue(snac);
            }
            None => {
                if self.unthrottled.send(snac).is_err() {
                    debug!("{:?}: rate limiter is shut down - dropping SNAC", self.connection);
                }
            }
        }
    }

    /// Installs the server's rate parameters and starts draining each class. Returns the class
    ///  ids in the order they were received. Must be called from inside a Tokio runtime.
    pub fn install(&self, parameters: RateParameters) -> Vec<RateClassId> {
        let ids = parameters.class_ids();
        if ids.len() != 5 {
            info!("{:?}: server sent {} rate classes", self.connection, ids.len());
        }

        let now = Instant::now();
        for params in parameters.classes {
            warn_if_degenerate(&params);

            if let Some(existing) = self.class(params.id) {
                debug!("{:?}: rate class {:?} is already installed - updating its parameters", self.connection, params.id);
                existing.update_params(params);
                continue;
            }

            let class = Arc::new(RateClass::new(params, self.threshold, now));
            self.classes.write_locked().insert(class.id(), class.clone());

            let handle = tokio::spawn(drain_loop(class, self.sink.clone()));
            self.tasks.locked().push(handle);
        }

        let mut associations = self.associations.write_locked();
        for (id, pairs) in parameters.members {
            if !self.classes.read_locked().contains_key(&id) {
                warn!("{:?}: member list for undeclared rate class {:?} - ignoring", self.connection, id);
                continue;
            }
            for pair in pairs {
                associations.insert(pair, id);
            }
        }

        ids
    }

    /// apply a rate change notification. Returns `false` if the class is unknown.
    pub fn update_class(&self, params: RateClassParams) -> bool {
        match self.class(params.id) {
            Some(class) => {
                warn_if_degenerate(&params);
                class.update_params(params);
                true
            }
            None => false,
        }
    }

    /// stops all transmission; SNACs still queued are discarded
    pub fn shutdown(&self) {
        for handle in self.tasks.locked().drain(..) {
            handle.abort();
        }
        self.unthrottled_receiver.locked().take();
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;
    use bytes::Bytes;
    use tokio::time;
    use super::*;
    use crate::rate::rate_class::tests::test_params;
    use crate::test_util::RecordingSink;

    fn parameters(classes: Vec<RateClassParams>, members: Vec<(u16, Vec<(FamilyId, u16)>)>) -> RateParameters {
        RateParameters {
            classes,
            members: members.into_iter()
                .map(|(id, pairs)| (RateClassId(id), pairs))
                .collect(),
        }
    }

    fn snac(family: FamilyId, subtype: u16, request_id: u32) -> Snac {
        Snac::new(family, subtype, request_id, Bytes::new())
    }

    #[tokio::test]
    async fn test_unclassified_before_install() {
        let sink = Arc::new(RecordingSink::default());
        let limiter = RateLimiter::new(ConnectionId(1), sink.clone(), RateThreshold::Limit);

        assert!(limiter.classify(FamilyId::ICBM, 6).is_none());
        limiter.submit(snac(FamilyId::ICBM, 6, 1));
        limiter.submit(snac(FamilyId::BUDDY, 4, 2));

        time::sleep(Duration::from_millis(10)).await;
        assert!(sink.request_ids().is_empty(), "nothing is sent before the limiter is started");

        limiter.start();
        time::sleep(Duration::from_millis(10)).await;
        assert_eq!(sink.request_ids(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_install_and_classify() {
        let limiter = RateLimiter::new(ConnectionId(1), Arc::new(RecordingSink::default()), RateThreshold::Limit);

        let ids = limiter.install(parameters(
            vec![test_params(3, 2, 1000), test_params(1, 2, 1000), test_params(5, 2, 1000)],
            vec![
                (3, vec![(FamilyId::ICBM, 6)]),
                (1, vec![(FamilyId::OSERVICE, 8), (FamilyId::BUDDY, 4)]),
                (5, vec![]),
                (7, vec![(FamilyId::SSI, 8)]),
            ],
        ));

        assert_eq!(ids, vec![RateClassId(3), RateClassId(1), RateClassId(5)]);
        assert_eq!(limiter.classify(FamilyId::ICBM, 6).unwrap().id(), RateClassId(3));
        assert_eq!(limiter.classify(FamilyId::BUDDY, 4).unwrap().id(), RateClassId(1));
        assert!(limiter.classify(FamilyId::ICBM, 7).is_none());
        assert!(limiter.classify(FamilyId::SSI, 8).is_none());
        assert!(limiter.has_classes());
    }

    #[tokio::test(start_paused = true)]
    async fn test_classified_snacs_are_paced() {
        let sink = Arc::new(RecordingSink::default());
        let limiter = RateLimiter::new(ConnectionId(1), sink.clone(), RateThreshold::Limit);
        limiter.start();
        limiter.install(parameters(
            vec![test_params(1, 2, 1000)],
            vec![(1, vec![(FamilyId::ICBM, 6)])],
        ));

        for n in 0..4 {
            limiter.submit(snac(FamilyId::ICBM, 6, n));
        }

        time::sleep(Duration::from_millis(1)).await;
        assert_eq!(sink.request_ids(), vec![0, 1, 2]);

        time::sleep(Duration::from_millis(100)).await;
        assert_eq!(sink.request_ids(), vec![0, 1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unclassified_bypasses_paused_class() {
        let sink = Arc::new(RecordingSink::default());
        let limiter = RateLimiter::new(ConnectionId(1), sink.clone(), RateThreshold::Limit);
        limiter.start();
        limiter.install(parameters(
            vec![test_params(1, 2, 120)],
            vec![(1, vec![(FamilyId::ICBM, 6)])],
        ));

        limiter.submit(snac(FamilyId::ICBM, 6, 1));
        limiter.submit(snac(FamilyId::BUDDY, 4, 2));

        time::sleep(Duration::from_millis(1)).await;
        assert_eq!(sink.request_ids(), vec![2]);
        assert_eq!(limiter.classify(FamilyId::ICBM, 6).unwrap().queue_len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_class() {
        let sink = Arc::new(RecordingSink::default());
        let limiter = RateLimiter::new(ConnectionId(1), sink.clone(), RateThreshold::Limit);
        limiter.start();
        limiter.install(parameters(
            vec![test_params(1, 2, 120)],
            vec![(1, vec![(FamilyId::ICBM, 6)])],
        ));
        limiter.submit(snac(FamilyId::ICBM, 6, 1));

        time::sleep(Duration::from_millis(1)).await;
        assert!(sink.request_ids().is_empty());

        assert!(limiter.update_class(test_params(1, 2, 1000)));
        assert!(!limiter.update_class(test_params(4, 2, 1000)));

        time::sleep(Duration::from_millis(1)).await;
        assert_eq!(sink.request_ids(), vec![1]);
    }

    #[tokio::test]
    async fn test_shutdown_drops_snacs() {
        let sink = Arc::new(RecordingSink::default());
        let limiter = RateLimiter::new(ConnectionId(1), sink.clone(), RateThreshold::Limit);
        limiter.shutdown();
        limiter.start();

        limiter.submit(snac(FamilyId::ICBM, 6, 1));
        time::sleep(Duration::from_millis(10)).await;
        assert!(sink.request_ids().is_empty());
    }
}
