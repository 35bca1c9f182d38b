//! Client-side queue runner state, grounded in the handler side of
//! `zmq_backend.cpp`: a liveness map over broker identities backing a
//! consistent-hash ring, kept free of socket I/O so the promotion/eviction
//! and routing decisions can be tested directly. [`crate::reactor`] drives
//! this from real sockets.

use std::collections::HashMap;

use rendermq_hashring::ConsistentHash;

const DEFAULT_LIVENESS_TIME_SECS: i64 = 30;
const DEFAULT_RESUBSCRIBE_INTERVAL_SECS: i64 = 3600;
const DEFAULT_SETTLE_TIME_SECS: i64 = 5;

#[derive(Debug, Clone, Copy)]
struct BrokerLiveness {
    last_heartbeat: i64,
    queue_len: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    StillSettling,
    NoBrokersAvailable,
}

/// Tracks which brokers are currently live and routes jobs to one of them
/// by consistent hash. A broker is "live" once its first heartbeat has
/// arrived and stays live until `liveness_time_secs` elapses without one.
pub struct Runner {
    ring: ConsistentHash<String>,
    live: HashMap<String, BrokerLiveness>,
    started_at: i64,
    last_resubscribe: i64,
    liveness_time_secs: i64,
    resubscribe_interval_secs: i64,
    settle_time_secs: i64,
}

impl Runner {
    pub fn new(now: i64) -> Runner {
        Runner {
            ring: ConsistentHash::with_default_repeats(),
            live: HashMap::new(),
            started_at: now,
            last_resubscribe: now,
            liveness_time_secs: DEFAULT_LIVENESS_TIME_SECS,
            resubscribe_interval_secs: DEFAULT_RESUBSCRIBE_INTERVAL_SECS,
            settle_time_secs: DEFAULT_SETTLE_TIME_SECS,
        }
    }

    pub fn with_thresholds(mut self, liveness_time_secs: i64, resubscribe_interval_secs: i64, settle_time_secs: i64) -> Runner {
        self.liveness_time_secs = liveness_time_secs;
        self.resubscribe_interval_secs = resubscribe_interval_secs;
        self.settle_time_secs = settle_time_secs;
        self
    }

    pub fn is_settling(&self, now: i64) -> bool {
        now - self.started_at < self.settle_time_secs
    }

    /// Records a heartbeat (with its advertised queue length) from
    /// `broker`, promoting it into the ring if it wasn't already live.
    pub fn note_heartbeat(&mut self, broker: &str, now: i64, queue_len: usize) {
        if !self.live.contains_key(broker) {
            self.ring.insert(broker.to_string());
        }
        self.live.insert(broker.to_string(), BrokerLiveness { last_heartbeat: now, queue_len });
    }

    /// Evicts brokers not heard from within `liveness_time_secs`. Returns
    /// `true` if the subscription socket should be torn down and
    /// reconnected because `resubscribe_interval_secs` has elapsed.
    pub fn update_live_brokers(&mut self, now: i64) -> bool {
        let stale: Vec<String> = self
            .live
            .iter()
            .filter(|(_, liveness)| now - liveness.last_heartbeat >= self.liveness_time_secs)
            .map(|(name, _)| name.clone())
            .collect();
        for name in &stale {
            self.ring.erase(name);
            self.live.remove(name);
        }

        if now - self.last_resubscribe >= self.resubscribe_interval_secs {
            self.last_resubscribe = now;
            true
        } else {
            false
        }
    }

    /// Looks up the broker a job's routing key should go to. Callers are
    /// expected to have already called [`Runner::update_live_brokers`] and
    /// checked [`Runner::is_settling`] this tick.
    pub fn route<K: std::hash::Hash>(&self, now: i64, key: &K) -> Result<&str, SendError> {
        if self.is_settling(now) {
            return Err(SendError::StillSettling);
        }
        self.ring.lookup(key).map(String::as_str).ok_or(SendError::NoBrokersAvailable)
    }

    /// Mean of live brokers' advertised queue lengths, `0` with none live,
    /// `usize::MAX` while still settling (matching `queue_length()`'s
    /// "infinite" contract that discourages routing during discovery).
    pub fn queue_length(&self, now: i64) -> usize {
        if self.is_settling(now) {
            return usize::MAX;
        }
        if self.live.is_empty() {
            return 0;
        }
        let total: usize = self.live.values().map(|l| l.queue_len).sum();
        total / self.live.len()
    }

    pub fn live_broker_count(&self) -> usize {
        self.live.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settling_blocks_routing_and_reports_infinite_queue() {
        let runner = Runner::new(1000).with_thresholds(30, 3600, 5);
        assert!(runner.is_settling(1002));
        assert_eq!(runner.route(1002, &"osm/10/0/0"), Err(SendError::StillSettling));
        assert_eq!(runner.queue_length(1002), usize::MAX);
    }

    #[test]
    fn no_brokers_available_once_settled() {
        let runner = Runner::new(1000).with_thresholds(30, 3600, 5);
        assert_eq!(runner.route(1010, &"osm/10/0/0"), Err(SendError::NoBrokersAvailable));
        assert_eq!(runner.queue_length(1010), 0);
    }

    #[test]
    fn heartbeat_promotes_broker_and_enables_routing() {
        let mut runner = Runner::new(1000).with_thresholds(30, 3600, 5);
        runner.note_heartbeat("broker-a", 1001, 4);
        runner.update_live_brokers(1010);
        assert_eq!(runner.route(1010, &"osm/10/0/0"), Ok("broker-a"));
        assert_eq!(runner.queue_length(1010), 4);
    }

    #[test]
    fn stale_broker_is_evicted() {
        let mut runner = Runner::new(1000).with_thresholds(30, 3600, 5);
        runner.note_heartbeat("broker-a", 1001, 4);
        runner.update_live_brokers(1035);
        assert_eq!(runner.route(1035, &"osm/10/0/0"), Err(SendError::NoBrokersAvailable));
    }

    #[test]
    fn queue_length_is_mean_of_live_brokers() {
        let mut runner = Runner::new(1000).with_thresholds(30, 3600, 5);
        runner.note_heartbeat("a", 1001, 10);
        runner.note_heartbeat("b", 1001, 20);
        runner.update_live_brokers(1010);
        assert_eq!(runner.queue_length(1010), 15);
    }

    #[test]
    fn resubscribe_interval_elapsed_is_reported_once() {
        let mut runner = Runner::new(1000).with_thresholds(30, 100, 5);
        assert!(!runner.update_live_brokers(1050));
        assert!(runner.update_live_brokers(1101));
        assert!(!runner.update_live_brokers(1110));
    }
}
