//! Worker-side scheduling state machine: tracks which brokers have
//! advertised jobs and drives the four-state `Idle -> Waiting -> Trying ->
//! Processing` cycle described in the original's `task_communicator`.
//! Kept free of socket I/O so transitions can be tested directly;
//! [`reactor`] wires it to real 0MQ sockets and a worker-side render thread.

pub mod reactor;

use std::collections::HashMap;

use rendermq_proto::Job;

/// Where the communicator is in the job-acquisition cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum State {
    /// Nothing requested yet.
    Idle,
    /// A job was requested but no broker currently advertises one.
    Waiting,
    /// Asked a specific broker for a job and is waiting on its reply.
    Trying { broker: String, deadline_secs: i64 },
    /// Holding a job, handed off to the render thread.
    Processing { broker: String },
}

/// A broker's last-advertised queue status: the priority of the task at its
/// head, and its queue length as a tie-break/fairness proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BrokerStatus {
    max_priority: i32,
    queue_size: i64,
}

impl BrokerStatus {
    fn rank(&self) -> (i32, i64) {
        (self.max_priority, self.queue_size)
    }
}

/// An effect the reactor must carry out in response to a state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    None,
    /// Send `GET_JOB` to this broker.
    SendGetJob(String),
    /// Hand this job to the render thread.
    DeliverJob(Job),
    /// Send `RESULT` with this job to this broker.
    SendResult(String, Job),
}

/// The worker-side scheduler. `broker_timeout_secs` bounds how long to wait
/// for a `GET_JOB` reply before assuming the broker died.
pub struct Communicator {
    state: State,
    brokers: HashMap<String, BrokerStatus>,
    broker_timeout_secs: i64,
}

impl Communicator {
    pub fn new(broker_timeout_secs: i64) -> Communicator {
        Communicator {
            state: State::Idle,
            brokers: HashMap::new(),
            broker_timeout_secs,
        }
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    /// The render thread has finished its last job (or is starting up) and
    /// wants another. Only valid from `Idle`; any other state is a
    /// request the state machine shouldn't be able to reach and is logged
    /// and dropped rather than panicking.
    pub fn request_job(&mut self, now: i64) -> Action {
        if self.state != State::Idle {
            tracing::debug!(state = ?self.state, "worker requested a job, but the state is not idle");
            return Action::None;
        }
        self.try_to_get_job(now)
    }

    /// A broker announced it has jobs available (`JOBS AVAILABLE` on the
    /// backend PUB socket). Updates the availability map and, if this
    /// worker was waiting idle for exactly this, immediately tries again.
    pub fn on_announcement(&mut self, broker: String, max_priority: i32, queue_size: i64, now: i64) -> Action {
        self.brokers.insert(broker, BrokerStatus { max_priority, queue_size });
        if self.state == State::Waiting {
            self.try_to_get_job(now)
        } else {
            Action::None
        }
    }

    /// A reply arrived on the broker request socket: either `JOB <bytes>`
    /// (`job = Some`) or `NO JOBS` (`job = None`), from `from_broker`.
    pub fn on_job_reply(&mut self, from_broker: &str, job: Option<Job>, now: i64) -> Action {
        match &self.state {
            State::Trying { broker, .. } if broker == from_broker => match job {
                Some(job) => {
                    self.state = State::Processing { broker: from_broker.to_string() };
                    Action::DeliverJob(job)
                }
                None => {
                    self.brokers.remove(from_broker);
                    self.try_to_get_job(now)
                }
            },
            _ => {
                tracing::warn!(broker = from_broker, "unexpected job offer, dropping");
                Action::None
            }
        }
    }

    /// Called periodically (or driven by a poll timeout) to check whether
    /// the broker currently being asked has taken too long to reply.
    pub fn on_retry_timeout(&mut self, now: i64) -> Action {
        if let State::Trying { broker, deadline_secs } = &self.state {
            if now >= *deadline_secs {
                tracing::warn!(broker, "dropped job request, assuming broker died");
                let broker = broker.clone();
                self.brokers.remove(&broker);
                return self.try_to_get_job(now);
            }
        }
        Action::None
    }

    /// The render thread finished the job it was holding. Returns the
    /// broker to send `RESULT` to, if any (only valid from `Processing`).
    pub fn complete_job(&mut self, result: Job) -> Action {
        match &self.state {
            State::Processing { broker } => {
                let broker = broker.clone();
                self.state = State::Idle;
                Action::SendResult(broker, result)
            }
            _ => {
                tracing::debug!(state = ?self.state, "worker returned a job, but the state is not processing");
                Action::None
            }
        }
    }

    fn try_to_get_job(&mut self, now: i64) -> Action {
        match self.highest_priority_broker() {
            Some(broker) => {
                self.state = State::Trying {
                    broker: broker.clone(),
                    deadline_secs: now + self.broker_timeout_secs,
                };
                Action::SendGetJob(broker)
            }
            None => {
                self.state = State::Waiting;
                Action::None
            }
        }
    }

    fn highest_priority_broker(&self) -> Option<String> {
        self.brokers
            .iter()
            .max_by_key(|(_, status)| status.rank())
            .map(|(id, _)| id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rendermq_proto::{Format, Status};

    fn job() -> Job {
        Job::new(Status::Render, 0, 0, 10, 1, "osm", Format::PNG)
    }

    #[test]
    fn idle_with_no_brokers_goes_to_waiting() {
        let mut c = Communicator::new(30);
        assert_eq!(c.request_job(0), Action::None);
        assert_eq!(c.state(), &State::Waiting);
    }

    #[test]
    fn idle_with_a_broker_tries_immediately() {
        let mut c = Communicator::new(30);
        c.on_announcement("broker1".into(), 100, 5, 0);
        let action = c.request_job(0);
        assert_eq!(action, Action::SendGetJob("broker1".into()));
        assert!(matches!(c.state(), State::Trying { broker, .. } if broker == "broker1"));
    }

    #[test]
    fn waiting_tries_as_soon_as_a_broker_announces() {
        let mut c = Communicator::new(30);
        c.request_job(0);
        assert_eq!(c.state(), &State::Waiting);

        let action = c.on_announcement("broker1".into(), 50, 2, 10);
        assert_eq!(action, Action::SendGetJob("broker1".into()));
    }

    #[test]
    fn trying_picks_highest_priority_then_queue_length() {
        let mut c = Communicator::new(30);
        c.on_announcement("low".into(), 50, 100, 0);
        c.on_announcement("high".into(), 100, 1, 0);
        c.on_announcement("high-tied".into(), 100, 5, 0);

        let action = c.request_job(0);
        assert_eq!(action, Action::SendGetJob("high-tied".into()));
    }

    #[test]
    fn job_reply_from_wrong_broker_is_dropped() {
        let mut c = Communicator::new(30);
        c.on_announcement("broker1".into(), 100, 1, 0);
        c.request_job(0);

        let action = c.on_job_reply("broker2", Some(job()), 1);
        assert_eq!(action, Action::None);
        assert!(matches!(c.state(), State::Trying { broker, .. } if broker == "broker1"));
    }

    #[test]
    fn job_reply_delivers_and_moves_to_processing() {
        let mut c = Communicator::new(30);
        c.on_announcement("broker1".into(), 100, 1, 0);
        c.request_job(0);

        let action = c.on_job_reply("broker1", Some(job()), 1);
        assert!(matches!(action, Action::DeliverJob(_)));
        assert_eq!(c.state(), &State::Processing { broker: "broker1".into() });
    }

    #[test]
    fn no_jobs_reply_drops_broker_and_retries() {
        let mut c = Communicator::new(30);
        c.on_announcement("broker1".into(), 100, 1, 0);
        c.on_announcement("broker2".into(), 50, 1, 0);
        c.request_job(0);

        let action = c.on_job_reply("broker1", None, 1);
        assert_eq!(action, Action::SendGetJob("broker2".into()));
    }

    #[test]
    fn retry_timeout_drops_dead_broker_and_reselects() {
        let mut c = Communicator::new(30);
        c.on_announcement("dead".into(), 100, 1, 0);
        c.on_announcement("alive".into(), 50, 1, 0);
        c.request_job(0);

        assert_eq!(c.on_retry_timeout(10), Action::None);
        let action = c.on_retry_timeout(30);
        assert_eq!(action, Action::SendGetJob("alive".into()));
    }

    #[test]
    fn complete_job_sends_result_and_returns_to_idle() {
        let mut c = Communicator::new(30);
        c.on_announcement("broker1".into(), 100, 1, 0);
        c.request_job(0);
        c.on_job_reply("broker1", Some(job()), 1);

        let action = c.complete_job(job());
        assert!(matches!(action, Action::SendResult(broker, _) if broker == "broker1"));
        assert_eq!(c.state(), &State::Idle);
    }
}
