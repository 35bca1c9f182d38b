//! Wires [`crate::runner::Runner`] to real sockets: a fresh DEALER socket
//! per in-flight request (its identity doubles as the broker's per-request
//! `client_addr`, so concurrent requests from this process don't collide in
//! the broker's subscriber list — a per-handler-process deviation from the
//! original's single persistent connection, since nothing else gives the
//! broker a way to tell two outstanding requests from the same process
//! apart), and one SUB socket per broker for heartbeat/queue-length
//! updates.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

use rendermq_config::BrokerEndpoints;
use rendermq_proto::wire::{decode_job, encode_job};
use rendermq_proto::Job;

use crate::runner::{Runner, SendError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RunnerError {
    #[error("still settling into the broker ring")]
    StillSettling,
    #[error("no brokers available")]
    NoBrokersAvailable,
    #[error("request timed out waiting for a broker reply")]
    Timeout,
}

impl From<SendError> for RunnerError {
    fn from(err: SendError) -> RunnerError {
        match err {
            SendError::StillSettling => RunnerError::StillSettling,
            SendError::NoBrokersAvailable => RunnerError::NoBrokersAvailable,
        }
    }
}

struct SubmitCommand {
    job: Job,
    reply: tokio::sync::oneshot::Sender<Result<Job, RunnerError>>,
}

/// Handle kept by the HTTP layer: submits jobs to the reactor thread and
/// reads its live queue-length estimate without a round trip.
#[derive(Clone)]
pub struct HandlerRunner {
    commands: mpsc::Sender<SubmitCommand>,
    queue_length: Arc<AtomicUsize>,
}

impl HandlerRunner {
    pub fn spawn(handler_id: String, brokers: HashMap<String, BrokerEndpoints>, liveness_time_secs: i64, resubscribe_interval_secs: i64, settle_time_secs: i64) -> HandlerRunner {
        let (tx, rx) = mpsc::channel();
        let queue_length = Arc::new(AtomicUsize::new(usize::MAX));
        let thread_queue_length = queue_length.clone();
        thread::spawn(move || {
            reactor_loop(handler_id, brokers, liveness_time_secs, resubscribe_interval_secs, settle_time_secs, rx, thread_queue_length);
        });
        HandlerRunner { commands: tx, queue_length }
    }

    pub async fn submit(&self, job: Job) -> Result<Job, RunnerError> {
        let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();
        self.commands
            .send(SubmitCommand { job, reply: reply_tx })
            .map_err(|_| RunnerError::NoBrokersAvailable)?;
        reply_rx.await.unwrap_or(Err(RunnerError::NoBrokersAvailable))
    }

    pub fn queue_length(&self) -> usize {
        self.queue_length.load(Ordering::Relaxed)
    }
}

struct Pending {
    socket: zmq::Socket,
    reply: tokio::sync::oneshot::Sender<Result<Job, RunnerError>>,
    submitted_at: i64,
}

fn now_secs() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

const REQUEST_TIMEOUT_SECS: i64 = 10;
const POLL_TIMEOUT_MS: i64 = 200;

fn reactor_loop(
    handler_id: String,
    brokers: HashMap<String, BrokerEndpoints>,
    liveness_time_secs: i64,
    resubscribe_interval_secs: i64,
    settle_time_secs: i64,
    commands: mpsc::Receiver<SubmitCommand>,
    queue_length: Arc<AtomicUsize>,
) {
    let ctx = zmq::Context::new();
    let mut runner = Runner::new(now_secs()).with_thresholds(liveness_time_secs, resubscribe_interval_secs, settle_time_secs);

    let broker_sub = match ctx.socket(zmq::SUB) {
        Ok(s) => s,
        Err(err) => {
            tracing::error!(%err, "failed to create handler-runner sub socket");
            return;
        }
    };
    if broker_sub.set_subscribe(b"").is_err() {
        return;
    }
    for endpoints in brokers.values() {
        if broker_sub.connect(&endpoints.in_sub).is_err() {
            return;
        }
    }

    let mut next_request_id: u64 = 0;
    let mut pending: HashMap<Vec<u8>, Pending> = HashMap::new();

    loop {
        for cmd in commands.try_iter() {
            let now = now_secs();
            let resubscribe = runner.update_live_brokers(now);
            if resubscribe {
                tracing::info!("resubscribing handler runner to broker heartbeats");
            }
            match dispatch(&ctx, &mut runner, &brokers, &handler_id, &mut next_request_id, &cmd.job, now) {
                Ok((id, socket)) => {
                    pending.insert(id, Pending { socket, reply: cmd.reply, submitted_at: now });
                }
                Err(err) => {
                    let _ = cmd.reply.send(Err(err));
                }
            }
        }

        queue_length.store(runner.queue_length(now_secs()), Ordering::Relaxed);

        let mut items = Vec::with_capacity(pending.len() + 1);
        items.push(broker_sub.as_poll_item(zmq::POLLIN));
        let ids: Vec<Vec<u8>> = pending.keys().cloned().collect();
        for id in &ids {
            items.push(pending[id].socket.as_poll_item(zmq::POLLIN));
        }

        if zmq::poll(&mut items, POLL_TIMEOUT_MS).is_err() {
            return;
        }

        let sub_readable = items[0].is_readable();
        let readable_ids: Vec<Vec<u8>> = ids.iter().enumerate().filter(|(idx, _)| items[idx + 1].is_readable()).map(|(_, id)| id.clone()).collect();
        drop(items);

        if sub_readable {
            if let Ok(frames) = rendermq_transport::recv_published(&broker_sub) {
                if let [broker_name, queue_len_bytes] = frames.as_slice() {
                    if let Ok(bytes) = <[u8; 8]>::try_from(queue_len_bytes.as_slice()) {
                        let len = u64::from_be_bytes(bytes) as usize;
                        runner.note_heartbeat(&String::from_utf8_lossy(broker_name), now_secs(), len);
                    }
                }
            }
        }

        for id in &readable_ids {
            let Some(entry) = pending.remove(id) else { continue };
            match entry.socket.recv_multipart(0) {
                Ok(frames) if frames.len() == 2 => match decode_job(&frames[1]) {
                    Ok(job) => {
                        let _ = entry.reply.send(Ok(job));
                    }
                    Err(_) => {
                        let _ = entry.reply.send(Err(RunnerError::NoBrokersAvailable));
                    }
                },
                _ => {
                    let _ = entry.reply.send(Err(RunnerError::NoBrokersAvailable));
                }
            }
        }

        let now = now_secs();
        let timed_out: Vec<Vec<u8>> = pending
            .iter()
            .filter(|(_, p)| now - p.submitted_at >= REQUEST_TIMEOUT_SECS)
            .map(|(id, _)| id.clone())
            .collect();
        for id in timed_out {
            if let Some(entry) = pending.remove(&id) {
                let _ = entry.reply.send(Err(RunnerError::Timeout));
            }
        }
    }
}

fn dispatch(
    ctx: &zmq::Context,
    runner: &mut Runner,
    brokers: &HashMap<String, BrokerEndpoints>,
    handler_id: &str,
    next_request_id: &mut u64,
    job: &Job,
    now: i64,
) -> Result<(Vec<u8>, zmq::Socket), RunnerError> {
    let key = job.metatile_key();
    let broker_name = runner.route(now, &key)?.to_string();
    let endpoints = brokers.get(&broker_name).ok_or(RunnerError::NoBrokersAvailable)?;

    let request_id = format!("{handler_id}-{}", *next_request_id).into_bytes();
    *next_request_id += 1;

    let socket = ctx.socket(zmq::DEALER).map_err(|_| RunnerError::NoBrokersAvailable)?;
    socket.set_identity(&request_id).map_err(|_| RunnerError::NoBrokersAvailable)?;
    socket.connect(&endpoints.in_req).map_err(|_| RunnerError::NoBrokersAvailable)?;
    let encoded = encode_job(job);
    socket
        .send_multipart([&[][..], &encoded], 0)
        .map_err(|_| RunnerError::NoBrokersAvailable)?;

    Ok((request_id, socket))
}
