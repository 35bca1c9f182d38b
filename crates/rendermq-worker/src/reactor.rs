//! Wires [`crate::Communicator`] to real sockets: one DEALER socket per
//! known broker (an explicit-identity-per-connection stand-in for the
//! original's single ROUTER-to-ROUTER connected socket, a legacy 0MQ 2.x
//! peer-addressing idiom that doesn't port cleanly to modern libzmq), one
//! SUB socket fed by every broker's backend PUB, and an inproc PAIR socket
//! connecting this communicator thread to the render loop running on the
//! caller's thread.

use std::collections::HashMap;
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

use rendermq_config::BrokerEndpoints;
use rendermq_proto::wire::{decode_job, encode_job};
use rendermq_proto::Job;
use rendermq_transport::command;

use crate::{Action, Communicator};

#[derive(Debug, thiserror::Error)]
pub enum WorkerRunError {
    #[error(transparent)]
    Zmq(#[from] zmq::Error),
    #[error("undecodable job payload from broker")]
    BadJob,
}

fn pair_addr(worker_id: &str) -> String {
    format!("inproc://worker-{worker_id}")
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Runs the worker forever: requests a job, blocks until one arrives, runs
/// `handler` on it, reports the result, and repeats. `handler` is the
/// pluggable rendering step; this crate only supplies the scheduling
/// protocol around it.
pub fn run(
    worker_id: &str,
    brokers: &HashMap<String, BrokerEndpoints>,
    poll_timeout_ms: i64,
    broker_timeout_secs: i64,
    handler: impl Fn(Job) -> Job,
) -> Result<(), WorkerRunError> {
    let ctx = zmq::Context::new();

    let worker_pair = ctx.socket(zmq::PAIR)?;
    worker_pair.bind(&pair_addr(worker_id))?;

    let comm_ctx = ctx.clone();
    let comm_id = worker_id.to_string();
    let comm_brokers = brokers.clone();
    thread::spawn(move || {
        if let Err(err) = communicator_loop(&comm_ctx, &comm_id, &comm_brokers, poll_timeout_ms, broker_timeout_secs) {
            tracing::error!(%err, "worker communicator thread exited");
        }
    });

    loop {
        worker_pair.send(&b""[..], 0)?;
        let job_bytes = worker_pair.recv_bytes(0)?;
        let job = decode_job(&job_bytes).map_err(|_| WorkerRunError::BadJob)?;
        let result = handler(job);
        worker_pair.send(encode_job(&result), 0)?;
    }
}

fn communicator_loop(
    ctx: &zmq::Context,
    worker_id: &str,
    brokers: &HashMap<String, BrokerEndpoints>,
    poll_timeout_ms: i64,
    broker_timeout_secs: i64,
) -> Result<(), WorkerRunError> {
    let comm_pair = ctx.socket(zmq::PAIR)?;
    comm_pair.connect(&pair_addr(worker_id))?;

    let broker_sub = ctx.socket(zmq::SUB)?;
    broker_sub.set_subscribe(b"")?;

    let mut broker_sockets: HashMap<String, zmq::Socket> = HashMap::new();
    for (name, endpoints) in brokers {
        let dealer = ctx.socket(zmq::DEALER)?;
        dealer.set_identity(worker_id.as_bytes())?;
        dealer.connect(&endpoints.out_req)?;
        broker_sockets.insert(name.clone(), dealer);
        broker_sub.connect(&endpoints.out_sub)?;
    }

    let mut fsm = Communicator::new(broker_timeout_secs);

    loop {
        let names: Vec<&String> = broker_sockets.keys().collect();
        let mut items = Vec::with_capacity(2 + names.len());
        items.push(comm_pair.as_poll_item(zmq::POLLIN));
        items.push(broker_sub.as_poll_item(zmq::POLLIN));
        for name in &names {
            items.push(broker_sockets[*name].as_poll_item(zmq::POLLIN));
        }

        zmq::poll(&mut items, poll_timeout_ms)?;
        let now = now_secs();

        apply_action(fsm.on_retry_timeout(now), &broker_sockets, &comm_pair)?;

        if items[0].is_readable() {
            let frame = comm_pair.recv_bytes(0)?;
            let action = if frame.is_empty() {
                fsm.request_job(now)
            } else {
                let result = decode_job(&frame).map_err(|_| WorkerRunError::BadJob)?;
                fsm.complete_job(result)
            };
            apply_action(action, &broker_sockets, &comm_pair)?;
        }

        if items[1].is_readable() {
            let frames = broker_sub.recv_multipart(0)?;
            if let [broker_id, _msg, priority, qsize] = frames.as_slice() {
                let broker_id = String::from_utf8_lossy(broker_id).into_owned();
                let priority = be_u32(priority) as i32;
                let qsize = be_u64(qsize) as i64;
                let action = fsm.on_announcement(broker_id, priority, qsize, now);
                apply_action(action, &broker_sockets, &comm_pair)?;
            }
        }

        for (i, name) in names.iter().enumerate() {
            if items[2 + i].is_readable() {
                let mut frames = broker_sockets[*name].recv_multipart(0)?;
                if frames.first().is_some_and(Vec::is_empty) {
                    frames.remove(0);
                }
                let Some(cmd) = frames.first() else { continue };
                let job = if cmd.as_slice() == command::JOB {
                    frames.get(1).map(|bytes| decode_job(bytes)).transpose().map_err(|_| WorkerRunError::BadJob)?
                } else {
                    None
                };
                let action = fsm.on_job_reply(name, job, now);
                apply_action(action, &broker_sockets, &comm_pair)?;
            }
        }
    }
}

fn apply_action(action: Action, broker_sockets: &HashMap<String, zmq::Socket>, comm_pair: &zmq::Socket) -> Result<(), WorkerRunError> {
    match action {
        Action::None => {}
        Action::SendGetJob(broker) => {
            if let Some(socket) = broker_sockets.get(&broker) {
                socket.send_multipart([&[][..], command::GET_JOB], 0)?;
            }
        }
        Action::DeliverJob(job) => {
            comm_pair.send(encode_job(&job), 0)?;
        }
        Action::SendResult(broker, job) => {
            if let Some(socket) = broker_sockets.get(&broker) {
                socket.send_multipart([&[][..], command::RESULT, &encode_job(&job)], 0)?;
            }
        }
    }
    Ok(())
}

fn be_u32(bytes: &[u8]) -> u32 {
    <[u8; 4]>::try_from(bytes).map(u32::from_be_bytes).unwrap_or(0)
}

fn be_u64(bytes: &[u8]) -> u64 {
    <[u8; 8]>::try_from(bytes).map(u64::from_be_bytes).unwrap_or(0)
}
