//! Wires [`crate::Broker`] to real 0MQ sockets: a frontend ROUTER/PUB pair
//! facing handlers, a backend ROUTER/PUB pair facing workers, and a monitor
//! REP socket for control commands. A background thread turns the
//! heartbeat/zombie-resubmit timers into messages sent to the broker's own
//! monitor socket over `inproc://`, mirroring the original's `task_monitor`.

use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rendermq_config::BrokerEndpoints;
use rendermq_proto::wire::{decode_job, encode_job};
use rendermq_transport::{command, recv_routed, send_routed};

use crate::Broker;

#[derive(Debug, thiserror::Error)]
pub enum BrokerRunError {
    #[error(transparent)]
    Transport(#[from] rendermq_transport::TransportError),
    #[error(transparent)]
    Zmq(#[from] zmq::Error),
    #[error("malformed job payload from {0}")]
    BadJob(&'static str),
}

fn monitor_inproc_addr(broker_name: &str) -> String {
    format!("inproc://monitor-{broker_name}")
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Spawns the heartbeat/zombie-resubmit timer thread and runs the broker
/// reactor loop on the calling thread until a `SHUTDOWN` command arrives on
/// the monitor socket.
pub fn run(
    broker_name: &str,
    endpoints: &BrokerEndpoints,
    heartbeat_interval_secs: i64,
    resubmit_interval_secs: i64,
    zombie_time_secs: i64,
) -> Result<(), BrokerRunError> {
    let ctx = zmq::Context::new();

    let frontend_rep = ctx.socket(zmq::ROUTER)?;
    frontend_rep.set_identity(broker_name.as_bytes())?;
    frontend_rep.bind(&endpoints.in_req)?;

    let frontend_pub = ctx.socket(zmq::PUB)?;
    frontend_pub.bind(&endpoints.in_sub)?;

    let backend_rep = ctx.socket(zmq::ROUTER)?;
    backend_rep.set_identity(broker_name.as_bytes())?;
    backend_rep.bind(&endpoints.out_req)?;

    let backend_pub = ctx.socket(zmq::PUB)?;
    backend_pub.bind(&endpoints.out_sub)?;

    let monitor = ctx.socket(zmq::REP)?;
    monitor.bind(&endpoints.monitor)?;
    let inproc_addr = monitor_inproc_addr(broker_name);
    monitor.bind(&inproc_addr)?;

    let timer_ctx = ctx.clone();
    let timer_name = broker_name.to_string();
    let timer_handle = thread::spawn(move || {
        timer_loop(&timer_ctx, &timer_name, heartbeat_interval_secs, resubmit_interval_secs);
    });

    let mut broker = Broker::new(zombie_time_secs);
    let result = reactor_loop(&mut broker, &frontend_rep, &frontend_pub, &backend_rep, &backend_pub, &monitor, broker_name);

    // Unblock the timer thread's own connect-and-send loop by giving it a
    // last tick; it exits on its own once REQ send fails against a torn-down
    // context, so we only need to wait for it here.
    let _ = timer_handle.join();
    result
}

/// Converts the heartbeat and zombie-resubmit timer expiries into monitor
/// commands on one thread, the way `tile_broker_impl.cpp`'s `task_monitor`
/// does: two independent countdowns, sleeping for whichever fires next so
/// both ticks stay on their own configured period.
fn timer_loop(ctx: &zmq::Context, broker_name: &str, heartbeat_interval_secs: i64, resubmit_interval_secs: i64) {
    let Ok(socket) = ctx.socket(zmq::REQ) else { return };
    if socket.connect(&monitor_inproc_addr(broker_name)).is_err() {
        return;
    }
    let heartbeat_period = heartbeat_interval_secs.max(1);
    let resubmit_period = resubmit_interval_secs.max(1);

    let mut next_heartbeat = 0;
    let mut next_resubmit = resubmit_period;
    loop {
        if next_heartbeat == 0 {
            if socket.send(command::HEARTBEAT, 0).is_err() {
                return;
            }
            if socket.recv_bytes(0).is_err() {
                return;
            }
            next_heartbeat = heartbeat_period;
        }

        if next_resubmit == 0 {
            if socket.send(command::RESUBMIT_ZOMBIE_TASKS, 0).is_err() {
                return;
            }
            if socket.recv_bytes(0).is_err() {
                return;
            }
            next_resubmit = resubmit_period;
        }

        let sleep_interval = next_heartbeat.min(next_resubmit);
        next_heartbeat -= sleep_interval;
        next_resubmit -= sleep_interval;
        thread::sleep(Duration::from_secs(sleep_interval as u64));
    }
}

#[allow(clippy::too_many_arguments)]
fn reactor_loop(
    broker: &mut Broker,
    frontend_rep: &zmq::Socket,
    frontend_pub: &zmq::Socket,
    backend_rep: &zmq::Socket,
    backend_pub: &zmq::Socket,
    monitor: &zmq::Socket,
    broker_name: &str,
) -> Result<(), BrokerRunError> {
    loop {
        let mut items = [
            backend_rep.as_poll_item(zmq::POLLIN),
            frontend_rep.as_poll_item(zmq::POLLIN),
            monitor.as_poll_item(zmq::POLLIN),
        ];
        zmq::poll(&mut items, -1)?;

        if items[0].is_readable() {
            handle_backend(broker, backend_rep, frontend_rep)?;
        }
        if items[1].is_readable() {
            handle_frontend(broker, frontend_rep, backend_pub, backend_rep, now_secs())?;
        }
        if items[2].is_readable() {
            let shutdown = handle_monitor(broker, monitor, frontend_pub, backend_pub, frontend_rep, broker_name)?;
            if shutdown {
                tracing::info!(queue_size = broker.queue.size(), "broker shutting down");
                return Ok(());
            }
        }
    }
}

fn handle_backend(broker: &mut Broker, backend_rep: &zmq::Socket, frontend_rep: &zmq::Socket) -> Result<(), BrokerRunError> {
    let routed = recv_routed(backend_rep)?;
    let Some(cmd) = routed.parts.first() else {
        return Ok(());
    };

    if cmd.as_slice() == command::GET_JOB {
        match broker.handle_get_job() {
            crate::WorkerReply::Job(bytes) => send_routed(backend_rep, &routed.envelope, &[command::JOB, &bytes])?,
            crate::WorkerReply::NoJobs => send_routed(backend_rep, &routed.envelope, &[command::NO_JOBS])?,
        }
    } else if cmd.as_slice() == command::RESULT {
        let job_bytes = routed.parts.get(1).ok_or(BrokerRunError::BadJob("missing job frame"))?;
        let metatile_bytes = routed.parts.get(2).map(Vec::as_slice).unwrap_or(&[]);
        let worker_tile = decode_job(job_bytes).map_err(|_| BrokerRunError::BadJob("undecodable job"))?;
        for reply in broker.handle_result(&worker_tile, metatile_bytes) {
            let encoded = encode_job(&reply.job);
            send_routed(frontend_rep, &reply.client_addr, &[&encoded])?;
        }
    }
    Ok(())
}

fn handle_frontend(
    broker: &mut Broker,
    frontend_rep: &zmq::Socket,
    backend_pub: &zmq::Socket,
    backend_rep: &zmq::Socket,
    now: i64,
) -> Result<(), BrokerRunError> {
    let routed = recv_routed(frontend_rep)?;
    let job_bytes = routed.parts.first().ok_or(BrokerRunError::BadJob("missing job frame"))?;
    let tile = decode_job(job_bytes).map_err(|_| BrokerRunError::BadJob("undecodable job"))?;

    let priority = rendermq_queue::priority_for(tile.status);
    let announce = broker.handle_client_job(tile, routed.envelope.clone(), now);
    if announce {
        if let Some(task) = broker.queue.front_unprocessed() {
            rendermq_transport::publish(
                backend_pub,
                &[
                    &backend_rep.get_identity()?,
                    command::JOBS_AVAILABLE,
                    &(task.priority.max(priority) as u32).to_be_bytes(),
                    &(broker.queue.count_unprocessed() as u64).to_be_bytes(),
                ],
            )?;
        }
    }
    Ok(())
}

fn handle_monitor(
    broker: &mut Broker,
    monitor: &zmq::Socket,
    frontend_pub: &zmq::Socket,
    backend_pub: &zmq::Socket,
    frontend_rep: &zmq::Socket,
    broker_name: &str,
) -> Result<bool, BrokerRunError> {
    let cmd = monitor.recv_bytes(0)?;

    if cmd == command::CLEAR_TASK_QUEUE {
        broker.clear();
        monitor.send(&b"OK"[..], 0)?;
    } else if cmd == command::RESUBMIT_ZOMBIE_TASKS {
        let n = broker.resubmit_zombies(now_secs());
        monitor.send(format!("resubmitted={n}").as_bytes(), 0)?;
    } else if cmd == command::STATS {
        monitor.send(broker.stats().as_bytes(), 0)?;
    } else if cmd == command::HEARTBEAT {
        rendermq_transport::publish(
            frontend_pub,
            &[
                &frontend_rep.get_identity()?,
                &(broker.queue.count_unprocessed() as u64).to_be_bytes(),
            ],
        )?;
        if let Some(task) = broker.queue.front_unprocessed() {
            rendermq_transport::publish(
                backend_pub,
                &[
                    broker_name.as_bytes(),
                    command::JOBS_AVAILABLE,
                    &(task.priority as u32).to_be_bytes(),
                    &(broker.queue.count_unprocessed() as u64).to_be_bytes(),
                ],
            )?;
        }
        monitor.send(&b"OK"[..], 0)?;
    } else if cmd == command::SHUTDOWN {
        monitor.send(&b"OK"[..], 0)?;
        return Ok(true);
    } else {
        monitor.send(&b"UNKNOWN"[..], 0)?;
    }
    Ok(false)
}
