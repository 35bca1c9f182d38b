//! Server side of the binary-star pair: a ROUTER frontend answering
//! expiry queries/updates, and a PUB/SUB pair exchanging FSM state with the
//! peer server. Grounded in `expiry_server::operator()`.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rendermq_proto::wire::decode_job;
use rendermq_transport::{recv_routed, send_routed};

use crate::{Event, ExpiryData, Fsm, FsmState};

#[derive(Debug, thiserror::Error)]
pub enum ExpiryRunError {
    #[error(transparent)]
    Transport(#[from] rendermq_transport::TransportError),
    #[error(transparent)]
    Zmq(#[from] zmq::Error),
    #[error("malformed job payload from client")]
    BadJob,
    #[error("peer sent an unrecognized fsm state {0}")]
    BadPeerState(u32),
    #[error("fatal fsm conflict with peer, shutting down")]
    FsmConflict,
}

/// Socket endpoints for one half of the binary-star pair.
pub struct ExpiryEndpoints {
    pub frontend: String,
    pub statepub: String,
    pub peer_statepub: String,
}

fn now_secs() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

/// Runs the expiry server reactor forever, starting as `initial` (`Primary`
/// or `Backup`) and negotiating active/passive status with the peer purely
/// through heartbeats.
pub fn run(initial: FsmState, endpoints: &ExpiryEndpoints, heartbeat_interval_secs: i64) -> Result<(), ExpiryRunError> {
    let ctx = zmq::Context::new();

    let frontend = ctx.socket(zmq::ROUTER)?;
    frontend.bind(&endpoints.frontend)?;

    let statepub = ctx.socket(zmq::PUB)?;
    statepub.bind(&endpoints.statepub)?;

    let statesub = ctx.socket(zmq::SUB)?;
    statesub.set_subscribe(b"")?;
    statesub.connect(&endpoints.peer_statepub)?;

    let mut fsm = Fsm::new(initial);
    let mut expired = ExpiryData::new();
    let heartbeat_period = Duration::from_secs(heartbeat_interval_secs.max(1) as u64);
    let mut next_heartbeat = now_secs() + heartbeat_period.as_secs() as i64;

    loop {
        let mut items = [frontend.as_poll_item(zmq::POLLIN), statesub.as_poll_item(zmq::POLLIN)];
        let wait_ms = ((next_heartbeat - now_secs()).max(0) * 1000) as i64;
        zmq::poll(&mut items, wait_ms)?;

        if items[0].is_readable() {
            handle_client_request(&mut fsm, &mut expired, &frontend, now_secs(), heartbeat_interval_secs)?;
        }

        if items[1].is_readable() {
            let frames = statesub.recv_multipart(0)?;
            let raw = frames.first().map(Vec::as_slice).unwrap_or(&[]);
            let value = <[u8; 4]>::try_from(raw).map(u32::from_be_bytes).unwrap_or(0);
            let event = peer_event_for(FsmState::from_u32(value).ok_or(ExpiryRunError::BadPeerState(value))?);
            if !fsm.event(event, now_secs(), heartbeat_interval_secs) {
                tracing::error!("fatal binary-star conflict with peer, shutting down");
                return Err(ExpiryRunError::FsmConflict);
            }
        }

        if now_secs() >= next_heartbeat {
            statepub.send(&(fsm.state() as u32).to_be_bytes()[..], 0)?;
            next_heartbeat += heartbeat_period.as_secs() as i64;
        }
    }
}

fn peer_event_for(state: FsmState) -> Event {
    match state {
        FsmState::Primary => Event::PeerPrimary,
        FsmState::Backup => Event::PeerBackup,
        FsmState::Active => Event::PeerActive,
        FsmState::Passive => Event::PeerPassive,
    }
}

fn handle_client_request(
    fsm: &mut Fsm,
    expired: &mut ExpiryData,
    frontend: &zmq::Socket,
    now: i64,
    heartbeat_interval_secs: i64,
) -> Result<(), ExpiryRunError> {
    if !fsm.event(Event::ClientRequest, now, heartbeat_interval_secs) {
        return Err(ExpiryRunError::FsmConflict);
    }

    let routed = recv_routed(frontend)?;
    let job_bytes = routed.parts.first().ok_or(ExpiryRunError::BadJob)?;
    let tile = decode_job(job_bytes).map_err(|_| ExpiryRunError::BadJob)?;

    let response = match routed.parts.get(1) {
        Some(value) => {
            let set_expired = value.first().copied().unwrap_or(0) != 0;
            if set_expired {
                expired.insert(&tile);
            } else {
                expired.erase(&tile);
            }
            true
        }
        None => expired.lookup(&tile),
    };

    send_routed(frontend, &routed.envelope, &[&[response as u8]])?;
    Ok(())
}
