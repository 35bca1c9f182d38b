//! Thin wrappers over [`zmq::Socket`] for the four socket roles the wire
//! protocols in spec §6 need: ROUTER request/reply with a routing envelope,
//! PUB, SUB, and a paired inproc socket. Reimplements the shape of the
//! original's `zstream`/`zstream_pbuf` stream-manipulator helpers as plain
//! methods returning `Result`, rather than operator overloading.

use std::time::Duration;

pub use zmq;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("0MQ error: {0}")]
    Zmq(#[from] zmq::Error),
    #[error("expected a routing envelope but got an empty or malformed multipart message")]
    MissingEnvelope,
    #[error("poll timed out")]
    Timeout,
}

/// A message received on a ROUTER socket: the sender's identity frame and
/// everything after the empty delimiter frame.
#[derive(Debug, Clone)]
pub struct RoutedMessage {
    pub envelope: Vec<u8>,
    pub parts: Vec<Vec<u8>>,
}

/// Receives one routed multipart message: `[identity, "", part...]`.
pub fn recv_routed(socket: &zmq::Socket) -> Result<RoutedMessage, TransportError> {
    let mut frames = socket.recv_multipart(0)?;
    if frames.len() < 2 {
        return Err(TransportError::MissingEnvelope);
    }
    let envelope = frames.remove(0);
    let delimiter = frames.remove(0);
    if !delimiter.is_empty() {
        return Err(TransportError::MissingEnvelope);
    }
    Ok(RoutedMessage {
        envelope,
        parts: frames,
    })
}

/// Sends a routed multipart message: `[envelope, "", part...]`.
pub fn send_routed(socket: &zmq::Socket, envelope: &[u8], parts: &[&[u8]]) -> Result<(), TransportError> {
    let mut frames: Vec<&[u8]> = Vec::with_capacity(parts.len() + 2);
    frames.push(envelope);
    frames.push(&[]);
    frames.extend_from_slice(parts);
    socket.send_multipart(frames, 0)?;
    Ok(())
}

/// Publishes a multipart message on a PUB socket (no envelope).
pub fn publish(socket: &zmq::Socket, parts: &[&[u8]]) -> Result<(), TransportError> {
    socket.send_multipart(parts, 0)?;
    Ok(())
}

/// Receives a multipart message on a SUB socket.
pub fn recv_published(socket: &zmq::Socket) -> Result<Vec<Vec<u8>>, TransportError> {
    Ok(socket.recv_multipart(0)?)
}

/// Polls `sockets` for readability, returning the number ready or
/// [`TransportError::Timeout`] if none became ready within `timeout`.
pub fn poll_readable(sockets: &[&zmq::Socket], timeout: Duration) -> Result<Vec<bool>, TransportError> {
    let mut items: Vec<zmq::PollItem> = sockets.iter().map(|s| s.as_poll_item(zmq::POLLIN)).collect();
    let ready = zmq::poll(&mut items, timeout.as_millis() as i64)?;
    if ready == 0 {
        return Err(TransportError::Timeout);
    }
    Ok(items.iter().map(|item| item.is_readable()).collect())
}

/// Command/status literals exchanged on the front/back request sockets
/// (spec §6 "Wire protocols"), as raw bytes for multipart frames.
pub mod command {
    pub const GET_JOB: &[u8] = b"GET_JOB";
    pub const RESULT: &[u8] = b"RESULT";
    pub const JOB: &[u8] = b"JOB";
    pub const NO_JOBS: &[u8] = b"NO JOBS";
    pub const JOBS_AVAILABLE: &[u8] = b"JOBS AVAILABLE";

    pub const CLEAR_TASK_QUEUE: &[u8] = b"CLEAR TASK QUEUE";
    pub const RESUBMIT_ZOMBIE_TASKS: &[u8] = b"RESUBMIT ZOMBIE TASKS";
    pub const STATS: &[u8] = b"STATS";
    pub const HEARTBEAT: &[u8] = b"HEARTBEAT";
    pub const SHUTDOWN: &[u8] = b"SHUTDOWN";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routed_roundtrip_over_an_inproc_pair() {
        let ctx = zmq::Context::new();
        let router = ctx.socket(zmq::ROUTER).unwrap();
        router.bind("inproc://transport-test").unwrap();
        let dealer = ctx.socket(zmq::DEALER).unwrap();
        dealer.set_identity(b"worker-1").unwrap();
        dealer.connect("inproc://transport-test").unwrap();

        dealer.send_multipart([&[][..], command::GET_JOB], 0).unwrap();

        let routed = recv_routed(&router).unwrap();
        assert_eq!(routed.envelope, b"worker-1");
        assert_eq!(routed.parts, vec![command::GET_JOB.to_vec()]);

        send_routed(&router, &routed.envelope, &[command::NO_JOBS]).unwrap();
        let reply = dealer.recv_multipart(0).unwrap();
        assert_eq!(reply, vec![Vec::new(), command::NO_JOBS.to_vec()]);
    }
}
