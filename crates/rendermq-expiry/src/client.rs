//! Client side of the binary-star pair: a REQ socket connected to whichever
//! of `primary`/`backup` currently answers, failing over and settling after
//! a timeout. Grounded in `expiry_service::request_with_failover`.

use std::thread;
use std::time::Duration;

use rendermq_proto::wire::encode_job;
use rendermq_proto::Job;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Zmq(#[from] zmq::Error),
}

/// Queries and updates expiry state over 0MQ, reconnecting to the other
/// server in the pair whenever the current one stops answering.
pub struct ExpiryClient {
    ctx: zmq::Context,
    servers: [String; 2],
    current: usize,
    socket: zmq::Socket,
    request_timeout_ms: i64,
    settle_time: Duration,
}

impl ExpiryClient {
    pub fn new(ctx: zmq::Context, primary: String, backup: String, request_timeout_ms: i64, settle_time: Duration) -> Result<ExpiryClient, ClientError> {
        let socket = ctx.socket(zmq::REQ)?;
        socket.connect(&primary)?;
        Ok(ExpiryClient {
            ctx,
            servers: [primary, backup],
            current: 0,
            socket,
            request_timeout_ms,
            settle_time,
        })
    }

    pub fn is_expired(&mut self, tile: &Job) -> Result<bool, ClientError> {
        self.request_with_failover(&encode_job(tile), None)
    }

    pub fn set_expired(&mut self, tile: &Job, expired: bool) -> Result<bool, ClientError> {
        self.request_with_failover(&encode_job(tile), Some(expired))
    }

    fn request_with_failover(&mut self, job_bytes: &[u8], value: Option<bool>) -> Result<bool, ClientError> {
        self.send(job_bytes, value)?;
        loop {
            let mut items = [self.socket.as_poll_item(zmq::POLLIN)];
            zmq::poll(&mut items, self.request_timeout_ms)?;
            if items[0].is_readable() {
                let reply = self.socket.recv_bytes(0)?;
                return Ok(reply.first().is_some_and(|b| *b != 0));
            }
            self.failover()?;
            self.send(job_bytes, value)?;
        }
    }

    fn send(&self, job_bytes: &[u8], value: Option<bool>) -> Result<(), ClientError> {
        match value {
            None => self.socket.send(job_bytes, 0)?,
            Some(v) => self.socket.send_multipart([job_bytes, &[v as u8]], 0)?,
        }
        Ok(())
    }

    fn failover(&mut self) -> Result<(), ClientError> {
        self.current = (self.current + 1) % 2;
        thread::sleep(self.settle_time);
        self.socket = self.ctx.socket(zmq::REQ)?;
        self.socket.connect(&self.servers[self.current])?;
        Ok(())
    }
}
