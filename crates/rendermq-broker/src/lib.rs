//! Broker reactor core: the event handlers driving a single broker's task
//! queue in response to frontend (handler), backend (worker) and monitor
//! traffic. Kept free of any socket I/O so the decision logic can be tested
//! directly; [`reactor`] wires these handlers to real 0MQ sockets.

pub mod reactor;

use rendermq_proto::{metatile, Job, Status};
use rendermq_queue::{priority_for, Task, TaskQueue};

/// What to send back to a worker that asked for a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerReply {
    Job(Vec<u8>),
    NoJobs,
}

/// A reply routed to one waiting client, keyed by its original request
/// address.
#[derive(Debug, Clone)]
pub struct ClientReply {
    pub client_addr: Vec<u8>,
    pub job: Job,
}

/// Broker-owned queue plus the bookkeeping the reactor needs to decide when
/// to publish availability and when a task has gone stale.
pub struct Broker {
    pub queue: TaskQueue,
    pub zombie_time_secs: i64,
}

impl Broker {
    pub fn new(zombie_time_secs: i64) -> Broker {
        Broker {
            queue: TaskQueue::new(),
            zombie_time_secs,
        }
    }

    /// Handles a tile request arriving on the frontend socket. Returns
    /// `true` if availability should be announced on the backend PUB socket:
    /// either nothing was queued before, or the new task outranks whatever
    /// was previously at the front.
    pub fn handle_client_job(&mut self, tile: Job, client_addr: Vec<u8>, now: i64) -> bool {
        let previous_front_priority = self.queue.front_unprocessed().map(|t| t.priority);
        let priority = priority_for(tile.status);
        self.queue.push(tile, client_addr, priority, now);

        match previous_front_priority {
            None => true,
            Some(prev) => priority > prev,
        }
    }

    /// Handles `GET_JOB` from a worker: hands out the highest-priority
    /// unprocessed task, encoded for the wire, and marks it processed so a
    /// second worker doesn't also pick it up before the result comes back.
    pub fn handle_get_job(&mut self) -> WorkerReply {
        match self.queue.front_unprocessed() {
            Some(task) => {
                let key = task.key();
                let bytes = rendermq_proto::wire::encode_job(&task.job);
                self.queue.set_processed(&key);
                WorkerReply::Job(bytes)
            }
            None => WorkerReply::NoJobs,
        }
    }

    /// Handles a worker's `RESULT`: slices the packed metatile for every
    /// waiting client and erases the task. `Dirty` and `RenderBulk` requests
    /// never wanted a reply, so they're silently dropped here, matching the
    /// original's dispatch. The task is erased regardless of whether any
    /// client gets a reply.
    pub fn handle_result(&mut self, worker_tile: &Job, metatile_bytes: &[u8]) -> Vec<ClientReply> {
        let key = worker_tile.metatile_key();
        let Some(task) = self.queue.erase(&key) else {
            return Vec::new();
        };
        build_client_replies(&task, worker_tile, metatile_bytes)
    }

    /// Scans for tasks that have been `processed` for longer than
    /// `zombie_time_secs` without a matching `RESULT` and makes them
    /// dispatchable again. Bulk-origin tasks are exempt (see
    /// [`rendermq_queue::Task::bulk`]).
    pub fn resubmit_zombies(&mut self, now: i64) -> usize {
        self.queue.resubmit_older_than(self.zombie_time_secs, now).len()
    }

    pub fn clear(&mut self) {
        self.queue = TaskQueue::new();
    }

    /// `STATS` monitor reply: `key=value` lines, one queue-size snapshot per
    /// line, `highest_priority=-1` when the queue is empty.
    pub fn stats(&self) -> String {
        let highest_priority = self.queue.front_unprocessed().map(|t| t.priority).unwrap_or(-1);
        format!(
            "num_tasks={} num_unprocessed={} highest_priority={}",
            self.queue.size(),
            self.queue.count_unprocessed(),
            highest_priority,
        )
    }
}

fn build_client_replies(task: &Task, worker_tile: &Job, metatile_bytes: &[u8]) -> Vec<ClientReply> {
    let mut replies = Vec::with_capacity(task.subscribers.len());
    for subscriber in &task.subscribers {
        if matches!(subscriber.job.status, Status::Dirty | Status::RenderBulk) {
            continue;
        }

        let mut reply = subscriber.job.clone();
        reply.status = worker_tile.status;
        reply.last_modified = worker_tile.last_modified;
        reply.payload = if worker_tile.status == Status::NotDone {
            None
        } else {
            slice_for_subscriber(&subscriber.job, metatile_bytes)
        };

        replies.push(ClientReply {
            client_addr: subscriber.client_addr.clone(),
            job: reply,
        });
    }
    replies
}

fn slice_for_subscriber(job: &Job, metatile_bytes: &[u8]) -> Option<Vec<u8>> {
    metatile::slice(metatile_bytes, job.x, job.y, job.format).ok().map(<[u8]>::to_vec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rendermq_proto::metatile::{pack, Section};
    use rendermq_proto::Format;

    fn job(status: Status, x: i32, y: i32, client_id: i64) -> Job {
        Job::new(status, x, y, 10, client_id, "osm", Format::PNG)
    }

    #[test]
    fn first_push_always_announces_availability() {
        let mut broker = Broker::new(300);
        let announce = broker.handle_client_job(job(Status::Render, 0, 0, 1), b"client-a".to_vec(), 1000);
        assert!(announce);
    }

    #[test]
    fn lower_priority_merge_does_not_announce() {
        let mut broker = Broker::new(300);
        broker.handle_client_job(job(Status::RenderPrio, 0, 0, 1), b"a".to_vec(), 1000);
        let announce = broker.handle_client_job(job(Status::Dirty, 0, 0, 2), b"b".to_vec(), 1001);
        assert!(!announce);
    }

    #[test]
    fn higher_priority_merge_announces_again() {
        let mut broker = Broker::new(300);
        broker.handle_client_job(job(Status::Dirty, 8, 0, 1), b"a".to_vec(), 1000);
        broker.handle_client_job(job(Status::Render, 16, 0, 2), b"b".to_vec(), 1000);
        let announce = broker.handle_client_job(job(Status::RenderPrio, 8, 0, 3), b"c".to_vec(), 1001);
        assert!(announce, "task at (8,0) now outranks the still-unprocessed (16,0) task");
    }

    #[test]
    fn get_job_marks_processed_and_reports_empty_queue() {
        let mut broker = Broker::new(300);
        assert_eq!(broker.handle_get_job(), WorkerReply::NoJobs);

        broker.handle_client_job(job(Status::Render, 0, 0, 1), b"a".to_vec(), 1000);
        match broker.handle_get_job() {
            WorkerReply::Job(_) => {}
            WorkerReply::NoJobs => panic!("expected a job"),
        }
        assert_eq!(broker.handle_get_job(), WorkerReply::NoJobs);
    }

    #[test]
    fn result_delivers_sliced_tiles_and_skips_dirty_and_bulk() {
        let mut broker = Broker::new(300);
        broker.handle_client_job(job(Status::Render, 0, 0, 1), b"render-client".to_vec(), 1000);
        broker.handle_client_job(job(Status::Dirty, 0, 0, 2), b"dirty-client".to_vec(), 1000);
        broker.handle_client_job(job(Status::RenderBulk, 0, 0, 3), b"bulk-client".to_vec(), 1000);
        broker.handle_get_job();

        let mut section = Section::new(Format::PNG);
        section.set(0, 0, vec![1, 2, 3]);
        let metatile_bytes = pack(0, 0, 10, &[section]);

        let mut worker_tile = job(Status::Done, 0, 0, 0);
        worker_tile.last_modified = 42;

        let replies = broker.handle_result(&worker_tile, &metatile_bytes);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].client_addr, b"render-client");
        assert_eq!(replies[0].job.payload, Some(vec![1, 2, 3]));
        assert_eq!(replies[0].job.last_modified, 42);
        assert!(broker.queue.get(&worker_tile.metatile_key()).is_none());
    }

    #[test]
    fn not_done_result_carries_no_payload() {
        let mut broker = Broker::new(300);
        broker.handle_client_job(job(Status::Render, 0, 0, 1), b"a".to_vec(), 1000);
        broker.handle_get_job();

        let worker_tile = job(Status::NotDone, 0, 0, 0);
        let replies = broker.handle_result(&worker_tile, &[]);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].job.payload, None);
        assert_eq!(replies[0].job.status, Status::NotDone);
    }

    #[test]
    fn resubmit_zombies_ignores_bulk_tasks() {
        let mut broker = Broker::new(300);
        broker.handle_client_job(job(Status::Render, 0, 0, 1), b"a".to_vec(), 1000);
        broker.handle_client_job(job(Status::RenderBulk, 8, 0, 2), b"b".to_vec(), 1000);
        broker.handle_get_job();
        broker.handle_get_job();

        let resubmitted = broker.resubmit_zombies(1400);
        assert_eq!(resubmitted, 1);
    }

    #[test]
    fn stats_reports_minus_one_priority_when_empty() {
        let broker = Broker::new(300);
        assert_eq!(broker.stats(), "num_tasks=0 num_unprocessed=0 highest_priority=-1");
    }

    #[test]
    fn stats_reports_highest_priority() {
        let mut broker = Broker::new(300);
        broker.handle_client_job(job(Status::RenderPrio, 0, 0, 1), b"a".to_vec(), 1000);
        assert_eq!(broker.stats(), "num_tasks=1 num_unprocessed=1 highest_priority=150");
    }

    #[test]
    fn clear_empties_the_queue() {
        let mut broker = Broker::new(300);
        broker.handle_client_job(job(Status::Render, 0, 0, 1), b"a".to_vec(), 1000);
        broker.clear();
        assert_eq!(broker.queue.size(), 0);
    }
}
