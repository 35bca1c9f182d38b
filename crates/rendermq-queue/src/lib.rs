//! Broker-side task queue: one [`Task`] per metatile, indexed by priority
//! (for picking the next job to dispatch), by metatile key (for
//! lookup/merge/erase), and by creation timestamp (for the zombie scan).

use std::collections::{BTreeMap, HashMap};

use rendermq_proto::{Job, MetatileKey, Status};

/// Priority assigned by the broker on insertion, keyed by the triggering
/// job's status.
pub fn priority_for(status: Status) -> i32 {
    match status {
        Status::RenderPrio => 150,
        Status::Render => 100,
        Status::Dirty => 50,
        Status::RenderBulk => 0,
        _ => 0,
    }
}

/// A client's interest in the result of a [`Task`]: its original (possibly
/// sub-metatile) job and the address to route the reply to.
#[derive(Debug, Clone)]
pub struct Subscriber {
    pub job: Job,
    pub client_addr: Vec<u8>,
}

/// One unit of dispatchable work: the metatile-aligned, format-unioned job,
/// its priority, and everyone waiting on the result.
///
/// `job.status` is always forced to `Render` (see [`TaskQueue::push`]), so
/// `bulk` tracks separately whether every subscriber merged into this task
/// so far asked for best-effort `RenderBulk` work — the moment a non-bulk
/// subscriber joins, the task loses its bulk exemption from zombie
/// resubmission.
#[derive(Debug, Clone)]
pub struct Task {
    pub job: Job,
    pub priority: i32,
    pub timestamp: i64,
    pub processed: bool,
    pub bulk: bool,
    pub subscribers: Vec<Subscriber>,
}

impl Task {
    pub fn key(&self) -> MetatileKey {
        self.job.metatile_key()
    }
}

#[derive(Default)]
pub struct TaskQueue {
    next_id: u64,
    tasks: HashMap<u64, Task>,
    by_key: HashMap<MetatileKey, u64>,
    // priority ascending; front_unprocessed reads from the high end.
    by_priority: BTreeMap<(i32, u64), u64>,
    // creation timestamp ascending.
    by_timestamp: BTreeMap<(i64, u64), u64>,
}

impl TaskQueue {
    pub fn new() -> TaskQueue {
        TaskQueue::default()
    }

    /// Rounds `tile` to its metatile base, forces its status to `Render`
    /// (a worker must always be told to render since some other client may
    /// be waiting on a full reply even if this particular push was bulk),
    /// and either inserts a new task or merges into an existing one at the
    /// same metatile key: priority becomes the max of old and new, and the
    /// format mask is OR-ed. Returns `true` iff a new task was inserted.
    pub fn push(&mut self, tile: Job, client_addr: Vec<u8>, priority: i32, now: i64) -> bool {
        let original = tile.clone();
        let mut meta = tile;
        let (bx, by) = meta.metatile_base();
        meta.x = bx;
        meta.y = by;
        meta.status = Status::Render;
        let key = meta.metatile_key();

        if let Some(&id) = self.by_key.get(&key) {
            let task = self.tasks.get_mut(&id).expect("by_key index out of sync");
            if priority > task.priority {
                self.by_priority.remove(&(task.priority, id));
                self.by_priority.insert((priority, id), id);
                task.priority = priority;
            }
            task.job.format |= original.format;
            if original.status != Status::RenderBulk {
                task.bulk = false;
            }
            task.subscribers.push(Subscriber {
                job: original,
                client_addr,
            });
            false
        } else {
            let id = self.next_id;
            self.next_id += 1;
            self.by_priority.insert((priority, id), id);
            self.by_timestamp.insert((now, id), id);
            self.by_key.insert(key, id);
            self.tasks.insert(
                id,
                Task {
                    job: meta,
                    priority,
                    timestamp: now,
                    processed: false,
                    bulk: original.status == Status::RenderBulk,
                    subscribers: vec![Subscriber {
                        job: original,
                        client_addr,
                    }],
                },
            );
            true
        }
    }

    /// The highest-priority task that isn't currently marked processed.
    pub fn front_unprocessed(&self) -> Option<&Task> {
        self.by_priority
            .iter()
            .rev()
            .map(|(_, id)| &self.tasks[id])
            .find(|task| !task.processed)
    }

    /// Marks the task at `key` processed, if it exists.
    pub fn set_processed(&mut self, key: &MetatileKey) {
        if let Some(task) = self.by_key.get(key).and_then(|id| self.tasks.get_mut(id)) {
            task.processed = true;
        }
    }

    /// Clears the processed flag (and refreshes the timestamp, so it isn't
    /// immediately resubmitted again) on every task that has been processed
    /// for at least `timeout` seconds and isn't a bulk job. Returns the keys
    /// resubmitted.
    pub fn resubmit_older_than(&mut self, timeout: i64, now: i64) -> Vec<MetatileKey> {
        let stale: Vec<u64> = self
            .by_timestamp
            .values()
            .copied()
            .filter(|id| {
                let task = &self.tasks[id];
                task.processed && !task.bulk && now - task.timestamp >= timeout
            })
            .collect();

        let mut resubmitted = Vec::with_capacity(stale.len());
        for id in stale {
            let task = self.tasks.get_mut(&id).unwrap();
            self.by_timestamp.remove(&(task.timestamp, id));
            task.processed = false;
            task.timestamp = now;
            self.by_timestamp.insert((now, id), id);
            resubmitted.push(task.key());
        }
        resubmitted
    }

    /// Removes the task at `key` entirely, returning it.
    pub fn erase(&mut self, key: &MetatileKey) -> Option<Task> {
        let id = self.by_key.remove(key)?;
        let task = self.tasks.remove(&id)?;
        self.by_priority.remove(&(task.priority, id));
        self.by_timestamp.remove(&(task.timestamp, id));
        Some(task)
    }

    pub fn get(&self, key: &MetatileKey) -> Option<&Task> {
        self.by_key.get(key).map(|id| &self.tasks[id])
    }

    pub fn size(&self) -> usize {
        self.tasks.len()
    }

    pub fn count_unprocessed(&self) -> usize {
        self.tasks.values().filter(|t| !t.processed).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rendermq_proto::Format;

    fn job(x: i32, y: i32, status: Status, format: Format) -> Job {
        Job::new(status, x, y, 10, 1, "osm", format)
    }

    #[test]
    fn push_inserts_new_and_merges_same_metatile() {
        let mut q = TaskQueue::new();
        assert!(q.push(job(16, 24, Status::Render, Format::PNG), b"a".to_vec(), priority_for(Status::Render), 1000));
        assert!(!q.push(job(17, 25, Status::RenderPrio, Format::JPEG), b"b".to_vec(), priority_for(Status::RenderPrio), 1001));

        let key = job(16, 24, Status::Render, Format::PNG).metatile_key();
        let task = q.get(&key).unwrap();
        assert_eq!(task.priority, 150);
        assert_eq!(task.job.format, Format::PNG | Format::JPEG);
        assert_eq!(task.subscribers.len(), 2);
        assert_eq!(q.size(), 1);
    }

    #[test]
    fn front_unprocessed_picks_highest_priority() {
        let mut q = TaskQueue::new();
        q.push(job(0, 0, Status::Render, Format::PNG), b"a".to_vec(), 100, 1000);
        q.push(job(8, 0, Status::RenderPrio, Format::PNG), b"b".to_vec(), 150, 1000);

        let front = q.front_unprocessed().unwrap();
        assert_eq!(front.priority, 150);
    }

    #[test]
    fn processed_tasks_are_skipped_by_front_unprocessed() {
        let mut q = TaskQueue::new();
        q.push(job(0, 0, Status::Render, Format::PNG), b"a".to_vec(), 100, 1000);
        let key = job(0, 0, Status::Render, Format::PNG).metatile_key();
        q.set_processed(&key);
        assert!(q.front_unprocessed().is_none());
    }

    #[test]
    fn resubmit_older_than_clears_stale_processed_tasks_but_not_bulk() {
        let mut q = TaskQueue::new();
        q.push(job(0, 0, Status::Render, Format::PNG), b"a".to_vec(), 100, 1000);
        q.push(job(8, 0, Status::RenderBulk, Format::PNG), b"b".to_vec(), 0, 1000);

        let key_render = job(0, 0, Status::Render, Format::PNG).metatile_key();
        let key_bulk = job(8, 0, Status::RenderBulk, Format::PNG).metatile_key();
        q.set_processed(&key_render);
        q.set_processed(&key_bulk);

        let resubmitted = q.resubmit_older_than(300, 1400);
        assert_eq!(resubmitted, vec![key_render.clone()]);
        assert!(!q.get(&key_render).unwrap().processed);
        assert!(q.get(&key_bulk).unwrap().processed);
    }

    #[test]
    fn erase_removes_task_from_all_indexes() {
        let mut q = TaskQueue::new();
        q.push(job(0, 0, Status::Render, Format::PNG), b"a".to_vec(), 100, 1000);
        let key = job(0, 0, Status::Render, Format::PNG).metatile_key();
        assert!(q.erase(&key).is_some());
        assert_eq!(q.size(), 0);
        assert!(q.front_unprocessed().is_none());
    }
}
