use crate::{Format, METATILE};

/// What a [`Job`] asks a broker/worker to do with a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// No-op; never queued.
    Ignore,
    /// Render at normal priority.
    Render,
    /// Expire in storage (and, depending on policy, re-render).
    Dirty,
    /// Worker says the command completed successfully; reply carries data.
    Done,
    /// Reply says try again later.
    NotDone,
    /// Render at elevated priority.
    RenderPrio,
    /// Render at low priority; no reply is expected.
    RenderBulk,
    /// Metadata probe.
    Status,
}

/// A tile render job: the identity and state that flows between handler,
/// broker, and worker.
///
/// `PartialEq` and `Hash` are implemented by hand (see [`Job::metatile_key`])
/// to deliberately exclude `client_id`, `format`, and `status` — distinct
/// client requests for tiles in the same metatile must compare and hash
/// equal so that they coalesce into a single broker task.
#[derive(Debug, Clone)]
pub struct Job {
    pub status: Status,
    pub x: i32,
    pub y: i32,
    pub z: i32,
    /// Opaque client identifier, used only for reply routing.
    pub client_id: i64,
    pub style: String,
    pub format: Format,
    pub last_modified: i64,
    pub request_last_modified: i64,
    pub payload: Option<Vec<u8>>,
}

impl Job {
    pub fn new(status: Status, x: i32, y: i32, z: i32, client_id: i64, style: impl Into<String>, format: Format) -> Job {
        Job {
            status,
            x,
            y,
            z,
            client_id,
            style: style.into(),
            format,
            last_modified: 0,
            request_last_modified: 0,
            payload: None,
        }
    }

    /// Rounds `x`/`y` down to the nearest metatile boundary, as required by
    /// the routing/hashing/coalescing invariant: all tiles inside one
    /// metatile share routing identity.
    pub fn metatile_base(&self) -> (i32, i32) {
        (align_down(self.x), align_down(self.y))
    }

    /// The `(style, z, metatile-x, metatile-y)` tuple used for equality,
    /// hashing, consistent-hash routing, and task-queue keying.
    pub fn metatile_key(&self) -> MetatileKey {
        let (bx, by) = self.metatile_base();
        MetatileKey {
            style: self.style.clone(),
            z: self.z,
            x: bx,
            y: by,
        }
    }
}

fn align_down(v: i32) -> i32 {
    v & !(METATILE - 1)
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.metatile_key() == other.metatile_key()
    }
}
impl Eq for Job {}

impl std::hash::Hash for Job {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.metatile_key().hash(state);
    }
}

/// The coalescing/routing identity of a [`Job`]: style, zoom, and
/// metatile-aligned x/y. Two jobs with equal keys collapse into one task and
/// route to the same broker.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetatileKey {
    pub style: String,
    pub z: i32,
    pub x: i32,
    pub y: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(x: i32, y: i32, client_id: i64, format: Format) -> Job {
        Job::new(Status::Render, x, y, 10, client_id, "osm", format)
    }

    #[test]
    fn jobs_in_same_metatile_are_equal_regardless_of_client_or_format() {
        let a = job(16, 24, 1, Format::PNG);
        let b = job(17, 25, 2, Format::JPEG);
        assert_eq!(a, b);
        assert_eq!(a.metatile_key(), b.metatile_key());
    }

    #[test]
    fn jobs_in_different_metatiles_are_not_equal() {
        let a = job(16, 24, 1, Format::PNG);
        let b = job(24, 24, 1, Format::PNG);
        assert_ne!(a, b);
    }

    #[test]
    fn metatile_base_rounds_down_to_multiple_of_eight() {
        let j = job(19, 13, 1, Format::PNG);
        assert_eq!(j.metatile_base(), (16, 8));
    }
}
