//! The pure decision table driving step 4 of the handler pipeline, grounded
//! in `tile_handler.cpp::handle_response_from_storage`. Kept free of I/O so
//! every branch can be exercised directly.

use rendermq_proto::Status;

/// What storage found for a tile, after step 3 of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageResult {
    Fresh,
    Stale,
    Missing,
}

/// The three handler-runner queue-length thresholds, `stale < satisfy < max`.
#[derive(Debug, Clone, Copy)]
pub struct QueueThresholds {
    pub stale: usize,
    pub satisfy: usize,
    pub max: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    ReplyWithData,
    Overloaded503,
    Accepted202EnqueueBulk,
    ReplyStaleData,
    ReplyStaleDataEnqueueBulk,
    EnqueueRenderAwaitResult,
    StatusPresent,
    StatusDirty,
    StatusNotFound404,
}

/// Evaluates the admission table for a non-status-query request. `request`
/// distinguishes `Dirty`/render-class requests so a status query never
/// reaches this path (see [`decide_status_query`] instead).
pub fn decide(
    result: StorageResult,
    queue_len: usize,
    thresholds: QueueThresholds,
    stale_render_background: bool,
) -> Admission {
    if result == StorageResult::Fresh {
        return Admission::ReplyWithData;
    }

    if queue_len >= thresholds.max {
        return Admission::Overloaded503;
    }

    if result == StorageResult::Missing && queue_len >= thresholds.satisfy {
        return Admission::Accepted202EnqueueBulk;
    }

    if result == StorageResult::Stale {
        if queue_len >= thresholds.stale {
            return Admission::ReplyStaleData;
        }
        if stale_render_background {
            return Admission::ReplyStaleDataEnqueueBulk;
        }
    }

    Admission::EnqueueRenderAwaitResult
}

/// Evaluates the `/status` suffix's own decision table, independent of the
/// queue — it only ever reports what storage currently holds.
pub fn decide_status_query(result: StorageResult, dirty: bool) -> Admission {
    if dirty {
        return Admission::StatusDirty;
    }
    match result {
        StorageResult::Fresh | StorageResult::Stale => Admission::StatusPresent,
        StorageResult::Missing => Admission::StatusNotFound404,
    }
}

/// Maps a worker's reply status to the [`StorageResult`] step 3 would have
/// produced, used when the handler already has an authoritative storage
/// lookup in hand (e.g. immediately after an initial `get`).
pub fn storage_result_for(status: Status) -> StorageResult {
    match status {
        Status::Done => StorageResult::Fresh,
        Status::Ignore => StorageResult::Stale,
        _ => StorageResult::Missing,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds() -> QueueThresholds {
        QueueThresholds { stale: 10, satisfy: 20, max: 30 }
    }

    #[test]
    fn fresh_data_always_replies_regardless_of_queue() {
        assert_eq!(decide(StorageResult::Fresh, 1000, thresholds(), false), Admission::ReplyWithData);
    }

    #[test]
    fn overloaded_queue_rejects_stale_or_missing() {
        assert_eq!(decide(StorageResult::Stale, 30, thresholds(), false), Admission::Overloaded503);
        assert_eq!(decide(StorageResult::Missing, 30, thresholds(), false), Admission::Overloaded503);
    }

    #[test]
    fn missing_above_satisfy_is_accepted() {
        assert_eq!(decide(StorageResult::Missing, 25, thresholds(), false), Admission::Accepted202EnqueueBulk);
    }

    #[test]
    fn stale_above_stale_threshold_replies_without_render() {
        assert_eq!(decide(StorageResult::Stale, 15, thresholds(), false), Admission::ReplyStaleData);
    }

    #[test]
    fn stale_below_threshold_with_background_policy_replies_and_enqueues() {
        assert_eq!(decide(StorageResult::Stale, 5, thresholds(), true), Admission::ReplyStaleDataEnqueueBulk);
    }

    #[test]
    fn stale_below_threshold_without_background_policy_awaits_render() {
        assert_eq!(decide(StorageResult::Stale, 5, thresholds(), false), Admission::EnqueueRenderAwaitResult);
    }

    #[test]
    fn missing_below_satisfy_awaits_render() {
        assert_eq!(decide(StorageResult::Missing, 5, thresholds(), false), Admission::EnqueueRenderAwaitResult);
    }

    #[test]
    fn status_query_reports_presence_dirty_or_404() {
        assert_eq!(decide_status_query(StorageResult::Fresh, false), Admission::StatusPresent);
        assert_eq!(decide_status_query(StorageResult::Stale, true), Admission::StatusDirty);
        assert_eq!(decide_status_query(StorageResult::Missing, false), Admission::StatusNotFound404);
    }
}
