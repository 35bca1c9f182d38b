//! Ties path parsing, style rules, storage, and the admission decision
//! together into the five-step request pipeline, grounded in
//! `tile_handler.cpp`'s `handle_request_from_mongrel` /
//! `handle_response_from_storage` / `reply_with_tile`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use rendermq_proto::{Job, Status};

use crate::admission::{decide, decide_status_query, storage_result_for, Admission, QueueThresholds, StorageResult};
use crate::date::{format_http_date, is_newer_than_cached};
use crate::path::{parse_path, PathParseError};
use crate::reactor::HandlerRunner;
use crate::storage::Storage;
use crate::style::StyleRules;

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    fn plain(status: u16) -> HttpResponse {
        HttpResponse { status, headers: Vec::new(), body: Vec::new() }
    }

    fn text(status: u16, body: impl Into<String>) -> HttpResponse {
        HttpResponse {
            status,
            headers: vec![("content-type".to_string(), "text/plain".to_string())],
            body: body.into().into_bytes(),
        }
    }
}

/// Tiles at `z > 10` whose content has stood for more than a year are
/// deemed unlikely to change soon, so they get a longer `max-age` than
/// fresher tiles of the same zoom. Matches `tile_handler.cpp`'s `old_tile`.
const OLD_TILE_MIN_ZOOM: i32 = 10;
const OLD_TILE_AGE_SECS: i64 = 31_536_000;

fn now_secs() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub thresholds: QueueThresholds,
    pub stale_render_background: bool,
    pub max_age_secs: i64,
    pub dirty_list: HashMap<String, Vec<String>>,
}

pub struct Pipeline {
    pub style_rules: StyleRules,
    pub storage: Arc<dyn Storage>,
    pub runner: HandlerRunner,
    pub config: PipelineConfig,
}

/// Parses the `[dirty]` section into a style's dependent styles, matching
/// `tile_handler_main.cpp`'s `dirty_list_from_conf`: each key is a style
/// name, each value a comma- or space-separated list of styles that also
/// composite this style's tiles and so must be expired alongside it.
pub fn dirty_list_from_config(config: &rendermq_config::Config) -> HashMap<String, Vec<String>> {
    config
        .section_entries("dirty")
        .map(|(style, deps)| {
            let deps = deps.split([',', ' ']).map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect();
            (style.to_string(), deps)
        })
        .collect()
}

impl Pipeline {
    pub async fn handle(&self, raw_path: &str, if_modified_since: Option<&str>) -> HttpResponse {
        let mut job = match parse_path(raw_path) {
            Ok(job) => job,
            Err(PathParseError::UnknownFormat(_)) | Err(PathParseError::Malformed) | Err(PathParseError::CoordOverflow) => {
                return HttpResponse::plain(404);
            }
        };

        if !self.style_rules.rewrite_and_check(&mut job) {
            return HttpResponse::plain(404);
        }

        if job.status == Status::Dirty {
            return self.handle_dirty(job).await;
        }
        if job.status == Status::Status {
            return self.handle_status_query(job).await;
        }

        self.handle_render(job, if_modified_since).await
    }

    async fn handle_dirty(&self, job: Job) -> HttpResponse {
        let storage = self.storage.clone();
        let primary = job.clone();
        let dependents: Vec<Job> = self
            .config
            .dirty_list
            .get(&job.style)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .map(|style| Job::new(Status::Dirty, job.x, job.y, job.z, job.client_id, style, job.format))
            .collect();

        let expire_result = tokio::task::spawn_blocking(move || {
            storage.expire(&primary)?;
            for dependent in &dependents {
                storage.expire(dependent)?;
            }
            Ok::<_, crate::storage::StorageError>(())
        })
        .await;

        if !matches!(expire_result, Ok(Ok(()))) {
            return HttpResponse::plain(500);
        }

        let mut bulk = job;
        bulk.status = Status::RenderBulk;
        let _ = self.runner.submit(bulk).await;
        HttpResponse::text(202, "submitted")
    }

    async fn handle_status_query(&self, job: Job) -> HttpResponse {
        let storage = self.storage.clone();
        let lookup = tokio::task::spawn_blocking(move || storage.get(&job)).await;
        match lookup {
            Ok(Ok(Some(found))) => {
                let admission = decide_status_query(if found.expired { StorageResult::Stale } else { StorageResult::Fresh }, found.expired);
                match admission {
                    Admission::StatusDirty => HttpResponse::text(200, "dirty"),
                    _ => HttpResponse::text(200, format_http_date(found.last_modified)),
                }
            }
            Ok(Ok(None)) => HttpResponse::plain(404),
            _ => HttpResponse::plain(500),
        }
    }

    async fn handle_render(&self, job: Job, if_modified_since: Option<&str>) -> HttpResponse {
        let storage = self.storage.clone();
        let lookup_job = job.clone();
        let lookup = match tokio::task::spawn_blocking(move || storage.get(&lookup_job)).await {
            Ok(Ok(lookup)) => lookup,
            _ => return HttpResponse::plain(500),
        };

        let storage_result = match &lookup {
            Some(found) if found.expired => StorageResult::Stale,
            Some(_) => StorageResult::Fresh,
            None => StorageResult::Missing,
        };

        let queue_len = self.runner.queue_length();
        let admission = decide(storage_result, queue_len, self.config.thresholds, self.config.stale_render_background);

        match admission {
            Admission::ReplyWithData => self.reply_with_bytes(job.z, job.format, &lookup.expect("fresh implies present"), if_modified_since),
            Admission::Overloaded503 => HttpResponse::plain(503),
            Admission::Accepted202EnqueueBulk => {
                let mut bulk = job;
                bulk.status = Status::RenderBulk;
                let _ = self.runner.submit(bulk).await;
                HttpResponse::text(202, "accepted")
            }
            Admission::ReplyStaleData => self.reply_with_bytes(job.z, job.format, &lookup.expect("stale implies present"), if_modified_since),
            Admission::ReplyStaleDataEnqueueBulk => {
                let response = self.reply_with_bytes(job.z, job.format, &lookup.expect("stale implies present"), if_modified_since);
                let mut bulk = job;
                bulk.status = Status::RenderBulk;
                let _ = self.runner.submit(bulk).await;
                response
            }
            Admission::EnqueueRenderAwaitResult => {
                let job_z = job.z;
                let mut render = job;
                render.status = Status::Render;
                match self.runner.submit(render).await {
                    Ok(result) => self.reply_with_job_result(job_z, &result, if_modified_since),
                    Err(_) => HttpResponse::plain(500),
                }
            }
            Admission::StatusPresent | Admission::StatusDirty | Admission::StatusNotFound404 => {
                unreachable!("status-query admissions only come from handle_status_query")
            }
        }
    }

    fn reply_with_bytes(&self, z: i32, format: rendermq_proto::Format, lookup: &crate::storage::Lookup, if_modified_since: Option<&str>) -> HttpResponse {
        self.conditional_response(z, format, lookup.last_modified, &lookup.bytes, if_modified_since)
    }

    fn reply_with_job_result(&self, z: i32, result: &Job, if_modified_since: Option<&str>) -> HttpResponse {
        match storage_result_for(result.status) {
            StorageResult::Fresh | StorageResult::Stale => match &result.payload {
                Some(bytes) => self.conditional_response(z, result.format, result.last_modified, bytes, if_modified_since),
                None => HttpResponse::plain(500),
            },
            StorageResult::Missing => HttpResponse::plain(500),
        }
    }

    fn conditional_response(&self, z: i32, format: rendermq_proto::Format, last_modified: i64, bytes: &[u8], if_modified_since: Option<&str>) -> HttpResponse {
        if !is_newer_than_cached(last_modified, if_modified_since) {
            return HttpResponse::plain(304);
        }
        let mime = format.mime_type().unwrap_or("application/octet-stream");
        let age = now_secs() - last_modified;
        let max_age = if z > OLD_TILE_MIN_ZOOM && age > OLD_TILE_AGE_SECS {
            OLD_TILE_AGE_SECS
        } else {
            self.config.max_age_secs
        };
        HttpResponse {
            status: 200,
            headers: vec![
                ("content-type".to_string(), mime.to_string()),
                ("last-modified".to_string(), format_http_date(last_modified)),
                ("expires".to_string(), format_http_date(last_modified + max_age)),
                ("cache-control".to_string(), format!("max-age={max_age}")),
            ],
            body: bytes.to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;
    use rendermq_proto::Format;

    fn pipeline(storage: Arc<InMemoryStorage>) -> Pipeline {
        Pipeline {
            style_rules: StyleRules::new(),
            storage,
            runner: HandlerRunner::spawn("test-handler".to_string(), HashMap::new(), 30, 3600, 0),
            config: PipelineConfig {
                thresholds: QueueThresholds { stale: 10, satisfy: 20, max: 30 },
                stale_render_background: false,
                max_age_secs: 3600,
                dirty_list: HashMap::new(),
            },
        }
    }

    #[test]
    fn dirty_list_from_config_splits_dependent_styles() {
        let config = rendermq_config::Config::from_str(
            "
[zmq]
broker_names =

[dirty]
osm = osm-retina, osm-labels
",
        )
        .unwrap();
        let dirty_list = dirty_list_from_config(&config);
        assert_eq!(dirty_list.get("osm").unwrap(), &vec!["osm-retina".to_string(), "osm-labels".to_string()]);
    }

    #[tokio::test]
    async fn malformed_path_is_404() {
        let response = pipeline(Arc::new(InMemoryStorage::new())).handle("/nope", None).await;
        assert_eq!(response.status, 404);
    }

    #[tokio::test]
    async fn fresh_storage_entry_replies_200() {
        let storage = Arc::new(InMemoryStorage::new());
        let job = Job::new(Status::Render, 1, 2, 10, 0, "osm", Format::PNG);
        storage.put(&job, vec![9, 9, 9], 1000);
        let response = pipeline(storage).handle("/osm/10/1/2.png", None).await;
        assert_eq!(response.status, 200);
        assert_eq!(response.body, vec![9, 9, 9]);
    }

    #[tokio::test]
    async fn old_tile_beyond_zoom_ten_gets_a_longer_max_age() {
        let storage = Arc::new(InMemoryStorage::new());
        let job = Job::new(Status::Render, 1, 2, 11, 0, "osm", Format::PNG);
        storage.put(&job, vec![1, 2, 3], 1);
        let response = pipeline(storage).handle("/osm/11/1/2.png", None).await;
        assert_eq!(response.status, 200);
        let cache_control = response.headers.iter().find(|(name, _)| name == "cache-control").unwrap();
        assert_eq!(cache_control.1, format!("max-age={OLD_TILE_AGE_SECS}"));
    }

    #[tokio::test]
    async fn recent_tile_at_zoom_ten_keeps_the_configured_max_age() {
        let storage = Arc::new(InMemoryStorage::new());
        let job = Job::new(Status::Render, 1, 2, 10, 0, "osm", Format::PNG);
        storage.put(&job, vec![1, 2, 3], now_secs());
        let response = pipeline(storage).handle("/osm/10/1/2.png", None).await;
        assert_eq!(response.status, 200);
        let cache_control = response.headers.iter().find(|(name, _)| name == "cache-control").unwrap();
        assert_eq!(cache_control.1, "max-age=3600");
    }

    #[tokio::test]
    async fn status_query_on_missing_tile_is_404() {
        let response = pipeline(Arc::new(InMemoryStorage::new())).handle("/osm/10/1/2.png/status", None).await;
        assert_eq!(response.status, 404);
    }

    #[tokio::test]
    async fn dirty_request_expires_and_responds_submitted() {
        let storage = Arc::new(InMemoryStorage::new());
        let job = Job::new(Status::Render, 1, 2, 10, 0, "osm", Format::PNG);
        storage.put(&job, vec![1], 1);
        let response = pipeline(storage).handle("/osm/10/1/2.png/dirty", None).await;
        assert_eq!(response.status, 202);
    }
}
