//! Per-style rewrite/format/zoom policy, grounded in `tile_handler.cpp`'s
//! `style_rules` class: an optional name rewrite, an optional forced format
//! override, a permitted-format bitmask (empty means "allow everything"),
//! and a maximum zoom (default 18).

use std::collections::HashMap;

use rendermq_proto::{Format, Job};

const DEFAULT_MAX_ZOOM: i32 = 18;

#[derive(Debug, Clone, Default)]
struct StylePolicy {
    rewrite_to: Option<String>,
    forced_format: Option<Format>,
    allowed_formats: Option<Format>,
    max_zoom: i32,
}

impl StylePolicy {
    fn max_zoom(&self) -> i32 {
        if self.max_zoom == 0 {
            DEFAULT_MAX_ZOOM
        } else {
            self.max_zoom
        }
    }
}

/// Loaded once from the handler config's `[tiles.rewrite]`,
/// `[tiles.forced_formats]`, `[tiles.formats]` and `[tiles.zoom_limits]`
/// sections, one key per style name in each; consulted for every incoming
/// request. Mirrors `style_rules::style_rules(const pt::ptree &conf)`,
/// which reads the same four maps out of the `tiles` subtree.
#[derive(Debug, Clone, Default)]
pub struct StyleRules {
    policies: HashMap<String, StylePolicy>,
}

impl StyleRules {
    pub fn new() -> StyleRules {
        StyleRules::default()
    }

    /// Builds the rule set from a parsed config file's `tiles.*` sections.
    pub fn from_config(config: &rendermq_config::Config) -> StyleRules {
        let mut rules = StyleRules::new();
        for (from, to) in config.section_entries("tiles.rewrite") {
            rules.set_rewrite(from, to);
        }
        for (style, fmt_str) in config.section_entries("tiles.forced_formats") {
            if let Some(format) = parse_format_list(fmt_str) {
                rules.set_forced_format(style, format);
            }
        }
        for (style, fmt_str) in config.section_entries("tiles.formats") {
            if let Some(format) = parse_format_list(fmt_str) {
                rules.set_allowed_formats(style, format);
            }
        }
        for (style, zoom_str) in config.section_entries("tiles.zoom_limits") {
            if let Ok(max_zoom) = zoom_str.parse() {
                rules.set_max_zoom(style, max_zoom);
            }
        }
        rules
    }

    pub fn set_rewrite(&mut self, from: impl Into<String>, to: impl Into<String>) {
        self.policies.entry(from.into()).or_default().rewrite_to = Some(to.into());
    }

    pub fn set_forced_format(&mut self, style: impl Into<String>, format: Format) {
        self.policies.entry(style.into()).or_default().forced_format = Some(format);
    }

    pub fn set_allowed_formats(&mut self, style: impl Into<String>, formats: Format) {
        self.policies.entry(style.into()).or_default().allowed_formats = Some(formats);
    }

    pub fn set_max_zoom(&mut self, style: impl Into<String>, max_zoom: i32) {
        self.policies.entry(style.into()).or_default().max_zoom = max_zoom;
    }

    /// Applies rewrite, then forced format, then validates zoom/coordinate
    /// range and format membership, in that order — matching
    /// `style_rules::rewrite_and_check` exactly. Mutates `job` in place and
    /// returns whether it is admissible.
    pub fn rewrite_and_check(&self, job: &mut Job) -> bool {
        if let Some(policy) = self.policies.get(&job.style) {
            if let Some(to) = &policy.rewrite_to {
                job.style = to.clone();
            }
        }

        let policy = self.policies.get(&job.style);

        if let Some(forced) = policy.and_then(|p| p.forced_format) {
            job.format = forced;
        }

        let max_zoom = policy.map(StylePolicy::max_zoom).unwrap_or(DEFAULT_MAX_ZOOM);
        if !check_xyz(job.z, job.x, job.y, max_zoom) {
            return false;
        }

        match policy.and_then(|p| p.allowed_formats) {
            Some(allowed) => allowed.contains(job.format),
            None => true,
        }
    }
}

/// Parses a comma- or space-separated list of format names into a bitmask,
/// matching `tile_handler.cpp`'s `parse_formats`. Unrecognised tokens are
/// skipped rather than rejecting the whole config.
fn parse_format_list(value: &str) -> Option<Format> {
    let formats: Format = value
        .split([',', ' '])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(Format::from_extension)
        .fold(Format::NONE, Format::union);
    if formats.is_empty() {
        None
    } else {
        Some(formats)
    }
}

/// `z` in `[0, max_zoom]`, `x`/`y` in `[0, 2^z)`.
fn check_xyz(z: i32, x: i32, y: i32, max_zoom: i32) -> bool {
    if z < 0 || z > max_zoom {
        return false;
    }
    let bound = 1i64 << z;
    let (x, y) = (x as i64, y as i64);
    x >= 0 && x < bound && y >= 0 && y < bound
}

#[cfg(test)]
mod tests {
    use super::*;
    use rendermq_proto::Status;

    fn job(style: &str, z: i32, x: i32, y: i32, format: Format) -> Job {
        Job::new(Status::Render, x, y, z, 1, style, format)
    }

    #[test]
    fn from_config_reads_all_four_tiles_sections() {
        let config = rendermq_config::Config::from_str(
            "
[zmq]
broker_names =

[tiles.rewrite]
old-name = osm

[tiles.forced_formats]
osm = png

[tiles.formats]
osm = png, json

[tiles.zoom_limits]
osm = 10
",
        )
        .unwrap();
        let rules = StyleRules::from_config(&config);

        let mut request = job("old-name", 5, 3, 3, Format::JPEG);
        assert!(rules.rewrite_and_check(&mut request));
        assert_eq!(request.style, "osm");
        assert_eq!(request.format, Format::PNG);

        let mut too_deep = job("osm", 11, 0, 0, Format::PNG);
        assert!(!rules.rewrite_and_check(&mut too_deep));
    }

    #[test]
    fn passes_through_unknown_style_unchanged() {
        let rules = StyleRules::new();
        let mut job = job("osm", 5, 3, 3, Format::PNG);
        assert!(rules.rewrite_and_check(&mut job));
        assert_eq!(job.style, "osm");
    }

    #[test]
    fn rewrites_style_name() {
        let mut rules = StyleRules::new();
        rules.set_rewrite("old-name", "osm");
        let mut job = job("old-name", 5, 3, 3, Format::PNG);
        assert!(rules.rewrite_and_check(&mut job));
        assert_eq!(job.style, "osm");
    }

    #[test]
    fn forces_format_after_rewrite() {
        let mut rules = StyleRules::new();
        rules.set_forced_format("osm", Format::PNG);
        let mut job = job("osm", 5, 3, 3, Format::JPEG);
        assert!(rules.rewrite_and_check(&mut job));
        assert_eq!(job.format, Format::PNG);
    }

    #[test]
    fn rejects_zoom_beyond_style_limit() {
        let mut rules = StyleRules::new();
        rules.set_max_zoom("osm", 10);
        let mut job = job("osm", 11, 0, 0, Format::PNG);
        assert!(!rules.rewrite_and_check(&mut job));
    }

    #[test]
    fn rejects_coordinate_out_of_range_for_zoom() {
        let rules = StyleRules::new();
        let mut job = job("osm", 2, 4, 0, Format::PNG);
        assert!(!rules.rewrite_and_check(&mut job));
    }

    #[test]
    fn rejects_format_not_in_allowed_set() {
        let mut rules = StyleRules::new();
        rules.set_allowed_formats("osm", Format::PNG | Format::JSON);
        let mut job = job("osm", 5, 0, 0, Format::JPEG);
        assert!(!rules.rewrite_and_check(&mut job));
    }

    #[test]
    fn empty_allowed_formats_means_allow_all() {
        let rules = StyleRules::new();
        let mut job = job("osm", 5, 0, 0, Format::GIF);
        assert!(rules.rewrite_and_check(&mut job));
    }

    #[test]
    fn default_max_zoom_is_eighteen() {
        let rules = StyleRules::new();
        let mut job = job("osm", 18, 0, 0, Format::PNG);
        assert!(rules.rewrite_and_check(&mut job));
        job.z = 19;
        assert!(!rules.rewrite_and_check(&mut job));
    }
}
