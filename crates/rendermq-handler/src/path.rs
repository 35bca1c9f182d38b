//! Parses `/<style-path>/<z>/<x>/<y>.<ext>[/dirty|/status]` into a [`Job`],
//! grounded in `tile_path_grammar.hpp`'s spirit grammar: a `/`-joined style
//! path of arbitrary depth, three integers, a dot, an extension naming the
//! format, and an optional trailing command suffix.

use rendermq_proto::{Format, Job, Status};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathParseError {
    #[error("path does not match /<style>/<z>/<x>/<y>.<ext>[/dirty|/status]")]
    Malformed,
    #[error("unrecognized format extension `{0}`")]
    UnknownFormat(String),
    #[error("coordinate out of range for i32")]
    CoordOverflow,
}

/// Parses a tile request path into a [`Job`] with `client_id` left at its
/// default (0) — the caller fills that in once a request id is known.
pub fn parse_path(path: &str) -> Result<Job, PathParseError> {
    let path = path.strip_prefix('/').ok_or(PathParseError::Malformed)?;

    let (body, command) = if let Some(rest) = path.strip_suffix("/dirty") {
        (rest, Status::Dirty)
    } else if let Some(rest) = path.strip_suffix("/status") {
        (rest, Status::Status)
    } else {
        (path, Status::Render)
    };

    let dot = body.rfind('.').ok_or(PathParseError::Malformed)?;
    let (coords_part, ext) = (&body[..dot], &body[dot + 1..]);
    let format = Format::from_extension(ext).ok_or_else(|| PathParseError::UnknownFormat(ext.to_string()))?;

    let mut segments: Vec<&str> = coords_part.split('/').collect();
    if segments.len() < 4 {
        return Err(PathParseError::Malformed);
    }
    let y = segments.pop().unwrap();
    let x = segments.pop().unwrap();
    let z = segments.pop().unwrap();
    let style = segments.join("/");
    if style.is_empty() || !segments_are_alnum(&style) {
        return Err(PathParseError::Malformed);
    }

    let z: i32 = z.parse().map_err(|_| PathParseError::CoordOverflow)?;
    let x: i32 = x.parse().map_err(|_| PathParseError::CoordOverflow)?;
    let y: i32 = y.parse().map_err(|_| PathParseError::CoordOverflow)?;

    Ok(Job::new(command, x, y, z, 0, style, format))
}

fn segments_are_alnum(style: &str) -> bool {
    style.split('/').all(|seg| {
        let mut chars = seg.chars();
        matches!(chars.next(), Some(c) if c.is_ascii_alphabetic()) && chars.all(|c| c.is_ascii_alphanumeric())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_plain_render_request() {
        let job = parse_path("/osm/10/512/384.png").unwrap();
        assert_eq!(job.style, "osm");
        assert_eq!((job.z, job.x, job.y), (10, 512, 384));
        assert_eq!(job.format, Format::PNG);
        assert_eq!(job.status, Status::Render);
    }

    #[test]
    fn parses_multi_segment_versioned_style() {
        let job = parse_path("/osm/v2/10/512/384.jpg").unwrap();
        assert_eq!(job.style, "osm/v2");
        assert_eq!(job.format, Format::JPEG);
    }

    #[test]
    fn parses_dirty_and_status_suffixes() {
        assert_eq!(parse_path("/osm/10/1/1.png/dirty").unwrap().status, Status::Dirty);
        assert_eq!(parse_path("/osm/10/1/1.png/status").unwrap().status, Status::Status);
    }

    #[test]
    fn accepts_both_jpg_and_jpeg_spellings() {
        assert_eq!(parse_path("/osm/10/1/1.jpg").unwrap().format, Format::JPEG);
        assert_eq!(parse_path("/osm/10/1/1.jpeg").unwrap().format, Format::JPEG);
    }

    #[test]
    fn rejects_unknown_extension() {
        assert!(matches!(parse_path("/osm/10/1/1.bmp"), Err(PathParseError::UnknownFormat(_))));
    }

    #[test]
    fn rejects_non_numeric_coordinates() {
        assert!(parse_path("/osm/10/x/1.png").is_err());
    }

    #[test]
    fn rejects_path_with_too_few_segments() {
        assert!(parse_path("/10/1.png").is_err());
    }

    #[test]
    fn rejects_overflowing_coordinate() {
        assert!(matches!(parse_path("/osm/10/99999999999999999999/1.png"), Err(PathParseError::CoordOverflow)));
    }
}
