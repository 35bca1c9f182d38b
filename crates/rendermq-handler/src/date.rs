//! HTTP-date parsing and formatting for conditional GET, grounded in the
//! reply step of `tile_handler.cpp`: accepts `If-Modified-Since` in any of
//! the three formats RFC 9110 grandfathers in (RFC 1123, RFC 850, ANSI C's
//! `asctime`), and formats `Last-Modified`/`Expires` in RFC 1123 form.

use chrono::{DateTime, Utc};

/// Parses an `If-Modified-Since` header value, trying RFC 1123 first (the
/// only form `Last-Modified` itself is ever sent in), then RFC 850, then
/// ANSI C `asctime`, returning `None` if none match.
pub fn parse_http_date(value: &str) -> Option<i64> {
    let formats = [
        "%a, %d %b %Y %H:%M:%S GMT", // RFC 1123
        "%A, %d-%b-%y %H:%M:%S GMT", // RFC 850
        "%a %b %e %H:%M:%S %Y",      // ANSI C asctime
    ];
    for fmt in formats {
        if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(value, fmt) {
            return Some(naive.and_utc().timestamp());
        }
    }
    None
}

/// Formats a unix timestamp as an RFC 1123 HTTP-date, e.g.
/// `Tue, 15 Nov 1994 08:12:31 GMT`.
pub fn format_http_date(unix_secs: i64) -> String {
    let dt = DateTime::<Utc>::from_timestamp(unix_secs, 0).unwrap_or_else(|| DateTime::<Utc>::from_timestamp(0, 0).unwrap());
    dt.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// `true` when `last_modified` is newer than the client's cached copy (or
/// the client sent no conditional header at all) — i.e. a fresh 200 is due
/// rather than a 304.
pub fn is_newer_than_cached(last_modified: i64, if_modified_since: Option<&str>) -> bool {
    match if_modified_since.and_then(parse_http_date) {
        Some(cached) => last_modified > cached,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_rfc1123() {
        assert_eq!(format_http_date(784887151), "Tue, 15 Nov 1994 08:12:31 GMT");
    }

    #[test]
    fn parses_all_three_grandfathered_formats() {
        assert_eq!(parse_http_date("Tue, 15 Nov 1994 08:12:31 GMT"), Some(784887151));
        assert_eq!(parse_http_date("Tuesday, 15-Nov-94 08:12:31 GMT"), Some(784887151));
        assert_eq!(parse_http_date("Tue Nov 15 08:12:31 1994"), Some(784887151));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_http_date("not a date"), None);
    }

    #[test]
    fn no_conditional_header_means_always_fresh() {
        assert!(is_newer_than_cached(1000, None));
    }

    #[test]
    fn newer_last_modified_is_fresh_older_is_not() {
        let cached = "Tue, 15 Nov 1994 08:12:31 GMT";
        assert!(is_newer_than_cached(784887151 + 1000, Some(cached)));
        assert!(!is_newer_than_cached(784887151 - 1000, Some(cached)));
    }
}
