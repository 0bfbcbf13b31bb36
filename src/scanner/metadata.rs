//! Capture-date extraction for newly discovered photos.
//!
//! EXIF is authoritative when present. Files without usable EXIF fall back
//! to filesystem timestamps, bounded to a plausible year range so that a
//! botched clock does not suggest a date in 1970 or 2106.

use chrono::{DateTime, Datelike, Local, NaiveDateTime};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

const MIN_PLAUSIBLE_YEAR: i32 = 1900;
const MAX_PLAUSIBLE_YEAR: i32 = 2030;

/// Best-effort capture date as `YYYY-MM-DD`, or None when nothing usable
/// can be derived. Never fails the scan.
pub fn default_date(path: &Path) -> Option<String> {
    if let Some(date) = exif_date(path) {
        return Some(date);
    }
    filesystem_date(path)
}

/// DateTimeOriginal is preferred; DateTime is the fallback since scanners
/// and some cameras only write the latter.
fn exif_date(path: &Path) -> Option<String> {
    let file = File::open(path).ok()?;
    let mut bufreader = BufReader::new(file);
    let exif = exif::Reader::new().read_from_container(&mut bufreader).ok()?;

    for tag in [exif::Tag::DateTimeOriginal, exif::Tag::DateTime] {
        if let Some(field) = exif.get_field(tag, exif::In::PRIMARY) {
            let raw = field.display_value().to_string();
            let raw = raw.trim_matches('"').trim();
            if let Some(date) = parse_exif_datetime(raw) {
                return Some(date);
            }
        }
    }
    None
}

/// EXIF stores `YYYY:MM:DD HH:MM:SS`; some writers emit dashes instead.
fn parse_exif_datetime(raw: &str) -> Option<String> {
    for fmt in ["%Y:%m:%d %H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt.format("%Y-%m-%d").to_string());
        }
    }
    None
}

/// Earliest of creation and modification time, if it lands in a plausible
/// year range.
fn filesystem_date(path: &Path) -> Option<String> {
    let metadata = std::fs::metadata(path).ok()?;
    let stamp = match (metadata.created(), metadata.modified()) {
        (Ok(c), Ok(m)) => Some(c.min(m)),
        (Ok(c), Err(_)) => Some(c),
        (Err(_), Ok(m)) => Some(m),
        (Err(_), Err(_)) => None,
    }?;

    let dt: DateTime<Local> = stamp.into();
    if dt.year() < MIN_PLAUSIBLE_YEAR || dt.year() > MAX_PLAUSIBLE_YEAR {
        return None;
    }
    Some(dt.format("%Y-%m-%d").to_string())
}
