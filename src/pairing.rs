//! Filename pairing rules for scanned photo sets.
//!
//! The document scanner emits up to three files per physical photo: the raw
//! scan (`<name>.jpg`), and the front/back split (`<name>_a.jpg`,
//! `<name>_b.jpg`). Re-processed files additionally carry a `YYYY-MM-DD_`
//! date prefix. These functions turn a bare filename into the base
//! identifier and role that group the files back into one set. No I/O.

/// Role of a single file within a photo set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// `_a` suffix - the front of the photo.
    Front,
    /// `_b` suffix - the back of the photo.
    Back,
    /// No suffix - the unsplit scanner original. Only these are embedded
    /// for similarity analysis.
    Base,
    /// A duplicate displaced from an occupied front/back slot.
    Extra,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Front => "front",
            Role::Back => "back",
            Role::Base => "base",
            Role::Extra => "extra",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "front" => Some(Role::Front),
            "back" => Some(Role::Back),
            "base" => Some(Role::Base),
            "extra" => Some(Role::Extra),
            _ => None,
        }
    }
}

/// Extract the base identifier shared by all files of a photo set.
///
/// Strips a leading `YYYY-MM-DD_` date prefix, a trailing `_a`/`_b` suffix
/// and the extension. Non-jpeg filenames fall back to the extension-stripped
/// stem; this never fails.
pub fn extract_base_name(filename: &str) -> String {
    if let Some(stem) = strip_jpeg_extension(filename) {
        let stem = strip_date_prefix(stem);
        let stem = strip_side_suffix(stem);
        return stem.to_string();
    }

    // Not a jpeg name: fall back to the extension-stripped filename.
    match filename.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => filename.to_string(),
    }
}

/// Determine which role a filename plays inside its set.
pub fn determine_role(filename: &str) -> Role {
    let lower = filename.to_lowercase();
    if lower.ends_with("_a.jpg") || lower.ends_with("_a.jpeg") {
        Role::Front
    } else if lower.ends_with("_b.jpg") || lower.ends_with("_b.jpeg") {
        Role::Back
    } else {
        Role::Base
    }
}

/// True if the filename matches any configured ignore pattern
/// (vendor sidecars, OS metadata files).
pub fn should_ignore(filename: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|p| !p.is_empty() && filename.contains(p.as_str()))
}

fn strip_jpeg_extension(filename: &str) -> Option<&str> {
    let lower = filename.to_lowercase();
    if lower.ends_with(".jpeg") {
        Some(&filename[..filename.len() - 5])
    } else if lower.ends_with(".jpg") {
        Some(&filename[..filename.len() - 4])
    } else {
        None
    }
}

/// Strips a leading `YYYY-MM-DD_` prefix if present.
fn strip_date_prefix(stem: &str) -> &str {
    let bytes = stem.as_bytes();
    if bytes.len() > 11
        && bytes[..11].iter().enumerate().all(|(i, b)| match i {
            4 | 7 => *b == b'-',
            10 => *b == b'_',
            _ => b.is_ascii_digit(),
        })
    {
        &stem[11..]
    } else {
        stem
    }
}

fn strip_side_suffix(stem: &str) -> &str {
    let lower = stem.to_lowercase();
    if lower.ends_with("_a") || lower.ends_with("_b") {
        &stem[..stem.len() - 2]
    } else {
        stem
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_determine_role_suffixes() {
        assert_eq!(determine_role("vacation_a.jpg"), Role::Front);
        assert_eq!(determine_role("vacation_a.jpeg"), Role::Front);
        assert_eq!(determine_role("VACATION_A.JPG"), Role::Front);
        assert_eq!(determine_role("vacation_b.jpg"), Role::Back);
        assert_eq!(determine_role("vacation_b.jpeg"), Role::Back);
        assert_eq!(determine_role("vacation.jpg"), Role::Base);
        assert_eq!(determine_role("vacation_c.jpg"), Role::Base);
        assert_eq!(determine_role("scan001.png"), Role::Base);
    }

    #[test]
    fn test_extract_base_name() {
        assert_eq!(extract_base_name("2024-01-05_vacation_a.jpg"), "vacation");
        assert_eq!(extract_base_name("vacation.jpg"), "vacation");
        assert_eq!(extract_base_name("vacation_a.jpg"), "vacation");
        assert_eq!(extract_base_name("vacation_b.jpeg"), "vacation");
        assert_eq!(extract_base_name("2024-01-05_vacation.jpg"), "vacation");
    }

    #[test]
    fn test_extract_base_name_case_insensitive() {
        assert_eq!(extract_base_name("Vacation_A.JPG"), "Vacation");
        assert_eq!(extract_base_name("trip_B.Jpeg"), "trip");
    }

    #[test]
    fn test_extract_base_name_non_jpeg_fallback() {
        assert_eq!(extract_base_name("scan001.png"), "scan001");
        assert_eq!(extract_base_name("scan001.tiff"), "scan001");
        // No extension at all: returned unchanged.
        assert_eq!(extract_base_name("scan001"), "scan001");
    }

    #[test]
    fn test_extract_base_name_keeps_non_date_prefix() {
        // Prefix that is not a date must survive.
        assert_eq!(extract_base_name("1234-56-789_trip.jpg"), "1234-56-789_trip");
        assert_eq!(extract_base_name("box3_photo_a.jpg"), "box3_photo");
    }

    #[test]
    fn test_should_ignore() {
        let patterns = vec![
            "SYNOFILE_".to_string(),
            ".DS_Store".to_string(),
            "Thumbs.db".to_string(),
        ];
        assert!(should_ignore("SYNOFILE_THUMB_M.jpg", &patterns));
        assert!(should_ignore(".DS_Store", &patterns));
        assert!(should_ignore("Thumbs.db", &patterns));
        assert!(!should_ignore("vacation_a.jpg", &patterns));
        assert!(!should_ignore("photo.jpg", &[]));
    }
}
