//! Transactional corrector: applies an operator-supplied capture date to
//! every file of a photo set with backup, verification and rollback.
//!
//! Files are corrected independently. A failure rolls back that file to
//! its byte-identical pre-operation state and is reported per file; it
//! never undoes siblings that already succeeded.

pub mod exif_write;

use anyhow::Result;
use chrono::{Datelike, NaiveDate, TimeZone, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::config::Config;
use crate::db::{Database, PhotoSet};

const BACKUP_SUFFIX: &str = ".backup";
const DISAMBIGUATION_ATTEMPTS: u32 = 100;

#[derive(Debug, thiserror::Error)]
pub enum CorrectionError {
    #[error("File unreadable: {path}")]
    Unreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Backup failed for {path}")]
    Backup {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Integrity verification failed for {path}, rolled back")]
    Verification { path: String },

    #[error("Relocation failed for {path}, rolled back: {reason}")]
    Relocation { path: String, reason: anyhow::Error },

    #[error("Catalog update failed: {0}")]
    Catalog(anyhow::Error),
}

/// Outcome of one file's correction.
#[derive(Debug)]
pub struct FileOutcome {
    pub original_path: String,
    pub result: Result<String, CorrectionError>,
}

/// Per-set correction report. `success` is true only when every file
/// succeeded; individual outcomes are always available.
#[derive(Debug)]
pub struct CorrectionReport {
    pub base_name: String,
    pub outcomes: Vec<FileOutcome>,
}

impl CorrectionReport {
    pub fn success(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }
}

pub struct Corrector {
    config: Config,
}

impl Corrector {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Applies `date` to every file in the set, advancing the catalog for
    /// each success. Partial success is reported, never rolled back across
    /// files.
    pub fn correct_set(
        &self,
        db: &Database,
        set: &PhotoSet,
        date: NaiveDate,
    ) -> CorrectionReport {
        let mut outcomes = Vec::new();
        for path in set.files() {
            let result = self
                .correct_file(Path::new(path), date)
                .and_then(|new_path| {
                    let new_str = new_path.to_string_lossy().to_string();
                    db.mark_processed(path, &new_str)
                        .map_err(CorrectionError::Catalog)?;
                    Ok(new_str)
                });
            match &result {
                Ok(new_path) => {
                    tracing::info!("Corrected {} -> {}", path, new_path);
                }
                Err(e) => {
                    tracing::error!("Correction failed for {}: {}", path, e);
                }
            }
            outcomes.push(FileOutcome {
                original_path: path.to_string(),
                result,
            });
        }
        CorrectionReport {
            base_name: set.base_name.clone(),
            outcomes,
        }
    }

    /// Single-file correction pipeline. Returns the file's new location.
    ///
    /// Steps: hash, backup, mutate metadata and timestamps, verify,
    /// relocate, clean up the backup. Any failure between mutation and
    /// relocation restores the pre-operation bytes from the backup.
    pub fn correct_file(&self, path: &Path, date: NaiveDate) -> Result<PathBuf, CorrectionError> {
        let path_str = path.to_string_lossy().to_string();

        let original_hash = sha256_file(path).map_err(|source| CorrectionError::Unreadable {
            path: path_str.clone(),
            source,
        })?;
        let original_mtime = fs::metadata(path).and_then(|m| m.modified()).ok();

        let backup = backup_path(path);
        fs::copy(path, &backup).map_err(|source| CorrectionError::Backup {
            path: path_str.clone(),
            source,
        })?;
        if let Some(mtime) = original_mtime {
            let _ = set_mtime(&backup, mtime);
        }

        // Embedded-date rewrite is best effort; the filesystem timestamp
        // set below remains the authoritative record.
        if let Err(e) = exif_write::write_exif_date(path, &exif_datetime(date)) {
            tracing::warn!("Embedded date not written for {}: {:#}", path_str, e);
        }
        let target_mtime = date_to_system_time(date);
        if let Err(e) = set_mtime(path, target_mtime) {
            tracing::warn!("Timestamp not set for {}: {}", path_str, e);
        }

        if !self.verify(path, &original_hash) {
            self.rollback(path, &backup, original_mtime);
            return Err(CorrectionError::Verification { path: path_str });
        }

        let new_path = match self.relocate(path, date) {
            Ok(p) => {
                // Copy-based moves do not preserve the timestamp.
                let _ = set_mtime(&p, target_mtime);
                p
            }
            Err(reason) => {
                self.rollback(path, &backup, original_mtime);
                return Err(CorrectionError::Relocation {
                    path: path_str,
                    reason,
                });
            }
        };

        if let Err(e) = fs::remove_file(&backup) {
            tracing::warn!("Stale backup left at {:?}: {}", backup, e);
        }
        Ok(new_path)
    }

    /// Byte identity cannot hold after a metadata rewrite, so a changed
    /// hash falls back to a full decode: the file must still be a valid
    /// image.
    fn verify(&self, path: &Path, original_hash: &str) -> bool {
        match sha256_file(path) {
            Ok(hash) if hash == original_hash => true,
            Ok(_) => image::open(path).is_ok(),
            Err(_) => false,
        }
    }

    fn rollback(&self, path: &Path, backup: &Path, original_mtime: Option<SystemTime>) {
        match fs::copy(backup, path) {
            Ok(_) => {
                if let Some(mtime) = original_mtime {
                    let _ = set_mtime(path, mtime);
                }
                let _ = fs::remove_file(backup);
                tracing::info!("Rolled back {:?} from backup", path);
            }
            Err(e) => {
                // The backup is kept for manual recovery.
                tracing::error!("Rollback failed for {:?}: {} (backup at {:?})", path, e, backup);
            }
        }
    }

    /// Moves the corrected file into `processed/YYYY/MM/` under a
    /// date-prefixed name, disambiguating rather than overwriting.
    fn relocate(&self, path: &Path, date: NaiveDate) -> Result<PathBuf> {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow::anyhow!("Path has no filename: {:?}", path))?;

        let target_dir = self
            .config
            .library
            .processed_dir
            .join(format!("{:04}", date.year()))
            .join(format!("{:02}", date.month()));
        fs::create_dir_all(&target_dir)?;

        let new_name = reprefix(filename, date);
        let destination = disambiguate(&target_dir, &new_name)?;

        // Cross-device moves cannot rename; copy then remove.
        if fs::rename(path, &destination).is_err() {
            fs::copy(path, &destination)?;
            fs::remove_file(path)?;
        }
        Ok(destination)
    }
}

/// `<name>` or `<old-date>_<name>` becomes `<date>_<name>`. A filename
/// already carrying the correct prefix is kept as is.
fn reprefix(filename: &str, date: NaiveDate) -> String {
    let prefix = date.format("%Y-%m-%d").to_string();
    let stem = strip_date_prefix(filename);
    // Keep-as-is only for a full `<date>_` prefix; a date glued straight
    // onto the name still gets the separator convention applied.
    if stem != filename && filename.starts_with(&prefix) {
        filename.to_string()
    } else {
        format!("{}_{}", prefix, stem)
    }
}

fn strip_date_prefix(filename: &str) -> &str {
    let bytes = filename.as_bytes();
    if bytes.len() > 11
        && bytes[4] == b'-'
        && bytes[7] == b'-'
        && bytes[10] == b'_'
        && bytes[..10]
            .iter()
            .enumerate()
            .all(|(i, b)| i == 4 || i == 7 || b.is_ascii_digit())
    {
        &filename[11..]
    } else {
        filename
    }
}

/// First free destination path: the plain name, then random 6-hex-char
/// suffixes, finally a millisecond timestamp. Existing files are never
/// overwritten.
fn disambiguate(dir: &Path, filename: &str) -> Result<PathBuf> {
    let plain = dir.join(filename);
    if !plain.exists() {
        return Ok(plain);
    }

    let (stem, ext) = match filename.rsplit_once('.') {
        Some((s, e)) => (s, e),
        None => (filename, ""),
    };
    let with_suffix = |suffix: String| {
        if ext.is_empty() {
            dir.join(format!("{}_{}", stem, suffix))
        } else {
            dir.join(format!("{}_{}.{}", stem, suffix, ext))
        }
    };

    let mut rng = rand::thread_rng();
    for _ in 0..DISAMBIGUATION_ATTEMPTS {
        let candidate = with_suffix(format!("{:06x}", rng.gen_range(0u32..0x100_0000)));
        if !candidate.exists() {
            return Ok(candidate);
        }
    }

    let millis = Utc::now().timestamp_millis();
    let candidate = with_suffix(millis.to_string());
    if candidate.exists() {
        anyhow::bail!("Destination disambiguation exhausted for {:?}", plain);
    }
    Ok(candidate)
}

fn backup_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(BACKUP_SUFFIX);
    PathBuf::from(os)
}

fn exif_datetime(date: NaiveDate) -> String {
    format!("{} 12:00:00", date.format("%Y:%m:%d"))
}

/// Noon UTC on the target date; noon keeps the date stable across
/// timezone renderings.
fn date_to_system_time(date: NaiveDate) -> SystemTime {
    let dt = Utc.from_utc_datetime(&date.and_hms_opt(12, 0, 0).unwrap_or_default());
    SystemTime::from(dt)
}

fn set_mtime(path: &Path, mtime: SystemTime) -> std::io::Result<()> {
    fs::File::options()
        .write(true)
        .open(path)?
        .set_modified(mtime)
}

fn sha256_file(path: &Path) -> std::io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 65536];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pairing::Role;

    fn test_config(dir: &Path) -> Config {
        let mut config = Config::default();
        config.library.unprocessed_dir = dir.join("unprocessed");
        config.library.processed_dir = dir.join("processed");
        config.library.thumbs_dir = dir.join("thumbs");
        config
    }

    fn write_jpeg(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let img = image::RgbImage::from_pixel(24, 24, image::Rgb([10, 20, 30]));
        img.save(path).unwrap();
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_correct_file_relocates_with_date_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let src = config.library.unprocessed_dir.join("vacation_a.jpg");
        write_jpeg(&src);

        let corrector = Corrector::new(config.clone());
        let new_path = corrector.correct_file(&src, date(1998, 7, 4)).unwrap();

        assert!(!src.exists());
        assert!(!backup_path(&src).exists());
        assert_eq!(
            new_path,
            config
                .library
                .processed_dir
                .join("1998/07/1998-07-04_vacation_a.jpg")
        );
        assert!(new_path.exists());

        // The embedded date landed and the file still decodes.
        let file = fs::File::open(&new_path).unwrap();
        let exif = exif::Reader::new()
            .read_from_container(&mut std::io::BufReader::new(file))
            .unwrap();
        let field = exif
            .get_field(exif::Tag::DateTimeOriginal, exif::In::PRIMARY)
            .unwrap();
        assert!(field.display_value().to_string().contains("1998"));
        image::open(&new_path).unwrap();
    }

    #[test]
    fn test_stale_date_prefix_replaced() {
        assert_eq!(
            reprefix("2020-01-01_trip_a.jpg", date(1998, 7, 4)),
            "1998-07-04_trip_a.jpg"
        );
        assert_eq!(reprefix("trip.jpg", date(1998, 7, 4)), "1998-07-04_trip.jpg");
        assert_eq!(
            reprefix("1998-07-04_trip.jpg", date(1998, 7, 4)),
            "1998-07-04_trip.jpg"
        );
        // A non-date prefix that merely looks close is preserved.
        assert_eq!(
            reprefix("12345678901_x.jpg", date(1998, 7, 4)),
            "1998-07-04_12345678901_x.jpg"
        );
        // A date glued onto the name without the separator still gets one.
        assert_eq!(
            reprefix("1998-07-04photo.jpg", date(1998, 7, 4)),
            "1998-07-04_1998-07-04photo.jpg"
        );
    }

    #[test]
    fn test_verification_failure_rolls_back_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let src = config.library.unprocessed_dir.join("broken.jpg");
        fs::create_dir_all(src.parent().unwrap()).unwrap();
        // Valid SOI so the metadata splice proceeds, but undecodable, so
        // verification's decode step fails and triggers rollback.
        let original = [0xFFu8, 0xD8, 0x00, 0x01, 0x02, 0x03];
        fs::write(&src, original).unwrap();

        let corrector = Corrector::new(config);
        let err = corrector.correct_file(&src, date(1998, 7, 4)).unwrap_err();
        assert!(matches!(err, CorrectionError::Verification { .. }));
        assert_eq!(fs::read(&src).unwrap(), original);
        assert!(!backup_path(&src).exists());
    }

    #[test]
    fn test_relocation_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let src = config.library.unprocessed_dir.join("dup.jpg");
        write_jpeg(&src);

        let occupied = config.library.processed_dir.join("1998/07/1998-07-04_dup.jpg");
        fs::create_dir_all(occupied.parent().unwrap()).unwrap();
        fs::write(&occupied, b"already here").unwrap();

        let corrector = Corrector::new(config);
        let new_path = corrector.correct_file(&src, date(1998, 7, 4)).unwrap();

        assert_ne!(new_path, occupied);
        assert_eq!(fs::read(&occupied).unwrap(), b"already here");
        let name = new_path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("1998-07-04_dup_"));
        assert!(name.ends_with(".jpg"));
    }

    #[test]
    fn test_correct_set_reports_per_file_outcomes() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let front = config.library.unprocessed_dir.join("mixed_a.jpg");
        let back = config.library.unprocessed_dir.join("mixed_b.jpg");
        write_jpeg(&front);
        fs::create_dir_all(back.parent().unwrap()).unwrap();
        // Valid SOI so the metadata splice mutates the file, but
        // undecodable, so verification fails and the file rolls back.
        fs::write(&back, [0xFFu8, 0xD8, 0x00, 0x01, 0x02, 0x03]).unwrap();

        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        db.upsert_photos(&[
            crate::db::NewPhoto {
                path: front.to_string_lossy().to_string(),
                base_name: "mixed".to_string(),
                role: Role::Front,
                default_date: None,
            },
            crate::db::NewPhoto {
                path: back.to_string_lossy().to_string(),
                base_name: "mixed".to_string(),
                role: Role::Back,
                default_date: None,
            },
        ])
        .unwrap();

        let set = db
            .unprocessed_sets()
            .unwrap()
            .into_iter()
            .find(|s| s.base_name == "mixed")
            .unwrap();

        let report = Corrector::new(config).correct_set(&db, &set, date(2001, 2, 3));
        assert!(!report.success());
        assert_eq!(report.outcomes.len(), 2);
        let ok: Vec<_> = report.outcomes.iter().filter(|o| o.result.is_ok()).collect();
        assert_eq!(ok.len(), 1);
        assert!(ok[0].original_path.ends_with("mixed_a.jpg"));

        // The failed sibling stays unprocessed, the success advanced.
        assert_eq!(db.count_by_state("processed").unwrap(), 1);
        assert_eq!(db.count_by_state("unprocessed").unwrap(), 1);
    }

    #[test]
    fn test_mtime_set_to_target_date() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let src = config.library.unprocessed_dir.join("stamp.jpg");
        write_jpeg(&src);

        let corrector = Corrector::new(config);
        let new_path = corrector.correct_file(&src, date(2003, 11, 21)).unwrap();
        let mtime = fs::metadata(&new_path).unwrap().modified().unwrap();
        let dt: chrono::DateTime<Utc> = mtime.into();
        assert_eq!(dt.date_naive(), date(2003, 11, 21));
    }
}
