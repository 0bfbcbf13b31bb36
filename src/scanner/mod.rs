//! Ingestion scanner: reconciles the unprocessed directory tree with the
//! catalog.
//!
//! A scan walks the tree, resolves each new file's base name and role,
//! stages records with an inferred capture date, bulk-inserts them, and
//! generates thumbnails for exactly the newly seen paths. Paths already in
//! the catalog are never restaged, so lifecycle state survives re-scans.

pub mod metadata;
pub mod thumbnails;

use anyhow::{Context, Result};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use walkdir::WalkDir;

use crate::config::Config;
use crate::db::{Database, NewPhoto};
use crate::pairing::{determine_role, extract_base_name, should_ignore, Role};

pub use thumbnails::ThumbnailManager;

#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    /// Recognized image files found under the unprocessed root.
    pub total_found: usize,
    /// Records newly inserted this scan.
    pub inserted: usize,
    /// Thumbnails generated or confirmed fresh for the new records.
    pub thumbnails: usize,
}

/// Role slots for one base name, resolved while staging a scan batch.
#[derive(Default)]
struct SetSlots {
    front: Option<PathBuf>,
    back: Option<PathBuf>,
    base: Option<PathBuf>,
    extras: Vec<PathBuf>,
}

impl SetSlots {
    /// The most recently seen claimant of a slot wins it; the displaced
    /// file is kept as an extra rather than dropped.
    fn claim(&mut self, role: Role, path: PathBuf) {
        let slot = match role {
            Role::Front => &mut self.front,
            Role::Back => &mut self.back,
            Role::Base | Role::Extra => &mut self.base,
        };
        if let Some(displaced) = slot.replace(path) {
            self.extras.push(displaced);
        }
    }
}

pub struct Scanner {
    config: Config,
}

impl Scanner {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Walks the unprocessed root and brings the catalog up to date.
    pub fn scan(&self, db: &Database) -> Result<ScanResult> {
        let root = &self.config.library.unprocessed_dir;
        std::fs::create_dir_all(root)
            .with_context(|| format!("Failed to create unprocessed directory {:?}", root))?;

        let mut files = self.discover(root);
        // Deterministic staging order regardless of directory iteration.
        files.sort();
        let total_found = files.len();

        let known: HashSet<String> = db.all_photo_paths()?.into_iter().collect();

        let mut groups: BTreeMap<String, SetSlots> = BTreeMap::new();
        for path in files {
            let path_str = path.to_string_lossy().to_string();
            if known.contains(&path_str) {
                continue;
            }
            let filename = match path.file_name().and_then(|n| n.to_str()) {
                Some(name) => name,
                None => continue,
            };
            let base_name = extract_base_name(filename);
            let role = determine_role(filename);
            groups.entry(base_name).or_default().claim(role, path);
        }

        let mut staged = Vec::new();
        for (base_name, slots) in groups {
            let SetSlots {
                front,
                back,
                base,
                extras,
            } = slots;
            let roled = front
                .map(|p| (p, Role::Front))
                .into_iter()
                .chain(back.map(|p| (p, Role::Back)))
                .chain(base.map(|p| (p, Role::Base)))
                .chain(extras.into_iter().map(|p| (p, Role::Extra)));
            for (path, role) in roled {
                staged.push(NewPhoto {
                    default_date: metadata::default_date(&path),
                    path: path.to_string_lossy().to_string(),
                    base_name: base_name.clone(),
                    role,
                });
            }
        }

        let inserted = db.upsert_photos(&staged)?;

        let new_paths: Vec<PathBuf> = staged.iter().map(|p| PathBuf::from(&p.path)).collect();
        let thumbs = ThumbnailManager::new(
            self.config.library.thumbs_dir.clone(),
            &self.config.scanner,
        );
        let thumbnails = thumbs.generate_batch(&new_paths);

        tracing::info!(
            "Scan complete: {} files found, {} new records, {} thumbnails",
            total_found,
            inserted,
            thumbnails
        );

        Ok(ScanResult {
            total_found,
            inserted,
            thumbnails,
        })
    }

    /// Recognized image files under the root, ignore patterns applied.
    fn discover(&self, root: &PathBuf) -> Vec<PathBuf> {
        let extensions = &self.config.scanner.image_extensions;
        let patterns = &self.config.scanner.ignore_patterns;

        WalkDir::new(root)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| {
                let name = entry.file_name().to_string_lossy();
                if should_ignore(&name, patterns) {
                    return false;
                }
                entry
                    .path()
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|e| {
                        let lower = e.to_lowercase();
                        extensions.iter().any(|known| known == &lower)
                    })
                    .unwrap_or(false)
            })
            .map(|entry| entry.into_path())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn test_config(dir: &Path) -> Config {
        let mut config = Config::default();
        config.library.unprocessed_dir = dir.join("unprocessed");
        config.library.processed_dir = dir.join("processed");
        config.library.thumbs_dir = dir.join("thumbs");
        config
    }

    fn touch(dir: &Path, name: &str) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(dir.join(name), b"jpeg bytes").unwrap();
    }

    fn test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        db
    }

    #[test]
    fn test_scan_stages_roles_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let root = config.library.unprocessed_dir.clone();
        touch(&root, "vacation_a.jpg");
        touch(&root, "vacation_b.jpg");
        touch(&root, "vacation.jpg");
        touch(&root, "SYNOFILE_thumb_vacation.jpg");

        let db = test_db();
        let scanner = Scanner::new(config);
        let result = scanner.scan(&db).unwrap();
        assert_eq!(result.total_found, 3);
        assert_eq!(result.inserted, 3);

        let sets = db.unprocessed_sets().unwrap();
        assert_eq!(sets.len(), 1);
        let set = &sets[0];
        assert_eq!(set.base_name, "vacation");
        assert!(set.front.as_deref().unwrap().ends_with("vacation_a.jpg"));
        assert!(set.back.as_deref().unwrap().ends_with("vacation_b.jpg"));
        assert_eq!(set.variants.len(), 1);

        // Unchanged filesystem: the second scan inserts nothing.
        let again = scanner.scan(&db).unwrap();
        assert_eq!(again.inserted, 0);
    }

    #[test]
    fn test_suffixless_duplicate_demoted_to_extra() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let root = config.library.unprocessed_dir.clone();
        touch(&root.join("box1"), "trip.jpg");
        touch(&root.join("box2"), "trip.jpg");

        let db = test_db();
        Scanner::new(config).scan(&db).unwrap();

        // One suffix-less original keeps the base slot, the other becomes
        // an extra, so exactly one is eligible for feature extraction.
        let eligible = db.photos_needing_embedding("combined").unwrap();
        assert_eq!(eligible.len(), 1);
        assert_eq!(db.count_photos().unwrap(), 2);
    }

    #[test]
    fn test_processed_paths_not_restaged() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let root = config.library.unprocessed_dir.clone();
        touch(&root, "keep_a.jpg");

        let db = test_db();
        let scanner = Scanner::new(config);
        scanner.scan(&db).unwrap();

        let path = root.join("keep_a.jpg").to_string_lossy().to_string();
        db.mark_ignored(&path).unwrap();
        scanner.scan(&db).unwrap();
        // Ignored state survives a re-scan of the same path.
        assert_eq!(db.count_by_state("ignored").unwrap(), 1);
    }

    #[test]
    fn test_unrecognized_extensions_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let root = config.library.unprocessed_dir.clone();
        touch(&root, "notes.txt");
        touch(&root, "photo.JPG");

        let db = test_db();
        let result = Scanner::new(config).scan(&db).unwrap();
        assert_eq!(result.total_found, 1);
        assert_eq!(result.inserted, 1);
    }
}
