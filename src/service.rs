//! Operator-facing facade over the catalog, scanner, corrector and
//! similarity pipeline.
//!
//! Read paths serve a memoized scan listing with a short freshness
//! window; writes do not invalidate it, the TTL does. The staleness
//! window is an accepted trade against re-walking the tree on every
//! listing call.

use anyhow::{bail, Result};
use chrono::NaiveDate;
use std::time::Duration;

use crate::cache::TtlCache;
use crate::config::Config;
use crate::corrector::{CorrectionReport, Corrector};
use crate::db::{Database, GroupView, PhotoSet};
use crate::scanner::{ScanResult, Scanner};
use crate::similarity::SimilarityAnalyzer;

/// One page of the unprocessed listing.
#[derive(Debug, Clone)]
pub struct SetsPage {
    pub sets: Vec<PhotoSet>,
    pub page: usize,
    pub total_pages: usize,
    pub total_sets: usize,
}

/// Catalog-wide counters for status output.
#[derive(Debug, Clone, Copy)]
pub struct CatalogStatus {
    pub unprocessed: i64,
    pub processed: i64,
    pub ignored: i64,
    pub groups: usize,
}

/// Outcome of one full background pass.
#[derive(Debug, Clone)]
pub struct ProcessingSummary {
    pub scan: ScanResult,
    pub embeddings: usize,
    pub groups: usize,
}

pub struct PhotoService {
    db: Database,
    scanner: Scanner,
    corrector: Corrector,
    analyzer: SimilarityAnalyzer,
    listing: TtlCache<Vec<PhotoSet>>,
    sets_per_page: usize,
}

impl PhotoService {
    pub fn new(config: Config) -> Result<Self> {
        let db = Database::open(&config.db_path)?;
        db.initialize()?;
        Ok(Self {
            scanner: Scanner::new(config.clone()),
            corrector: Corrector::new(config.clone()),
            analyzer: SimilarityAnalyzer::new(config.clone()),
            listing: TtlCache::new(Duration::from_secs(config.scanner.cache_ttl_secs)),
            sets_per_page: config.scanner.sets_per_page,
            db,
        })
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Walks the unprocessed tree and updates the catalog.
    pub fn scan(&self) -> Result<ScanResult> {
        self.scanner.scan(&self.db)
    }

    /// Scan plus the current displayable sets, memoized.
    fn listed_sets(&self) -> Result<Vec<PhotoSet>> {
        if let Some(sets) = self.listing.get() {
            return Ok(sets);
        }
        self.scanner.scan(&self.db)?;
        let sets: Vec<PhotoSet> = self
            .db
            .unprocessed_sets()?
            .into_iter()
            .filter(|set| set.is_displayable())
            .collect();
        self.listing.set(sets.clone());
        Ok(sets)
    }

    /// Pages are 1-based; an out-of-range page comes back empty rather
    /// than failing.
    pub fn unprocessed_sets(&self, page: usize) -> Result<SetsPage> {
        let sets = self.listed_sets()?;
        Ok(paginate(sets, page.max(1), self.sets_per_page))
    }

    /// Case-insensitive substring search over base names, unpaginated.
    pub fn search(&self, query: &str) -> Result<Vec<PhotoSet>> {
        let needle = query.to_lowercase();
        Ok(self
            .listed_sets()?
            .into_iter()
            .filter(|set| set.base_name.to_lowercase().contains(&needle))
            .collect())
    }

    /// Marks every file of the named set ignored.
    pub fn ignore_set(&self, base_name: &str) -> Result<usize> {
        let set = self.find_set(base_name)?;
        let mut marked = 0;
        for path in set.files() {
            if self.db.mark_ignored(path)? {
                marked += 1;
            }
        }
        tracing::info!("Ignored {} files of set {}", marked, base_name);
        Ok(marked)
    }

    /// Applies the date to every file of the named set.
    pub fn correct_date(&self, base_name: &str, date: NaiveDate) -> Result<CorrectionReport> {
        let set = self.find_set(base_name)?;
        Ok(self.corrector.correct_set(&self.db, &set, date))
    }

    /// Set lookup bypasses the listing cache: mutations must act on
    /// current catalog state, not a stale snapshot.
    fn find_set(&self, base_name: &str) -> Result<PhotoSet> {
        let set = self
            .db
            .unprocessed_sets()?
            .into_iter()
            .find(|set| set.base_name == base_name);
        match set {
            Some(set) => Ok(set),
            None => bail!("No unprocessed set named {:?}", base_name),
        }
    }

    /// Removes catalog records whose file is gone.
    pub fn reconcile(&self) -> Result<usize> {
        self.db.reconcile_missing()
    }

    pub fn groups(&self) -> Result<Vec<GroupView>> {
        self.db.list_groups()
    }

    pub fn status(&self) -> Result<CatalogStatus> {
        Ok(CatalogStatus {
            unprocessed: self.db.count_by_state("unprocessed")?,
            processed: self.db.count_by_state("processed")?,
            ignored: self.db.count_by_state("ignored")?,
            groups: self.db.list_groups()?.len(),
        })
    }

    /// The scheduled unit of work: scan, extract missing features,
    /// regroup.
    pub fn run_processing(&self) -> Result<ProcessingSummary> {
        let scan = self.scanner.scan(&self.db)?;
        let embeddings = self.analyzer.compute_missing_embeddings(&self.db)?;
        let groups = self.analyzer.regroup(&self.db)?;
        Ok(ProcessingSummary {
            scan,
            embeddings,
            groups,
        })
    }
}

fn paginate(sets: Vec<PhotoSet>, page: usize, per_page: usize) -> SetsPage {
    let total_sets = sets.len();
    let total_pages = total_sets.div_ceil(per_page).max(1);
    let start = (page - 1).saturating_mul(per_page);
    let sets = if start >= total_sets {
        Vec::new()
    } else {
        sets[start..(start + per_page).min(total_sets)].to_vec()
    };
    SetsPage {
        sets,
        page,
        total_pages,
        total_sets,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn test_service(dir: &Path) -> PhotoService {
        let mut config = Config::default();
        config.db_path = dir.join("catalog.db");
        config.library.unprocessed_dir = dir.join("unprocessed");
        config.library.processed_dir = dir.join("processed");
        config.library.thumbs_dir = dir.join("thumbs");
        config.scanner.sets_per_page = 2;
        PhotoService::new(config).unwrap()
    }

    fn write_jpeg(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let img = image::RgbImage::from_pixel(16, 16, image::Rgb([90, 60, 30]));
        img.save(path).unwrap();
    }

    fn seed_sets(dir: &Path, names: &[&str]) {
        for name in names {
            write_jpeg(&dir.join(format!("{}_a.jpg", name)));
            write_jpeg(&dir.join(format!("{}_b.jpg", name)));
        }
    }

    #[test]
    fn test_listing_paginates() {
        let dir = tempfile::tempdir().unwrap();
        let service = test_service(dir.path());
        seed_sets(&dir.path().join("unprocessed"), &["a", "b", "c"]);

        let first = service.unprocessed_sets(1).unwrap();
        assert_eq!(first.total_sets, 3);
        assert_eq!(first.total_pages, 2);
        assert_eq!(first.sets.len(), 2);

        let second = service.unprocessed_sets(2).unwrap();
        assert_eq!(second.sets.len(), 1);
        assert_eq!(second.sets[0].base_name, "c");

        let beyond = service.unprocessed_sets(9).unwrap();
        assert!(beyond.sets.is_empty());
        assert_eq!(beyond.total_sets, 3);
    }

    #[test]
    fn test_search_filters_by_base_name() {
        let dir = tempfile::tempdir().unwrap();
        let service = test_service(dir.path());
        seed_sets(
            &dir.path().join("unprocessed"),
            &["vacation", "birthday", "vacances"],
        );

        let hits = service.search("VACA").unwrap();
        let names: Vec<&str> = hits.iter().map(|s| s.base_name.as_str()).collect();
        assert_eq!(names, vec!["vacances", "vacation"]);
    }

    #[test]
    fn test_ignore_set_marks_all_files() {
        let dir = tempfile::tempdir().unwrap();
        let service = test_service(dir.path());
        seed_sets(&dir.path().join("unprocessed"), &["skip"]);
        service.scan().unwrap();

        assert_eq!(service.ignore_set("skip").unwrap(), 2);
        assert_eq!(service.status().unwrap().ignored, 2);
        assert!(service.ignore_set("skip").is_err());
    }

    #[test]
    fn test_correct_date_moves_set() {
        let dir = tempfile::tempdir().unwrap();
        let service = test_service(dir.path());
        seed_sets(&dir.path().join("unprocessed"), &["trip"]);
        service.scan().unwrap();

        let date = NaiveDate::from_ymd_opt(1998, 7, 4).unwrap();
        let report = service.correct_date("trip", date).unwrap();
        assert!(report.success());

        let status = service.status().unwrap();
        assert_eq!(status.processed, 2);
        assert_eq!(status.unprocessed, 0);
        assert!(dir
            .path()
            .join("processed/1998/07/1998-07-04_trip_a.jpg")
            .exists());
    }

    #[test]
    fn test_unknown_set_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let service = test_service(dir.path());
        let date = NaiveDate::from_ymd_opt(2000, 1, 1).unwrap();
        assert!(service.correct_date("nope", date).is_err());
    }

    #[test]
    fn test_run_processing_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let service = test_service(dir.path());
        let root = dir.path().join("unprocessed");
        write_jpeg(&root.join("solo.jpg"));

        let summary = service.run_processing().unwrap();
        assert_eq!(summary.scan.inserted, 1);
        assert_eq!(summary.embeddings, 1);
        // A single photo can never form a group.
        assert_eq!(summary.groups, 0);

        // The second pass finds nothing new to do.
        let again = service.run_processing().unwrap();
        assert_eq!(again.scan.inserted, 0);
        assert_eq!(again.embeddings, 0);
    }
}
