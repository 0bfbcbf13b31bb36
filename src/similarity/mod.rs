//! Similarity pipeline: feature extraction for base photos followed by a
//! full regrouping pass.

pub mod clustering;
pub mod features;

use anyhow::Result;
use rayon::prelude::*;
use std::path::Path;

use crate::config::Config;
use crate::db::Database;

pub use clustering::find_similar_groups;
pub use features::extract_features;

/// Embedding kind stored by this pipeline.
pub const EMBEDDING_KIND: &str = "combined";

pub struct SimilarityAnalyzer {
    config: Config,
}

impl SimilarityAnalyzer {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Extracts features for base photos that have none yet. Missing or
    /// unreadable files are skipped with a warning. Returns the number of
    /// embeddings stored.
    pub fn compute_missing_embeddings(&self, db: &Database) -> Result<usize> {
        let pending = db.photos_needing_embedding(EMBEDDING_KIND)?;
        if pending.is_empty() {
            return Ok(0);
        }
        tracing::info!("Extracting features for {} photos", pending.len());

        let extracted: Vec<(i64, Vec<f32>)> = pending
            .par_iter()
            .filter_map(|(photo_id, path)| {
                match features::extract_features(Path::new(path)) {
                    Ok(embedding) => Some((*photo_id, embedding)),
                    Err(e) => {
                        tracing::warn!("Feature extraction skipped for {}: {:#}", path, e);
                        None
                    }
                }
            })
            .collect();

        for (photo_id, embedding) in &extracted {
            db.store_embedding(*photo_id, EMBEDDING_KIND, embedding)?;
        }
        Ok(extracted.len())
    }

    /// Full regroup: clusters every stored embedding and replaces the
    /// persisted groups with the result. Returns the group count.
    pub fn regroup(&self, db: &Database) -> Result<usize> {
        let records = db.embeddings(EMBEDDING_KIND)?;
        let groups = find_similar_groups(
            &records,
            self.config.similarity.eps,
            self.config.similarity.min_samples,
        );
        db.replace_groups(&groups)?;
        tracing::info!(
            "Similarity pass: {} embeddings, {} groups",
            records.len(),
            groups.len()
        );
        Ok(groups.len())
    }

    /// Extraction plus regroup, the scheduled background unit of work.
    pub fn run(&self, db: &Database) -> Result<usize> {
        self.compute_missing_embeddings(db)?;
        self.regroup(db)
    }
}
