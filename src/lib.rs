//! Photodate: ingestion, transactional date correction and similarity
//! grouping for scanned photo libraries.
//!
//! Scanned prints arrive as loose files named by the scanner, often with
//! `_a`/`_b` front/back pairs. This crate walks the incoming tree, pairs
//! files into sets, lets an operator stamp each set with its real capture
//! date (with backup and rollback around every file mutation), relocates
//! corrected photos into a `YYYY/MM` archive, and periodically groups
//! visually similar photos to speed up dating whole batches at once.

pub mod cache;
pub mod config;
pub mod corrector;
pub mod db;
pub mod logging;
pub mod pairing;
pub mod scanner;
pub mod scheduler;
pub mod service;
pub mod similarity;

pub use config::Config;
pub use service::PhotoService;
