//! Thumbnail generation for the review workflow.
//!
//! Thumbnails are derived artifacts: generation failures are logged and
//! skipped, never propagated into the scan result.

use anyhow::{Context, Result};
use image::imageops::FilterType;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::ScannerConfig;

/// Generates and refreshes bounded thumbnails alongside a cache directory.
pub struct ThumbnailManager {
    cache_dir: PathBuf,
    size: u32,
}

impl ThumbnailManager {
    pub fn new(cache_dir: PathBuf, config: &ScannerConfig) -> Self {
        Self {
            cache_dir,
            size: config.thumbnail_size,
        }
    }

    fn ensure_cache_dir(&self) -> Result<()> {
        if !self.cache_dir.exists() {
            fs::create_dir_all(&self.cache_dir)?;
        }
        Ok(())
    }

    /// Thumbnail file name mirrors the source: `<stem>_thumb.<ext>`.
    fn cache_path(&self, original: &Path) -> Result<PathBuf> {
        let stem = original
            .file_stem()
            .and_then(|s| s.to_str())
            .context("Source has no file stem")?;
        let ext = original
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or("jpg");
        Ok(self.cache_dir.join(format!("{}_thumb.{}", stem, ext)))
    }

    /// True when a thumbnail exists and is at least as new as the source.
    fn is_fresh(&self, original: &Path, thumb: &Path) -> bool {
        let thumb_mtime = match fs::metadata(thumb).and_then(|m| m.modified()) {
            Ok(t) => t,
            Err(_) => return false,
        };
        match fs::metadata(original).and_then(|m| m.modified()) {
            Ok(source_mtime) => thumb_mtime >= source_mtime,
            // Unreadable source mtime: keep whatever we have.
            Err(_) => true,
        }
    }

    /// Generates a thumbnail unless a fresh one is already cached.
    /// Returns the thumbnail path.
    pub fn generate(&self, original: &Path) -> Result<PathBuf> {
        self.ensure_cache_dir()?;
        let thumb = self.cache_path(original)?;

        if thumb.exists() && self.is_fresh(original, &thumb) {
            return Ok(thumb);
        }

        let img = image::open(original)
            .with_context(|| format!("Failed to open image {:?}", original))?;
        // Lanczos keeps small prints legible at review size.
        let resized = img.resize(self.size, self.size, FilterType::Lanczos3);
        // RGB8 so CMYK and alpha sources still encode as JPEG.
        resized
            .to_rgb8()
            .save_with_format(&thumb, image::ImageFormat::Jpeg)
            .with_context(|| format!("Failed to write thumbnail {:?}", thumb))?;

        Ok(thumb)
    }

    /// Best-effort batch generation. Returns how many thumbnails were
    /// produced or confirmed fresh.
    pub fn generate_batch<P: AsRef<Path>>(&self, paths: &[P]) -> usize {
        let mut generated = 0;
        for path in paths {
            match self.generate(path.as_ref()) {
                Ok(_) => generated += 1,
                Err(e) => {
                    tracing::warn!("Thumbnail failed for {:?}: {:#}", path.as_ref(), e);
                }
            }
        }
        generated
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_manager(dir: &Path) -> ThumbnailManager {
        ThumbnailManager::new(dir.join("thumbs"), &ScannerConfig::default())
    }

    fn write_test_image(path: &Path, w: u32, h: u32) {
        let img = image::RgbImage::from_pixel(w, h, image::Rgb([120, 80, 40]));
        img.save(path).unwrap();
    }

    #[test]
    fn test_generate_bounded_thumbnail() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("photo.jpg");
        write_test_image(&src, 900, 600);

        let manager = test_manager(dir.path());
        let thumb = manager.generate(&src).unwrap();
        assert_eq!(thumb.file_name().unwrap(), "photo_thumb.jpg");

        let (w, h) = image::image_dimensions(&thumb).unwrap();
        assert!(w <= 300 && h <= 300);
        // Aspect ratio preserved, so the long edge hits the bound.
        assert_eq!(w, 300);
        assert_eq!(h, 200);
    }

    #[test]
    fn test_fresh_thumbnail_not_regenerated() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("photo.jpg");
        write_test_image(&src, 400, 400);

        let manager = test_manager(dir.path());
        let thumb = manager.generate(&src).unwrap();
        let first_mtime = fs::metadata(&thumb).unwrap().modified().unwrap();

        let again = manager.generate(&src).unwrap();
        assert_eq!(thumb, again);
        assert_eq!(
            first_mtime,
            fs::metadata(&again).unwrap().modified().unwrap()
        );
    }

    #[test]
    fn test_stale_thumbnail_regenerated() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("photo.jpg");
        write_test_image(&src, 400, 400);

        let manager = test_manager(dir.path());
        let thumb = manager.generate(&src).unwrap();

        // Age the thumbnail behind the source.
        let past = std::time::SystemTime::now() - std::time::Duration::from_secs(3600);
        fs::File::options()
            .write(true)
            .open(&thumb)
            .unwrap()
            .set_modified(past)
            .unwrap();
        write_test_image(&src, 500, 300);

        manager.generate(&src).unwrap();
        let refreshed = fs::metadata(&thumb).unwrap().modified().unwrap();
        assert!(refreshed > past);
        let (w, h) = image::image_dimensions(&thumb).unwrap();
        assert_eq!((w, h), (300, 180));
    }

    #[test]
    fn test_batch_skips_unreadable_files() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.jpg");
        write_test_image(&good, 100, 100);
        let bad = dir.path().join("bad.jpg");
        fs::write(&bad, b"not an image").unwrap();

        let manager = test_manager(dir.path());
        assert_eq!(manager.generate_batch(&[good, bad]), 1);
    }
}
