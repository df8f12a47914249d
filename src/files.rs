use crate::batch::BatchReport;
use crate::models::ListingResult;
use eyre::{Result, WrapErr};
use std::path::PathBuf;

/// Flat-file persistence for listings and batch summaries. One JSON document
/// per successful product, optional raw-reply capture, one summary per run.
pub struct FileManager {
    output_dir: PathBuf,
}

impl FileManager {
    pub fn create(output_dir: impl Into<PathBuf>) -> Result<Self> {
        let output_dir = output_dir.into();
        std::fs::create_dir_all(&output_dir)
            .wrap_err_with(|| format!("cannot create output dir {}", output_dir.display()))?;
        Ok(Self { output_dir })
    }

    pub fn save_listing(&self, listing: &ListingResult) -> Result<PathBuf> {
        let path = self
            .output_dir
            .join(format!("product_{}.json", listing.product_id));
        let json = serde_json::to_string_pretty(listing)?;
        std::fs::write(&path, json)
            .wrap_err_with(|| format!("cannot write {}", path.display()))?;
        Ok(path)
    }

    pub fn save_raw_response(&self, product_id: &str, raw: &str) -> Result<PathBuf> {
        let path = self
            .output_dir
            .join(format!("product_{product_id}_raw.txt"));
        std::fs::write(&path, raw)
            .wrap_err_with(|| format!("cannot write {}", path.display()))?;
        Ok(path)
    }

    pub fn save_report(&self, report: &BatchReport) -> Result<PathBuf> {
        let path = self.output_dir.join("summary.json");
        let json = serde_json::to_string_pretty(report)?;
        std::fs::write(&path, json)
            .wrap_err_with(|| format!("cannot write {}", path.display()))?;
        Ok(path)
    }
}
