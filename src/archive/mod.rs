//! Portable backup bundles
//!
//! A bundle is a zip container holding a verified database snapshot under
//! `dental_clinic.db` and the asset tree under `dental_images/`. The asset
//! folder entry is always written, empty if there is no tree, so every
//! bundle extracts to the same shape.

mod builder;
mod extractor;

pub use builder::{ArchiveBuilder, BundleSummary};
pub use extractor::{extract_bundle, ExtractedBundle};

/// Entry name of the database snapshot inside a bundle
pub const DB_ENTRY: &str = "dental_clinic.db";

/// Folder name of the asset tree inside a bundle
pub const ASSETS_ENTRY: &str = "dental_images";
