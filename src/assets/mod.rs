//! Asset tree layout, post-restore reconciliation and orphan registration

mod layout;
mod reconciler;
mod sync;

pub use layout::{
    is_image_file, key_segment, legacy_folder, AssetKey, ASSET_PATH_PREFIX, DEFAULT_CATEGORY,
    IMAGE_CATEGORIES, IMAGE_EXTENSIONS, TOOTH_RANGE,
};
pub use reconciler::{ImageReconciler, ReconcileSummary};
pub use sync::{synchronize_assets, SyncFailure, SyncSummary};
