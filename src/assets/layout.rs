//! Asset tree layout
//!
//! Canonical: `<root>/<patient_id>/<tooth_number>/<category>/<file>`,
//! recorded in the database as `dental_images/<patient_id>/<tooth_number>/<category>/<file>`.
//!
//! Legacy (by display name): `<root>/<sanitized name>/<category>/<file>`.

use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use rusqlite::types::Value;

/// Prefix of every recorded asset path
pub const ASSET_PATH_PREFIX: &str = "dental_images";

/// Categories accepted when registering orphan files
pub const IMAGE_CATEGORIES: &[&str] = &["before", "after", "xray", "clinical"];

/// Category used when a row has none
pub const DEFAULT_CATEGORY: &str = "other";

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp"];

/// Valid tooth numbers
pub const TOOTH_RANGE: std::ops::RangeInclusive<i64> = 1..=32;

/// Keys that locate one asset file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetKey {
    pub patient_id: String,
    pub tooth_number: i64,
    pub category: String,
    pub filename: String,
}

impl AssetKey {
    pub fn new(
        patient_id: impl Into<String>,
        tooth_number: i64,
        category: Option<&str>,
        filename: impl Into<String>,
    ) -> Self {
        let category = match category {
            Some(c) if !c.trim().is_empty() => c.to_string(),
            _ => DEFAULT_CATEGORY.to_string(),
        };
        Self {
            patient_id: patient_id.into(),
            tooth_number,
            category,
            filename: filename.into(),
        }
    }

    /// True when every segment is one plain path component
    ///
    /// Keys read from a restored database are untrusted; a key that fails
    /// this check must not be joined onto the asset root.
    pub fn is_contained(&self) -> bool {
        is_plain_segment(&self.patient_id)
            && is_plain_segment(&self.category)
            && is_plain_segment(&self.filename)
    }

    /// Path stored in `image_path`
    pub fn recorded_path(&self) -> String {
        format!(
            "{}/{}/{}/{}/{}",
            ASSET_PATH_PREFIX, self.patient_id, self.tooth_number, self.category, self.filename
        )
    }

    /// Location under the asset root
    pub fn canonical_path(&self, root: &Path) -> PathBuf {
        root.join(&self.patient_id)
            .join(self.tooth_number.to_string())
            .join(&self.category)
            .join(&self.filename)
    }

    /// Location under the legacy by-name layout
    pub fn legacy_path(&self, root: &Path, full_name: Option<&str>) -> PathBuf {
        root.join(legacy_folder(full_name, &self.patient_id))
            .join(&self.category)
            .join(&self.filename)
    }

    /// Parse a path relative to the asset root
    ///
    /// Requires exactly four components, a tooth number in range and a
    /// known category.
    pub fn parse_relative(relative: &Path) -> Option<Self> {
        let parts: Vec<&str> = relative
            .components()
            .map(|c| match c {
                Component::Normal(s) => s.to_str(),
                _ => None,
            })
            .collect::<Option<Vec<_>>>()?;
        let [patient, tooth, category, filename] = parts.as_slice() else {
            return None;
        };

        let tooth: i64 = tooth.parse().ok()?;
        if !TOOTH_RANGE.contains(&tooth) || !IMAGE_CATEGORIES.contains(category) {
            return None;
        }
        Some(Self::new(*patient, tooth, Some(*category), *filename))
    }
}

fn strip_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[^a-zA-Z0-9\x{0600}-\x{06FF}\s]").expect("static pattern"))
}

fn whitespace_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\s+").expect("static pattern"))
}

/// Folder name a patient had under the legacy layout
pub fn legacy_folder(full_name: Option<&str>, patient_id: &str) -> String {
    let fallback = format!("Patient_{}", patient_id);
    let name = match full_name {
        Some(n) if !n.is_empty() => n,
        _ => fallback.as_str(),
    };
    let stripped = strip_pattern().replace_all(name, "");
    whitespace_pattern().replace_all(&stripped, "_").into_owned()
}

/// A single `Component::Normal` with no separator of either platform
pub fn is_plain_segment(segment: &str) -> bool {
    if segment.is_empty() || segment.contains(['/', '\\', '\0']) {
        return false;
    }
    let mut components = Path::new(segment).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// True for files with an image extension, case-insensitive
pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.iter().any(|x| x.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

/// Render an SQLite key value as a path segment
pub fn key_segment(value: &Value) -> Option<String> {
    match value {
        Value::Integer(i) => Some(i.to_string()),
        Value::Text(s) if !s.is_empty() => Some(s.clone()),
        Value::Real(f) if f.fract() == 0.0 => Some((*f as i64).to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorded_and_canonical_paths() {
        let key = AssetKey::new("p-7", 14, Some("xray"), "scan.png");
        assert_eq!(key.recorded_path(), "dental_images/p-7/14/xray/scan.png");
        assert_eq!(
            key.canonical_path(Path::new("/imgs")),
            PathBuf::from("/imgs/p-7/14/xray/scan.png")
        );
    }

    #[test]
    fn test_missing_category_defaults() {
        let key = AssetKey::new("3", 8, None, "a.jpg");
        assert_eq!(key.category, "other");
        assert_eq!(AssetKey::new("3", 8, Some("  "), "a.jpg").category, "other");
    }

    #[test]
    fn test_legacy_folder_sanitizing() {
        assert_eq!(legacy_folder(Some("Lina  Haddad"), "1"), "Lina_Haddad");
        assert_eq!(legacy_folder(Some("O'Brien, Sam!"), "1"), "OBrien_Sam");
        assert_eq!(legacy_folder(Some("سارة أحمد"), "1"), "سارة_أحمد");
        assert_eq!(legacy_folder(None, "42"), "Patient_42");
        assert_eq!(legacy_folder(Some(""), "42"), "Patient_42");
    }

    #[test]
    fn test_parse_relative() {
        let key = AssetKey::parse_relative(Path::new("12/30/before/a.JPG")).unwrap();
        assert_eq!(key.patient_id, "12");
        assert_eq!(key.tooth_number, 30);

        assert!(AssetKey::parse_relative(Path::new("12/33/before/a.jpg")).is_none());
        assert!(AssetKey::parse_relative(Path::new("12/0/before/a.jpg")).is_none());
        assert!(AssetKey::parse_relative(Path::new("12/3/selfie/a.jpg")).is_none());
        assert!(AssetKey::parse_relative(Path::new("12/3/a.jpg")).is_none());
        assert!(AssetKey::parse_relative(Path::new("12/x/before/a.jpg")).is_none());
    }

    #[test]
    fn test_plain_segments() {
        assert!(is_plain_segment("p-7"));
        assert!(is_plain_segment("scan.png"));
        assert!(!is_plain_segment(""));
        assert!(!is_plain_segment(".."));
        assert!(!is_plain_segment("."));
        assert!(!is_plain_segment("../../escaped"));
        assert!(!is_plain_segment("a/b"));
        assert!(!is_plain_segment("a\\b"));
        assert!(!is_plain_segment("/abs"));

        assert!(AssetKey::new("1", 3, Some("xray"), "a.png").is_contained());
        assert!(!AssetKey::new("1", 3, Some("../../../../escaped"), "a.png").is_contained());
        assert!(!AssetKey::new("..", 3, Some("xray"), "a.png").is_contained());
    }

    #[test]
    fn test_is_image_file() {
        assert!(is_image_file(Path::new("a.PNG")));
        assert!(is_image_file(Path::new("dir/b.webp")));
        assert!(!is_image_file(Path::new("notes.txt")));
        assert!(!is_image_file(Path::new("noext")));
    }

    #[test]
    fn test_key_segment() {
        assert_eq!(key_segment(&Value::Integer(5)).as_deref(), Some("5"));
        assert_eq!(key_segment(&Value::Text("abc".into())).as_deref(), Some("abc"));
        assert_eq!(key_segment(&Value::Null), None);
    }
}
