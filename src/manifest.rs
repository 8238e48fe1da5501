//! Loading, caching and querying Vite build manifests.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use tracing::debug;

use crate::error::{ResolverError, ResolverResult};

/// One chunk descriptor within a build manifest.
///
/// Fields beyond `file`, `css` and `imports` (integrity hashes, `src`,
/// `isEntry` and whatever else the build pipeline records) are kept in a
/// flattened side table so the integrity key stays configurable.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ManifestEntry {
    /// Output path of the chunk, relative to the build directory.
    pub file: String,
    /// Stylesheet output paths associated with the chunk.
    #[serde(default)]
    pub css: Vec<String>,
    /// Manifest keys this chunk imports, in dependency order.
    #[serde(default)]
    pub imports: Vec<String>,
    #[serde(flatten)]
    extra: BTreeMap<String, serde_json::Value>,
}

impl ManifestEntry {
    /// Build a chunk descriptor for a bare output file.
    ///
    /// Used when a `css` reference has no backing manifest record of its own:
    /// the output path doubles as the chunk identity.
    pub fn for_file(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            ..Self::default()
        }
    }

    /// The subresource integrity hash stored under the given manifest key.
    pub fn integrity_hash(&self, key: &str) -> Option<&str> {
        self.extra.get(key)?.as_str()
    }

    /// Any additional manifest field recorded for this chunk.
    pub fn meta(&self, key: &str) -> Option<&serde_json::Value> {
        self.extra.get(key)
    }
}

/// A parsed build manifest: entry keys mapped to chunk descriptors.
///
/// Key order matches the JSON document, which matters for reverse lookups:
/// resolving a `css` output path picks the first record whose `file` matches,
/// in manifest order.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    entries: Vec<(String, ManifestEntry)>,
    index: HashMap<String, usize>,
}

impl Manifest {
    /// Look up a chunk by its manifest key.
    pub fn get(&self, key: &str) -> Option<&ManifestEntry> {
        self.index.get(key).map(|&at| &self.entries[at].1)
    }

    /// Find the first record whose output `file` matches the given path.
    pub fn entry_for_file(&self, file: &str) -> Option<(&str, &ManifestEntry)> {
        self.entries
            .iter()
            .find(|(_, entry)| entry.file == file)
            .map(|(key, entry)| (key.as_str(), entry))
    }

    /// Iterate over keys and chunks in manifest order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ManifestEntry)> {
        self.entries.iter().map(|(key, entry)| (key.as_str(), entry))
    }

    /// Number of records in the manifest.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the manifest contains no records.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn insert(&mut self, key: String, entry: ManifestEntry) {
        match self.index.get(&key) {
            Some(&at) => self.entries[at].1 = entry,
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, entry));
            }
        }
    }
}

impl<'de> Deserialize<'de> for Manifest {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ManifestVisitor;

        impl<'de> Visitor<'de> for ManifestVisitor {
            type Value = Manifest;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("a map of entry names to chunk descriptors")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut manifest = Manifest::default();
                while let Some((key, entry)) = map.next_entry::<String, ManifestEntry>()? {
                    manifest.insert(key, entry);
                }
                Ok(manifest)
            }
        }

        deserializer.deserialize_map(ManifestVisitor)
    }
}

/// Shared cache of parsed manifests, keyed by resolved manifest file path.
///
/// One handle is owned by a long-lived application context and cloned into
/// every resolver instance. A manifest is read and parsed at most once per
/// path for the process lifetime; build output is static while the process
/// runs, so the cache is never invalidated. Two workers racing to populate
/// the same path both parse identical content and the overwrite is benign.
#[derive(Debug, Clone, Default)]
pub struct ManifestCache {
    inner: Arc<RwLock<HashMap<PathBuf, Arc<Manifest>>>>,
}

impl ManifestCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the manifest at the given path, reading it on first access.
    pub fn load(&self, path: &Path) -> ResolverResult<Arc<Manifest>> {
        if let Some(manifest) = self
            .inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
        {
            return Ok(manifest.clone());
        }

        let raw = fs::read_to_string(path).map_err(|source| match source.kind() {
            ErrorKind::NotFound => ResolverError::ManifestNotFound {
                path: path.to_path_buf(),
            },
            _ => ResolverError::ManifestRead {
                path: path.to_path_buf(),
                source,
            },
        })?;

        let manifest: Manifest =
            serde_json::from_str(&raw).map_err(|source| ResolverError::ManifestParse {
                path: path.to_path_buf(),
                source,
            })?;
        debug!(path = %path.display(), entries = manifest.len(), "cached build manifest");

        let manifest = Arc::new(manifest);
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_path_buf(), manifest.clone());

        Ok(manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const MANIFEST_JSON: &str = r#"{
        "zebra.js": {"file": "zebra.11aa22.js"},
        "main.js": {
            "file": "main.33bb44.js",
            "css": ["main.33bb44.css"],
            "imports": ["zebra.js"],
            "integrity": "sha384-abc",
            "isEntry": true
        },
        "main.css": {"file": "main.33bb44.css"}
    }"#;

    #[test]
    fn preserves_manifest_key_order() {
        let manifest: Manifest = serde_json::from_str(MANIFEST_JSON).expect("manifest parses");
        let keys: Vec<&str> = manifest.iter().map(|(key, _)| key).collect();
        assert_eq!(keys, vec!["zebra.js", "main.js", "main.css"]);
    }

    #[test]
    fn exposes_flattened_extra_fields() {
        let manifest: Manifest = serde_json::from_str(MANIFEST_JSON).expect("manifest parses");
        let chunk = manifest.get("main.js").expect("main.js present");

        assert_eq!(chunk.integrity_hash("integrity"), Some("sha384-abc"));
        assert_eq!(chunk.integrity_hash("sri"), None);
        assert_eq!(
            chunk.meta("isEntry").and_then(|value| value.as_bool()),
            Some(true)
        );
    }

    #[test]
    fn finds_first_record_by_output_file() {
        let manifest: Manifest = serde_json::from_str(MANIFEST_JSON).expect("manifest parses");
        let (key, chunk) = manifest
            .entry_for_file("main.33bb44.css")
            .expect("css record present");

        assert_eq!(key, "main.css");
        assert_eq!(chunk.file, "main.33bb44.css");
        assert!(manifest.entry_for_file("unknown.css").is_none());
    }

    #[test]
    fn cache_parses_each_path_once() {
        let temp = tempdir().expect("failed to create temp dir");
        let path = temp.path().join("manifest.json");
        fs::write(&path, MANIFEST_JSON).expect("failed to write manifest");

        let cache = ManifestCache::new();
        let first = cache.load(&path).expect("first load succeeds");
        let second = cache.load(&path).expect("second load succeeds");

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.len(), 3);
    }

    #[test]
    fn missing_manifest_is_reported_as_not_found() {
        let temp = tempdir().expect("failed to create temp dir");
        let path = temp.path().join("manifest.json");

        let err = ManifestCache::new()
            .load(&path)
            .expect_err("missing manifest must fail");
        assert!(matches!(err, ResolverError::ManifestNotFound { .. }));
    }

    #[test]
    fn malformed_manifest_is_reported_as_parse_failure() {
        let temp = tempdir().expect("failed to create temp dir");
        let path = temp.path().join("manifest.json");
        fs::write(&path, "not json").expect("failed to write manifest");

        let err = ManifestCache::new()
            .load(&path)
            .expect_err("malformed manifest must fail");
        assert!(matches!(err, ResolverError::ManifestParse { .. }));
    }
}
