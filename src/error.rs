//! Error types shared across the resolver.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for resolver operations.
pub type ResolverResult<T> = Result<T, ResolverError>;

/// Errors raised while resolving entries against a build manifest.
///
/// Build artifacts are assumed to be static and correctly produced before the
/// resolver runs, so every variant is fatal: there are no retries and no
/// fallbacks. The embedding application decides what a failed resolution
/// means for the rendered response.
#[derive(Error, Debug)]
pub enum ResolverError {
    /// The manifest file does not exist at the expected path.
    #[error("Vite manifest not found at: {}", .path.display())]
    ManifestNotFound {
        /// Path where the manifest was expected.
        path: PathBuf,
    },

    /// The manifest file exists but could not be read.
    #[error("failed to read Vite manifest at {}: {}", .path.display(), .source)]
    ManifestRead {
        /// Path of the unreadable manifest.
        path: PathBuf,
        /// Source I/O error.
        source: std::io::Error,
    },

    /// The manifest file is not valid manifest JSON.
    #[error("failed to parse Vite manifest at {}: {}", .path.display(), .source)]
    ManifestParse {
        /// Path of the malformed manifest.
        path: PathBuf,
        /// Source parse error.
        source: serde_json::Error,
    },

    /// A requested or imported key is absent from an otherwise valid manifest.
    #[error("unable to locate file in Vite manifest: {entry}")]
    ManifestMiss {
        /// The offending entry or import key.
        entry: String,
    },

    /// The dev server marker file exists but its contents could not be read.
    #[error("failed to read Vite hot file at {}: {}", .path.display(), .source)]
    HotFile {
        /// Path of the marker file.
        path: PathBuf,
        /// Source I/O error.
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_miss_names_the_offending_entry() {
        let err = ResolverError::ManifestMiss {
            entry: "src/missing.js".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "unable to locate file in Vite manifest: src/missing.js"
        );
    }

    #[test]
    fn manifest_not_found_names_the_expected_path() {
        let err = ResolverError::ManifestNotFound {
            path: PathBuf::from("public/build/manifest.json"),
        };
        assert_eq!(
            err.to_string(),
            "Vite manifest not found at: public/build/manifest.json"
        );
    }
}
