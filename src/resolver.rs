//! The asset resolver: entry points in, deduplicated ordered tag markup out.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use crate::attributes::{AttributeMap, AttributeResolver, AttributeValue, TagContext};
use crate::error::{ResolverError, ResolverResult};
use crate::host::Host;
use crate::manifest::{Manifest, ManifestCache, ManifestEntry};
use crate::tags::{is_style_path, TagList};

/// Entry identifier of the dev server client bootstrap.
const DEV_CLIENT_ENTRY: &str = "@vite/client";

/// Entry identifier of the React refresh runtime on the dev server.
const REACT_REFRESH_ENTRY: &str = "@react-refresh";

const DEFAULT_BUILD_DIRECTORY: &str = "build";
const DEFAULT_MANIFEST_NAME: &str = "manifest.json";
const DEFAULT_INTEGRITY_KEY: &str = "integrity";
const NONCE_LENGTH: usize = 40;

/// Resolves build-tool entry points into script, stylesheet and preload tags.
///
/// A resolver is configured once through its chained `use_*` methods and then
/// queried with [`resolve`](Self::resolve) or [`asset`](Self::asset). Cloning
/// produces an independent copy carrying the configuration and the preloaded
/// assets recorded so far; hosts that serve many requests from one template
/// environment typically clone a prototype resolver per request.
pub struct AssetResolver {
    host: Arc<dyn Host>,
    manifests: ManifestCache,
    nonce: Option<String>,
    integrity: Option<String>,
    entries: Vec<String>,
    hot_file: Option<PathBuf>,
    build_directory: String,
    manifest_name: String,
    script_tag_resolvers: Vec<AttributeResolver>,
    style_tag_resolvers: Vec<AttributeResolver>,
    preload_tag_resolvers: Vec<AttributeResolver>,
    preloaded: Mutex<BTreeMap<String, String>>,
}

impl AssetResolver {
    /// Create a resolver backed by the given host environment and manifest
    /// cache.
    pub fn new(host: Arc<dyn Host>, manifests: ManifestCache) -> Self {
        Self {
            host,
            manifests,
            nonce: None,
            integrity: Some(DEFAULT_INTEGRITY_KEY.to_string()),
            entries: Vec::new(),
            hot_file: None,
            build_directory: DEFAULT_BUILD_DIRECTORY.to_string(),
            manifest_name: DEFAULT_MANIFEST_NAME.to_string(),
            script_tag_resolvers: Vec::new(),
            style_tag_resolvers: Vec::new(),
            preload_tag_resolvers: Vec::new(),
            preloaded: Mutex::new(BTreeMap::new()),
        }
    }

    /// Apply a Content Security Policy nonce to all generated tags.
    pub fn use_nonce(mut self, nonce: impl Into<String>) -> Self {
        self.nonce = Some(nonce.into());
        self
    }

    /// Generate and apply a random Content Security Policy nonce.
    pub fn use_random_nonce(mut self) -> Self {
        self.nonce = Some(self.host.random_nonce(NONCE_LENGTH));
        self
    }

    /// Use the given manifest key to detect subresource integrity hashes.
    pub fn use_integrity(mut self, key: impl Into<String>) -> Self {
        self.integrity = Some(key.into());
        self
    }

    /// Disable subresource integrity attributes entirely.
    pub fn without_integrity(mut self) -> Self {
        self.integrity = None;
        self
    }

    /// Set the file name of the build manifest.
    pub fn use_manifest(mut self, name: impl Into<String>) -> Self {
        self.manifest_name = name.into();
        self
    }

    /// Set the path of the dev server marker ("hot") file.
    pub fn use_hot_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.hot_file = Some(path.into());
        self
    }

    /// Set the build directory under the public index.
    pub fn use_build_directory(mut self, path: impl Into<String>) -> Self {
        self.build_directory = path.into();
        self
    }

    /// Register a callback resolving additional attributes for script tags.
    pub fn use_script_tag_attributes<F>(mut self, resolver: F) -> Self
    where
        F: Fn(&TagContext<'_>) -> AttributeMap + Send + Sync + 'static,
    {
        self.script_tag_resolvers.push(Arc::new(resolver));
        self
    }

    /// Register a callback resolving additional attributes for style tags.
    pub fn use_style_tag_attributes<F>(mut self, resolver: F) -> Self
    where
        F: Fn(&TagContext<'_>) -> AttributeMap + Send + Sync + 'static,
    {
        self.style_tag_resolvers.push(Arc::new(resolver));
        self
    }

    /// Register a callback resolving additional attributes for preload tags.
    pub fn use_preload_tag_attributes<F>(mut self, resolver: F) -> Self
    where
        F: Fn(&TagContext<'_>) -> AttributeMap + Send + Sync + 'static,
    {
        self.preload_tag_resolvers.push(Arc::new(resolver));
        self
    }

    /// Configure the entry points rendered by the `Display` implementation.
    pub fn with_entries<I, S>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entries = entries.into_iter().map(Into::into).collect();
        self
    }

    /// The configured Content Security Policy nonce, if any.
    pub fn nonce(&self) -> Option<&str> {
        self.nonce.as_deref()
    }

    /// The configured entry points.
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Preload tags emitted so far by this instance, keyed by URL.
    pub fn preloaded_assets(&self) -> BTreeMap<String, String> {
        self.preloaded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The dev server marker file path.
    pub fn hot_file(&self) -> PathBuf {
        self.hot_file
            .clone()
            .unwrap_or_else(|| self.host.index_root().join("hot"))
    }

    /// Whether the dev server is running, i.e. the marker file exists.
    pub fn is_running_hot(&self) -> bool {
        self.hot_file().is_file()
    }

    /// Generate the tags for the given entry points.
    ///
    /// Entry names are interpolated against the host's template context; a
    /// leading `@` (after interpolation) marks an entry optional. Optional
    /// and interpolation-changed entries are kept only when their source
    /// file exists, and such entries are skipped silently when the manifest
    /// does not know them. Plain entries missing from the manifest raise
    /// [`ResolverError::ManifestMiss`].
    ///
    /// In dev mode every tag points at the live dev server and the client
    /// bootstrap is injected first; the manifest is not consulted. In prod
    /// mode the manifest for `build_directory` (defaulting to the configured
    /// one) is loaded and each entry's `imports`/`css` graph is walked,
    /// emitting one preload and one asset tag per distinct output file.
    /// Preload tags precede asset tags and stylesheet tags follow script
    /// tags within each group.
    pub fn resolve<S: AsRef<str>>(
        &self,
        entries: &[S],
        build_directory: Option<&str>,
    ) -> ResolverResult<String> {
        let context = self.host.template_context();
        let mut working: Vec<String> = Vec::with_capacity(entries.len() + 1);
        let mut known_existing: Vec<String> = Vec::new();

        for entry in entries {
            let entry = entry.as_ref();
            let query = self.host.interpolate(entry, &context);
            let optional = query.starts_with('@');
            let query = if optional {
                query[1..].to_string()
            } else {
                query
            };

            if optional || query != entry {
                if self.host.file_exists(&query) {
                    known_existing.push(query.clone());
                    working.push(query);
                } else {
                    debug!(entry, "dropped entry without a source file");
                }
            } else {
                working.push(query);
            }
        }

        if self.is_running_hot() {
            return self.resolve_hot(working);
        }

        let build_directory = build_directory.unwrap_or(&self.build_directory);
        let manifest = self.manifests.load(&self.manifest_path(build_directory))?;

        let mut preloads = TagList::new();
        let mut assets = TagList::new();

        for key in &working {
            let chunk = match manifest.get(key) {
                Some(chunk) => chunk,
                None if known_existing.iter().any(|known| known == key) => continue,
                None => {
                    return Err(ResolverError::ManifestMiss { entry: key.clone() });
                }
            };

            let url = self.chunk_url(build_directory, &chunk.file);
            if !preloads.contains(&chunk.file) {
                if let Some(tag) = self.make_preload_tag(key, &url, Some(chunk), Some(&manifest)) {
                    preloads.push(chunk.file.clone(), tag);
                }
            }
            if !assets.contains(&chunk.file) {
                let tag = self.make_tag(key, &url, Some(chunk), Some(&manifest));
                assets.push(chunk.file.clone(), tag);
            }

            self.resolve_imports(chunk, build_directory, &manifest, &mut assets, &mut preloads)?;
            self.resolve_css(chunk, build_directory, &manifest, &mut assets, &mut preloads);
        }

        preloads.sort_styles_last();
        assets.sort_styles_last();

        Ok(preloads.into_markup() + &assets.into_markup())
    }

    /// Get the URL for a single asset, bypassing tag generation.
    pub fn asset(&self, name: &str, build_directory: Option<&str>) -> ResolverResult<String> {
        if self.is_running_hot() {
            return self.hot_asset(name);
        }

        let build_directory = build_directory.unwrap_or(&self.build_directory);
        let manifest = self.manifests.load(&self.manifest_path(build_directory))?;
        let chunk = manifest
            .get(name)
            .ok_or_else(|| ResolverError::ManifestMiss {
                entry: name.to_string(),
            })?;

        Ok(self.chunk_url(build_directory, &chunk.file))
    }

    /// Generate the React refresh runtime bootstrap script.
    ///
    /// Empty outside dev mode; the refresh runtime only exists on the live
    /// dev server.
    pub fn react_refresh(&self) -> ResolverResult<String> {
        if !self.is_running_hot() {
            return Ok(String::new());
        }

        let runtime = self.hot_asset(REACT_REFRESH_ENTRY)?;
        let mut attributes = AttributeMap::new();
        attributes.insert("type".to_string(), "module".into());
        if let Some(nonce) = &self.nonce {
            attributes.insert("nonce".to_string(), nonce.as_str().into());
        }

        let inner = format!(
            "\nimport RefreshRuntime from '{runtime}'\n\
             RefreshRuntime.injectIntoGlobalHook(window)\n\
             window.$RefreshReg$ = () => {{}}\n\
             window.$RefreshSig$ = () => (type) => type\n\
             window.__vite_plugin_react_preamble_installed__ = true\n"
        );

        Ok(self.host.render_tag("script", &inner, &attributes))
    }

    fn resolve_hot(&self, mut entries: Vec<String>) -> ResolverResult<String> {
        debug!(entries = entries.len(), "dev server running, tags bypass the manifest");
        entries.insert(0, DEV_CLIENT_ENTRY.to_string());

        let mut markup = String::new();
        for entry in &entries {
            let url = self.hot_asset(entry)?;
            markup.push_str(&self.make_tag(entry, &url, None, None));
        }
        Ok(markup)
    }

    fn resolve_imports(
        &self,
        chunk: &ManifestEntry,
        build_directory: &str,
        manifest: &Manifest,
        assets: &mut TagList,
        preloads: &mut TagList,
    ) -> ResolverResult<()> {
        for key in &chunk.imports {
            let import = manifest.get(key).ok_or_else(|| ResolverError::ManifestMiss {
                entry: key.clone(),
            })?;

            if !preloads.contains(&import.file) {
                let url = self.chunk_url(build_directory, &import.file);
                if let Some(tag) = self.make_preload_tag(key, &url, Some(import), Some(manifest)) {
                    preloads.push(import.file.clone(), tag);
                }
            }

            self.resolve_css(import, build_directory, manifest, assets, preloads);
        }
        Ok(())
    }

    fn resolve_css(
        &self,
        chunk: &ManifestEntry,
        build_directory: &str,
        manifest: &Manifest,
        assets: &mut TagList,
        preloads: &mut TagList,
    ) {
        for css in &chunk.css {
            // Stylesheet outputs usually have a record of their own; when they
            // don't, the output path itself stands in as the chunk.
            let fallback;
            let (key, css_chunk) = match manifest.entry_for_file(css) {
                Some(found) => found,
                None => {
                    fallback = ManifestEntry::for_file(css.clone());
                    (css.as_str(), &fallback)
                }
            };

            let url = self.chunk_url(build_directory, &css_chunk.file);
            if !assets.contains(&css_chunk.file) {
                let tag = self.make_tag(key, &url, Some(css_chunk), Some(manifest));
                assets.push(css_chunk.file.clone(), tag);
            }
            if !preloads.contains(&css_chunk.file) {
                if let Some(tag) = self.make_preload_tag(key, &url, Some(css_chunk), Some(manifest))
                {
                    preloads.push(css_chunk.file.clone(), tag);
                }
            }
        }
    }

    fn make_tag(
        &self,
        entry: &str,
        url: &str,
        chunk: Option<&ManifestEntry>,
        manifest: Option<&Manifest>,
    ) -> String {
        let context = TagContext {
            entry,
            url,
            chunk,
            manifest,
        };

        if is_style_path(url) {
            self.make_style_tag(url, self.resolve_style_tag_attributes(&context))
        } else {
            self.make_script_tag(url, self.resolve_script_tag_attributes(&context))
        }
    }

    fn make_script_tag(&self, url: &str, attributes: AttributeMap) -> String {
        let mut merged = AttributeMap::new();
        merged.insert("type".to_string(), "module".into());
        merged.insert("src".to_string(), url.into());
        if let Some(nonce) = &self.nonce {
            merged.insert("nonce".to_string(), nonce.as_str().into());
        }
        merged.extend(attributes);

        self.host.render_tag("script", "", &merged)
    }

    fn make_style_tag(&self, url: &str, attributes: AttributeMap) -> String {
        let mut merged = AttributeMap::new();
        merged.insert("rel".to_string(), "stylesheet".into());
        merged.insert("href".to_string(), url.into());
        if let Some(nonce) = &self.nonce {
            merged.insert("nonce".to_string(), nonce.as_str().into());
        }
        merged.extend(attributes);

        self.host.render_tag("link", "", &merged)
    }

    /// Build a preload tag unless the URL was already preloaded by this
    /// instance, in an earlier call or this one.
    fn make_preload_tag(
        &self,
        entry: &str,
        url: &str,
        chunk: Option<&ManifestEntry>,
        manifest: Option<&Manifest>,
    ) -> Option<String> {
        let context = TagContext {
            entry,
            url,
            chunk,
            manifest,
        };
        let attributes = self.resolve_preload_tag_attributes(&context);

        let mut preloaded = self
            .preloaded
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if preloaded.contains_key(url) {
            return None;
        }

        let tag = self.host.render_tag("link", "", &attributes);
        preloaded.insert(url.to_string(), tag.clone());
        Some(tag)
    }

    fn resolve_script_tag_attributes(&self, context: &TagContext<'_>) -> AttributeMap {
        self.resolve_attributes(&self.script_tag_resolvers, context)
    }

    fn resolve_style_tag_attributes(&self, context: &TagContext<'_>) -> AttributeMap {
        self.resolve_attributes(&self.style_tag_resolvers, context)
    }

    fn resolve_attributes(
        &self,
        resolvers: &[AttributeResolver],
        context: &TagContext<'_>,
    ) -> AttributeMap {
        let mut attributes = self.integrity_attributes(context);
        for resolver in resolvers {
            attributes.extend((**resolver)(context));
        }
        attributes
    }

    fn resolve_preload_tag_attributes(&self, context: &TagContext<'_>) -> AttributeMap {
        let mut attributes = AttributeMap::new();
        let crossorigin_source = if is_style_path(context.url) {
            attributes.insert("rel".to_string(), "preload".into());
            attributes.insert("as".to_string(), "style".into());
            self.resolve_style_tag_attributes(context)
        } else {
            attributes.insert("rel".to_string(), "modulepreload".into());
            self.resolve_script_tag_attributes(context)
        };

        attributes.insert("href".to_string(), context.url.into());
        if let Some(nonce) = &self.nonce {
            attributes.insert("nonce".to_string(), nonce.as_str().into());
        }
        attributes.insert(
            "crossorigin".to_string(),
            crossorigin_source
                .get("crossorigin")
                .cloned()
                .unwrap_or(AttributeValue::Bool(false)),
        );
        attributes.extend(self.integrity_attributes(context));

        for resolver in &self.preload_tag_resolvers {
            attributes.extend((**resolver)(context));
        }
        attributes
    }

    fn integrity_attributes(&self, context: &TagContext<'_>) -> AttributeMap {
        let mut attributes = AttributeMap::new();
        if let Some(key) = &self.integrity {
            let value = context.chunk.and_then(|chunk| chunk.integrity_hash(key));
            attributes.insert(
                "integrity".to_string(),
                match value {
                    Some(hash) => hash.into(),
                    None => false.into(),
                },
            );
        }
        attributes
    }

    fn manifest_path(&self, build_directory: &str) -> PathBuf {
        self.host
            .index_root()
            .join(build_directory)
            .join(&self.manifest_name)
    }

    fn chunk_url(&self, build_directory: &str, file: &str) -> String {
        self.host.build_url(&format!("{build_directory}/{file}"))
    }

    fn hot_asset(&self, asset: &str) -> ResolverResult<String> {
        let path = self.hot_file();
        let contents =
            fs::read_to_string(&path).map_err(|source| ResolverError::HotFile { path, source })?;

        Ok(format!("{}/{asset}", contents.trim_end()))
    }
}

impl Clone for AssetResolver {
    fn clone(&self) -> Self {
        Self {
            host: self.host.clone(),
            manifests: self.manifests.clone(),
            nonce: self.nonce.clone(),
            integrity: self.integrity.clone(),
            entries: self.entries.clone(),
            hot_file: self.hot_file.clone(),
            build_directory: self.build_directory.clone(),
            manifest_name: self.manifest_name.clone(),
            script_tag_resolvers: self.script_tag_resolvers.clone(),
            style_tag_resolvers: self.style_tag_resolvers.clone(),
            preload_tag_resolvers: self.preload_tag_resolvers.clone(),
            preloaded: Mutex::new(self.preloaded_assets()),
        }
    }
}

impl fmt::Display for AssetResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let markup = self.resolve(&self.entries, None).map_err(|_| fmt::Error)?;
        f.write_str(&markup)
    }
}
