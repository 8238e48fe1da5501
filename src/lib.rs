#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

pub mod attributes;
pub mod error;
pub mod host;
pub mod manifest;
pub mod resolver;
pub mod tags;

pub use attributes::{AttributeMap, AttributeResolver, AttributeValue, TagContext};
pub use error::{ResolverError, ResolverResult};
pub use host::{Host, LocalHost, TemplateContext};
pub use manifest::{Manifest, ManifestCache, ManifestEntry};
pub use resolver::AssetResolver;
pub use tags::is_style_path;
