//! Maps compiled stack traces back to source locations.

// ============================================================================
// Imports
// ============================================================================

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde_json::{Value, json};
use tracing::debug;
use url::Url;

use crate::error::Result;

use super::frame::Frame;
use super::source_map::SourceMap;

// ============================================================================
// MapperContext
// ============================================================================

/// Package resolution used to shorten mapped source URLs.
#[derive(Debug, Clone, Default)]
pub struct MapperContext {
    /// SDK root; sources under it become `sdk:` URIs.
    pub sdk_root: Option<Url>,
    /// Package roots; sources under one become `package:` URIs.
    pub package_roots: FxHashMap<String, Url>,
}

// ============================================================================
// StackTraceMapper
// ============================================================================

/// Rewrites frames of one compiled suite using its source map.
#[derive(Debug)]
pub struct StackTraceMapper {
    map: SourceMap,
    map_contents: String,
    map_url: Url,
    context: MapperContext,
    /// Sources resolved against the map URL, then shortened.
    resolved_sources: Vec<String>,
}

impl StackTraceMapper {
    /// Parses `map_contents`, served from `map_url`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SourceMap`](crate::Error::SourceMap) if the map is malformed.
    pub fn new(map_contents: String, map_url: Url, context: MapperContext) -> Result<Self> {
        let map = SourceMap::parse(&map_contents)?;
        let resolved_sources = map
            .sources()
            .iter()
            .map(|source| resolve_source(&map_url, source, &context))
            .collect();

        Ok(Self {
            map,
            map_contents,
            map_url,
            context,
            resolved_sources,
        })
    }

    /// Reads and parses the map at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](crate::Error::Io) if the file cannot be read, or
    /// [`Error::SourceMap`](crate::Error::SourceMap) if it is malformed.
    pub async fn load(path: &Path, map_url: Url, context: MapperContext) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path).await?;
        debug!(path = %path.display(), "Loaded source map");
        Self::new(contents, map_url, context)
    }

    /// Maps one frame.
    ///
    /// Returns `None` if the frame has no line or falls in unmapped code.
    #[must_use]
    pub fn map_frame(&self, frame: &Frame) -> Option<Frame> {
        let line = frame.line?.checked_sub(1)?;
        let column = frame.column.unwrap_or(1).saturating_sub(1);
        let original = self.map.lookup(line, column)?.original?;

        let member = original
            .name
            .and_then(|i| self.map.names().get(i))
            .cloned()
            .or_else(|| frame.member.clone());

        Some(Frame {
            member,
            uri: self.resolved_sources.get(original.source)?.clone(),
            line: Some(original.line + 1),
            column: Some(original.column + 1),
        })
    }

    /// Maps every frame of a trace.
    ///
    /// Unmapped frames are dropped; lines that are not frames are kept.
    #[must_use]
    pub fn map_trace(&self, trace: &str) -> String {
        trace
            .lines()
            .filter_map(|line| match Frame::parse(line) {
                Some(frame) => self.map_frame(&frame).map(|mapped| mapped.to_string()),
                None => Some(line.to_string()),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Returns the mapper state sent to the browser with a suite.
    #[must_use]
    pub fn serialize(&self) -> Value {
        let package_roots: serde_json::Map<String, Value> = self
            .context
            .package_roots
            .iter()
            .map(|(name, root)| (name.clone(), Value::String(root.to_string())))
            .collect();

        json!({
            "mapContents": self.map_contents,
            "mapUrl": self.map_url.as_str(),
            "sdkRoot": self.context.sdk_root.as_ref().map(Url::as_str),
            "packageRoots": package_roots,
        })
    }
}

/// Resolves a map source to the URI shown in mapped traces.
fn resolve_source(map_url: &Url, source: &str, context: &MapperContext) -> String {
    let resolved = match map_url.join(source) {
        Ok(url) => url.to_string(),
        Err(_) => return source.to_string(),
    };

    if let Some(sdk) = &context.sdk_root
        && let Some(rest) = resolved.strip_prefix(sdk.as_str())
    {
        return format!("sdk:{}", rest.trim_start_matches('/'));
    }

    let mut roots: Vec<_> = context.package_roots.iter().collect();
    roots.sort_by_key(|(_, root)| std::cmp::Reverse(root.as_str().len()));
    for (name, root) in roots {
        if let Some(rest) = resolved.strip_prefix(root.as_str()) {
            return format!("package:{name}/{}", rest.trim_start_matches('/'));
        }
    }

    resolved
}

// ============================================================================
// StackTraceMaps
// ============================================================================

/// Mappers keyed by suite path.
///
/// Entries are replaced on recompile and only dropped with the session.
#[derive(Debug, Default)]
pub struct StackTraceMaps {
    maps: RwLock<FxHashMap<PathBuf, Arc<StackTraceMapper>>>,
}

impl StackTraceMaps {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the mapper for `path`.
    pub fn insert(&self, path: impl Into<PathBuf>, mapper: StackTraceMapper) {
        self.maps.write().insert(path.into(), Arc::new(mapper));
    }

    /// Returns the mapper for `path`.
    #[must_use]
    pub fn get(&self, path: &Path) -> Option<Arc<StackTraceMapper>> {
        self.maps.read().get(path).cloned()
    }

    /// Returns the number of mappers.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.maps.read().len()
    }

    /// Returns `true` if no mapper is stored.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.maps.read().is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================
