//! Asset resolver: pure lookup from asset/collection ID to metadata,
//! and URI resolution for `catalog://` references. The catalog/ingest
//! database itself is out of scope; this module defines the narrow
//! capability interface the rest of the runtime depends on and an
//! in-memory implementation suitable for tests and the mock grid.

use dashmap::DashMap;

use crate::error::{RetrovueError, Result};
use crate::model::{AssetKind, AssetMetadata};

/// Stateless lookup capability. Implementors may cache internally; callers
/// are not required to.
pub trait AssetResolver: Send + Sync {
    fn resolve_asset(&self, asset_id: &str) -> Result<AssetMetadata>;

    /// Resolve a `catalog://<id>` URI to a local filesystem path. On
    /// failure, returns the original URI unchanged — the producer will
    /// then fail fast when it opens the file. This never errors.
    fn resolve_uri(&self, uri: &str) -> String;
}

/// In-memory catalog, keyed by asset ID. Grounded in
/// `CatalogAssetResolver`'s `_uri_cache`: resolved URIs are cached so
/// repeated lookups for the same asset across a compiled day's blocks don't
/// re-hit the catalog collaborator.
pub struct InMemoryAssetResolver {
    catalog: DashMap<String, AssetMetadata>,
    uri_cache: DashMap<String, String>,
}

impl InMemoryAssetResolver {
    pub fn new() -> Self {
        Self {
            catalog: DashMap::new(),
            uri_cache: DashMap::new(),
        }
    }

    pub fn insert(&self, asset: AssetMetadata) {
        self.catalog.insert(asset.asset_id.clone(), asset);
    }

    pub fn with_assets(assets: Vec<AssetMetadata>) -> Self {
        let resolver = Self::new();
        for asset in assets {
            resolver.insert(asset);
        }
        resolver
    }

    /// Children of a collection, in their declared order.
    pub fn collection_children(&self, collection_id: &str) -> Result<Vec<String>> {
        let entry = self
            .catalog
            .get(collection_id)
            .ok_or_else(|| RetrovueError::AssetResolution(format!("unknown collection: {collection_id}")))?;
        if entry.kind != AssetKind::Collection {
            return Err(RetrovueError::AssetResolution(format!(
                "asset {collection_id} is not a collection"
            )));
        }
        Ok(entry.children.clone())
    }
}

impl Default for InMemoryAssetResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl AssetResolver for InMemoryAssetResolver {
    fn resolve_asset(&self, asset_id: &str) -> Result<AssetMetadata> {
        self.catalog
            .get(asset_id)
            .map(|r| r.clone())
            .ok_or_else(|| RetrovueError::AssetResolution(format!("unknown asset: {asset_id}")))
    }

    fn resolve_uri(&self, uri: &str) -> String {
        if let Some(cached) = self.uri_cache.get(uri) {
            return cached.clone();
        }
        let resolved = if let Some(id) = uri.strip_prefix("catalog://") {
            match self.catalog.get(id) {
                Some(asset) => asset.uri.clone(),
                None => {
                    tracing::warn!(uri, "catalog URI did not resolve, passing through unchanged");
                    uri.to_string()
                }
            }
        } else {
            uri.to_string()
        };
        self.uri_cache.insert(uri.to_string(), resolved.clone());
        resolved
    }
}
