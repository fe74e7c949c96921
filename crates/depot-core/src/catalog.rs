//! Catalog index - per-repository listings behind a TTL cache.
//!
//! Listings are normalized into [`CatalogEntry`] at this boundary. A listing
//! that cannot be parsed yields an empty catalog plus a recorded warning so
//! one broken repository never blocks the others.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use depot_schema::{
    CatalogEntry, CatalogFormat, GameId, RemoteFile, RepoKey, RepositoryDescriptor, Sha256Digest,
    VersionMarker,
};
use serde_json::{Map, Value};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::io::transport::Fetch;
use crate::registry::{SourceRegistry, locations_for};

/// Default time a fetched listing stays fresh.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

const NAME_KEYS: &[&str] = &["name", "title", "game"];
const ID_KEYS: &[&str] = &["id", "appid", "app_id", "game_id"];
const FILES_KEYS: &[&str] = &["files", "manifest", "depots"];
const VERSION_KEYS: &[&str] = &["version", "updated", "update_date", "last_modified"];
const PATH_KEYS: &[&str] = &["path", "name", "file"];
const SIZE_KEYS: &[&str] = &["size", "bytes"];
const HASH_KEYS: &[&str] = &["sha256", "hash", "checksum"];

#[derive(Debug)]
struct Cached {
    entries: Arc<[CatalogEntry]>,
    fetched_at: Instant,
}

/// Cached, normalized view of every repository's listing.
pub struct CatalogIndex {
    registry: Arc<SourceRegistry>,
    fetcher: Arc<dyn Fetch>,
    ttl: Duration,
    prefer_mirror: bool,
    cache: RwLock<HashMap<RepoKey, Cached>>,
    gates: Mutex<HashMap<RepoKey, Arc<tokio::sync::Mutex<()>>>>,
    warnings: RwLock<HashMap<RepoKey, Vec<String>>>,
}

impl std::fmt::Debug for CatalogIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogIndex")
            .field("ttl", &self.ttl)
            .field("prefer_mirror", &self.prefer_mirror)
            .finish_non_exhaustive()
    }
}

impl CatalogIndex {
    pub fn new(registry: Arc<SourceRegistry>, fetcher: Arc<dyn Fetch>) -> Self {
        Self {
            registry,
            fetcher,
            ttl: DEFAULT_TTL,
            prefer_mirror: false,
            cache: RwLock::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
            warnings: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_mirror_preference(mut self, prefer_mirror: bool) -> Self {
        self.prefer_mirror = prefer_mirror;
        self
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    /// Entries for one repository, served from cache while fresh.
    pub async fn list(
        &self,
        key: &RepoKey,
        cancel: &CancellationToken,
    ) -> Result<Arc<[CatalogEntry]>, EngineError> {
        let repo = self.registry.get(key)?;
        if let Some(entries) = self.fresh(key) {
            return Ok(entries);
        }

        let gate = self.gate(key);
        let _guard = gate.lock().await;
        // Another caller may have filled the cache while we waited.
        if let Some(entries) = self.fresh(key) {
            return Ok(entries);
        }
        self.fetch_and_store(repo, cancel).await
    }

    /// Fetch a repository's listing, bypassing the cache.
    ///
    /// The previous listing stays visible to concurrent readers until the
    /// new one has been fetched and parsed.
    pub async fn refresh(
        &self,
        key: &RepoKey,
        cancel: &CancellationToken,
    ) -> Result<Arc<[CatalogEntry]>, EngineError> {
        let repo = self.registry.get(key)?;
        let gate = self.gate(key);
        let _guard = gate.lock().await;
        self.fetch_and_store(repo, cancel).await
    }

    /// Warnings recorded by the most recent parse of a repository's listing.
    pub fn warnings(&self, key: &RepoKey) -> Vec<String> {
        self.warnings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    fn fresh(&self, key: &RepoKey) -> Option<Arc<[CatalogEntry]>> {
        let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        cache
            .get(key)
            .filter(|c| c.fetched_at.elapsed() < self.ttl)
            .map(|c| Arc::clone(&c.entries))
    }

    fn gate(&self, key: &RepoKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(gates.entry(key.clone()).or_default())
    }

    async fn fetch_and_store(
        &self,
        repo: &RepositoryDescriptor,
        cancel: &CancellationToken,
    ) -> Result<Arc<[CatalogEntry]>, EngineError> {
        let locations = locations_for(repo, &repo.catalog_path, self.prefer_mirror);
        debug!(repo = %repo.key, "fetching catalog");
        let fetched = self
            .fetcher
            .fetch(&locations, cancel)
            .await
            .map_err(|e| EngineError::from_transport(&repo.key, e))?;

        let (entries, warnings) = parse_listing(repo, &fetched.body, Utc::now());
        for w in &warnings {
            warn!(repo = %repo.key, "{w}");
        }
        info!(repo = %repo.key, entries = entries.len(), source = %fetched.url, "catalog loaded");

        let entries: Arc<[CatalogEntry]> = entries.into();
        self.warnings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(repo.key.clone(), warnings);
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                repo.key.clone(),
                Cached {
                    entries: Arc::clone(&entries),
                    fetched_at: Instant::now(),
                },
            );
        Ok(entries)
    }
}

/// Normalize a raw listing document into catalog entries.
///
/// Never fails: malformed documents produce no entries and a warning, and
/// individual invalid entries are skipped with a warning each.
pub fn parse_listing(
    repo: &RepositoryDescriptor,
    body: &[u8],
    retrieved_at: DateTime<Utc>,
) -> (Vec<CatalogEntry>, Vec<String>) {
    let mut warnings = Vec::new();
    let document: Value = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(e) => {
            warnings.push(format!("malformed listing: {e}"));
            return (Vec::new(), warnings);
        }
    };

    let raw: Vec<(Option<GameId>, &Value)> = match (repo.format, &document) {
        (CatalogFormat::Flat, Value::Array(items)) => items.iter().map(|v| (None, v)).collect(),
        (CatalogFormat::Flat, Value::Object(obj)) => match obj.get("entries") {
            Some(Value::Array(items)) => items.iter().map(|v| (None, v)).collect(),
            _ => {
                warnings.push("malformed listing: expected an array of entries".to_string());
                return (Vec::new(), warnings);
            }
        },
        (CatalogFormat::Keyed, Value::Object(obj)) => obj
            .iter()
            .map(|(k, v)| (k.parse::<GameId>().ok(), v))
            .collect(),
        (format, _) => {
            warnings.push(format!("malformed listing: unexpected top-level shape for {format:?} format"));
            return (Vec::new(), warnings);
        }
    };

    let mut entries = Vec::with_capacity(raw.len());
    for (i, (keyed_id, value)) in raw.into_iter().enumerate() {
        match normalize_entry(&repo.key, keyed_id, value, retrieved_at) {
            Ok(entry) => entries.push(entry),
            Err(reason) => warnings.push(format!("entry #{i} skipped: {reason}")),
        }
    }
    (entries, warnings)
}

fn field<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| obj.get(*k)).filter(|v| !v.is_null())
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn as_game_id(value: &Value) -> Option<GameId> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()).map(GameId::new),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn as_size(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn normalize_entry(
    repository: &RepoKey,
    keyed_id: Option<GameId>,
    value: &Value,
    retrieved_at: DateTime<Utc>,
) -> Result<CatalogEntry, String> {
    let obj = value.as_object().ok_or("not an object")?;

    let name = field(obj, NAME_KEYS)
        .and_then(as_text)
        .ok_or("missing name")?;
    let game_id = match field(obj, ID_KEYS) {
        Some(v) => Some(as_game_id(v).ok_or_else(|| format!("invalid id {v}"))?),
        None => keyed_id,
    };
    let version = field(obj, VERSION_KEYS)
        .and_then(as_text)
        .map(VersionMarker::new)
        .ok_or("missing version")?;

    let files = field(obj, FILES_KEYS)
        .and_then(Value::as_array)
        .ok_or("missing file list")?
        .iter()
        .map(normalize_file)
        .collect::<Result<Vec<_>, _>>()?;

    let entry = CatalogEntry {
        repository: repository.clone(),
        name,
        game_id,
        files,
        version,
        retrieved_at,
    };
    if entry.files.is_empty() {
        return Err("empty file list".into());
    }
    if !entry.is_valid() {
        return Err("unsafe file path".into());
    }
    Ok(entry)
}

fn normalize_file(value: &Value) -> Result<RemoteFile, String> {
    let obj = value.as_object().ok_or("file is not an object")?;
    let path = field(obj, PATH_KEYS)
        .and_then(as_text)
        .ok_or("file without path")?;
    let size = field(obj, SIZE_KEYS)
        .and_then(as_size)
        .ok_or_else(|| format!("file {path} without size"))?;
    let sha256 = match field(obj, HASH_KEYS).and_then(Value::as_str) {
        Some(h) => Some(Sha256Digest::new(h).map_err(|e| format!("file {path}: {e}"))?),
        None => None,
    };
    Ok(RemoteFile { path, size, sha256 })
}
