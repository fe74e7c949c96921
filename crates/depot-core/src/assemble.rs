//! Package assembler - turns staged files into the layout an unlock agent expects.
//!
//! The depot table is collected from manifest file names, VDF key files and
//! any Lua (or encoded `.st`) scripts shipped by the repository. Output is ordered by depot ID
//! so assembling the same staged package twice yields identical bytes.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use depot_schema::{FreshnessPolicy, GameId, TargetAgent};
use regex::Regex;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::acquire::StagedPackage;
use crate::error::EngineError;
use crate::io::archive::{decode_st, extract_zip, is_zip};

/// Where expanded bundles land inside the staging area.
const EXPANDED_DIR: &str = ".expanded";

static MANIFEST_NAME: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^(\d+)_(\w+)\.manifest$").ok());
static VDF_KEY: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r#""(\d+)"\s*\{\s*"DecryptionKey"\s*"([0-9a-fA-F]+)"\s*\}"#).ok()
});
static LUA_KEY: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r#"addappid\(\s*(\d+)\s*(?:,\s*\d+\s*)?,\s*"([0-9a-fA-F]+)"\s*\)"#).ok()
});
static LUA_MANIFEST: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"setManifestid\(\s*(\d+)\s*,\s*"(\w+)""#).ok());

/// Key and manifest known for one depot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DepotRecord {
    pub key: Option<String>,
    pub manifest: Option<String>,
}

/// Where a package file's bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileSource {
    /// Copied from the staging area.
    Staged(PathBuf),
    /// Generated text.
    Generated(String),
}

/// One file of an assembled package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageFile {
    /// Path relative to the package directory.
    pub path: String,
    pub source: FileSource,
}

/// A package laid out for one agent, borrowing the staged files it copies.
#[derive(Debug)]
pub struct AssembledPackage<'a> {
    pub game_id: GameId,
    pub agent: TargetAgent,
    pub files: Vec<PackageFile>,
    pub depots: BTreeMap<u32, DepotRecord>,
    pub staged: &'a StagedPackage,
}

impl AssembledPackage<'_> {
    /// The generated loader script or listing, if any.
    pub fn generated(&self, path: &str) -> Option<&str> {
        self.files.iter().find_map(|f| match &f.source {
            FileSource::Generated(text) if f.path == path => Some(text.as_str()),
            _ => None,
        })
    }
}

/// Material gathered from a staging area.
#[derive(Debug, Default)]
struct Material {
    depots: BTreeMap<u32, DepotRecord>,
    /// Manifest files by file name.
    manifests: BTreeMap<String, PathBuf>,
}

fn unsupported(game_id: GameId, reason: impl Into<String>) -> EngineError {
    EngineError::UnsupportedManifestShape {
        game_id: Some(game_id),
        reason: reason.into(),
    }
}

/// Expand any zip bundles in the staging area.
fn expand_bundles(staged: &StagedPackage) -> Result<(), EngineError> {
    for file in &staged.files {
        if !is_zip(&file.local) {
            continue;
        }
        let stem = file
            .local
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let dest = staged.root().join(EXPANDED_DIR).join(stem);
        extract_zip(&file.local, &dest).map_err(|e| EngineError::UnsupportedManifestShape {
            game_id: staged.game_id,
            reason: format!("bundle {}: {e}", file.remote),
        })?;
    }
    Ok(())
}

fn collect_keys(text: &str, re: &LazyLock<Option<Regex>>, depots: &mut BTreeMap<u32, DepotRecord>) {
    let Some(re) = re.as_ref() else { return };
    for caps in re.captures_iter(text) {
        if let Ok(depot) = caps[1].parse::<u32>() {
            depots.entry(depot).or_default().key = Some(caps[2].to_lowercase());
        }
    }
}

/// Keys and manifest IDs declared by a loader script.
fn collect_lua(text: &str, depots: &mut BTreeMap<u32, DepotRecord>) {
    collect_keys(text, &LUA_KEY, depots);
    let Some(re) = LUA_MANIFEST.as_ref() else { return };
    for caps in re.captures_iter(text) {
        if let Ok(depot) = caps[1].parse::<u32>() {
            depots
                .entry(depot)
                .or_default()
                .manifest
                .get_or_insert_with(|| caps[2].to_string());
        }
    }
}

/// Walk the staging area and build the depot table.
fn gather(root: &Path) -> Result<Material, EngineError> {
    let mut material = Material::default();

    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file());

    for entry in walker {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        match ext.as_str() {
            "manifest" => {
                if let Some(caps) = MANIFEST_NAME.as_ref().and_then(|re| re.captures(&name))
                    && let Ok(depot) = caps[1].parse::<u32>()
                {
                    material.depots.entry(depot).or_default().manifest = Some(caps[2].to_string());
                }
                material
                    .manifests
                    .entry(name.into_owned())
                    .or_insert_with(|| path.to_path_buf());
            }
            "vdf" => {
                let text = std::fs::read_to_string(path)?;
                collect_keys(&text, &VDF_KEY, &mut material.depots);
            }
            "lua" => {
                let text = std::fs::read_to_string(path)?;
                collect_lua(&text, &mut material.depots);
            }
            "st" => match decode_st(&std::fs::read(path)?) {
                Ok(text) => collect_lua(&text, &mut material.depots),
                Err(e) => warn!(file = %name, "skipping undecodable script: {e}"),
            },
            _ => {}
        }
    }
    Ok(material)
}

/// SteamTools loader script.
pub fn render_lua(
    game_id: GameId,
    depots: &BTreeMap<u32, DepotRecord>,
    policy: FreshnessPolicy,
) -> String {
    let mut out = format!("addappid({game_id}, 1, \"None\")\n");
    for (depot, record) in depots {
        if let Some(key) = &record.key {
            let _ = writeln!(out, "addappid({depot}, 1, \"{key}\")");
        }
    }
    let prefix = match policy {
        FreshnessPolicy::Floating => "--",
        FreshnessPolicy::Pinned => "",
    };
    for (depot, record) in depots {
        if let Some(manifest) = &record.manifest {
            let _ = writeln!(out, "{prefix}setManifestid({depot}, \"{manifest}\")");
        }
    }
    out
}

/// GreenLuma depot key file.
pub fn render_depotkeys(depots: &BTreeMap<u32, DepotRecord>) -> String {
    let mut out = String::from("\"depots\"\n{\n");
    for (depot, record) in depots {
        if let Some(key) = &record.key {
            let _ = writeln!(out, "\t\"{depot}\"\n\t{{\n\t\t\"DecryptionKey\"\t\t\"{key}\"\n\t}}");
        }
    }
    out.push_str("}\n");
    out
}

fn depotcache_files(manifests: &BTreeMap<String, PathBuf>) -> impl Iterator<Item = PackageFile> + '_ {
    manifests.iter().map(|(name, path)| PackageFile {
        path: format!("depotcache/{name}"),
        source: FileSource::Staged(path.clone()),
    })
}

/// Lay out a staged package for `agent`.
pub fn assemble(
    staged: &StagedPackage,
    agent: TargetAgent,
    game_id: GameId,
    policy: FreshnessPolicy,
) -> Result<AssembledPackage<'_>, EngineError> {
    expand_bundles(staged)?;
    let material = gather(staged.root())?;

    let mut files = Vec::new();
    match agent {
        TargetAgent::SteamTools => {
            if !material.depots.values().any(|d| d.key.is_some()) {
                return Err(unsupported(game_id, "no depot decryption keys found"));
            }
            files.push(PackageFile {
                path: format!("{game_id}.lua"),
                source: FileSource::Generated(render_lua(game_id, &material.depots, policy)),
            });
            files.extend(depotcache_files(&material.manifests));
        }
        TargetAgent::GreenLuma => {
            if material.manifests.is_empty() {
                return Err(unsupported(game_id, "no .manifest files found"));
            }
            let ids = std::iter::once(game_id.get())
                .chain(material.depots.keys().copied().filter(|d| *d != game_id.get()));
            for (n, id) in ids.enumerate() {
                files.push(PackageFile {
                    path: format!("AppList/{n}.txt"),
                    source: FileSource::Generated(id.to_string()),
                });
            }
            if material.depots.values().any(|d| d.key.is_some()) {
                files.push(PackageFile {
                    path: "depotkeys.vdf".to_string(),
                    source: FileSource::Generated(render_depotkeys(&material.depots)),
                });
            }
            files.extend(depotcache_files(&material.manifests));
        }
    }

    debug!(
        game_id = %game_id,
        agent = %agent,
        depots = material.depots.len(),
        files = files.len(),
        "assembled"
    );
    Ok(AssembledPackage {
        game_id,
        agent,
        files,
        depots: material.depots,
        staged,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquire::{Acquirer, StagedPackage};
    use crate::io::transport::{Fetch, Fetched, Location, TransportError};
    use crate::registry::SourceRegistry;
    use crate::resolver::{MatchScore, Query, ResolvedCandidate};
    use async_trait::async_trait;
    use bytes::Bytes;
    use chrono::Utc;
    use depot_schema::{CatalogEntry, RemoteFile, RepoKey, RepositoryDescriptor, TrustLevel};
    use std::collections::HashMap;
    use std::io::Write;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    const KEY_VDF: &str = r#""depots"
{
    "732"
    {
        "DecryptionKey" "BBBB"
    }
    "731"
    {
        "DecryptionKey" "aaaa"
    }
}"#;

    struct PathFetch(HashMap<String, Vec<u8>>);

    #[async_trait]
    impl Fetch for PathFetch {
        async fn fetch(
            &self,
            locations: &[Location],
            _cancel: &CancellationToken,
        ) -> Result<Fetched, TransportError> {
            let body = self.0.get(&locations[0].path).cloned().unwrap_or_default();
            Ok(Fetched {
                body: Bytes::from(body),
                url: locations[0].url(),
                digest: None,
                failures: vec![],
            })
        }
    }

    async fn stage(tmp: &Path, files: &[(&str, Vec<u8>)]) -> StagedPackage {
        let key = RepoKey::new("swa").unwrap();
        let registry = SourceRegistry::new(vec![RepositoryDescriptor::new(
            key.clone(),
            "https://swa.example",
        )])
        .unwrap();
        let entry = CatalogEntry {
            repository: key,
            name: "Counter-Strike 2".into(),
            game_id: Some(GameId::new(730)),
            files: files
                .iter()
                .map(|(p, b)| RemoteFile {
                    path: (*p).into(),
                    size: b.len() as u64,
                    sha256: None,
                })
                .collect(),
            version: "5".into(),
            retrieved_at: Utc::now(),
        };
        let candidate = ResolvedCandidate {
            entry,
            score: MatchScore::Id,
            query: Query::Id(GameId::new(730)),
            trust: TrustLevel::Normal,
            policy: FreshnessPolicy::Floating,
            declared_index: 0,
            position: 0,
        };
        let bodies = files
            .iter()
            .map(|(p, b)| ((*p).to_string(), b.clone()))
            .collect();
        Acquirer::new(Arc::new(registry), Arc::new(PathFetch(bodies)), tmp)
            .acquire(&candidate, &CancellationToken::new())
            .await
            .unwrap()
    }

    fn standard_files() -> Vec<(&'static str, Vec<u8>)> {
        vec![
            ("730/key.vdf", KEY_VDF.as_bytes().to_vec()),
            ("730/732_222.manifest", b"m2".to_vec()),
            ("730/731_111.manifest", b"m1".to_vec()),
        ]
    }

    #[tokio::test]
    async fn steamtools_script_is_ordered_by_depot() {
        let tmp = tempfile::tempdir().unwrap();
        let staged = stage(tmp.path(), &standard_files()).await;

        let pkg = assemble(&staged, TargetAgent::SteamTools, GameId::new(730), FreshnessPolicy::Pinned)
            .unwrap();
        assert_eq!(
            pkg.generated("730.lua").unwrap(),
            "addappid(730, 1, \"None\")\n\
             addappid(731, 1, \"aaaa\")\n\
             addappid(732, 1, \"bbbb\")\n\
             setManifestid(731, \"111\")\n\
             setManifestid(732, \"222\")\n"
        );
        let paths: Vec<_> = pkg.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["730.lua", "depotcache/731_111.manifest", "depotcache/732_222.manifest"]
        );
    }

    #[tokio::test]
    async fn floating_policy_comments_out_manifest_pins() {
        let tmp = tempfile::tempdir().unwrap();
        let staged = stage(tmp.path(), &standard_files()).await;

        let pkg = assemble(&staged, TargetAgent::SteamTools, GameId::new(730), FreshnessPolicy::Floating)
            .unwrap();
        let script = pkg.generated("730.lua").unwrap();
        assert!(script.contains("--setManifestid(731, \"111\")"));
        assert!(!script.lines().any(|l| l.starts_with("setManifestid")));
    }

    #[tokio::test]
    async fn assembling_twice_is_byte_identical() {
        let tmp = tempfile::tempdir().unwrap();
        let staged = stage(tmp.path(), &standard_files()).await;

        let a = assemble(&staged, TargetAgent::SteamTools, GameId::new(730), FreshnessPolicy::Floating)
            .unwrap();
        let b = assemble(&staged, TargetAgent::SteamTools, GameId::new(730), FreshnessPolicy::Floating)
            .unwrap();
        assert_eq!(a.files, b.files);
    }

    #[tokio::test]
    async fn greenluma_layout() {
        let tmp = tempfile::tempdir().unwrap();
        let staged = stage(tmp.path(), &standard_files()).await;

        let pkg = assemble(&staged, TargetAgent::GreenLuma, GameId::new(730), FreshnessPolicy::Floating)
            .unwrap();
        assert_eq!(pkg.generated("AppList/0.txt"), Some("730"));
        assert_eq!(pkg.generated("AppList/1.txt"), Some("731"));
        assert_eq!(pkg.generated("AppList/2.txt"), Some("732"));
        let keys = pkg.generated("depotkeys.vdf").unwrap();
        assert!(keys.find("\"731\"").unwrap() < keys.find("\"732\"").unwrap());
        assert!(pkg.files.iter().any(|f| f.path == "depotcache/731_111.manifest"));
    }

    #[tokio::test]
    async fn missing_material_is_unsupported() {
        let tmp = tempfile::tempdir().unwrap();
        let staged = stage(tmp.path(), &[("730/readme.txt", b"hi".to_vec())]).await;

        for agent in [TargetAgent::SteamTools, TargetAgent::GreenLuma] {
            let err = assemble(&staged, agent, GameId::new(730), FreshnessPolicy::Floating).unwrap_err();
            assert!(matches!(err, EngineError::UnsupportedManifestShape { .. }));
        }
    }

    #[tokio::test]
    async fn zip_bundle_with_lua_is_expanded() {
        let mut buf = std::io::Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut buf);
            let opts = zip::write::SimpleFileOptions::default();
            zip.start_file("730.lua", opts).unwrap();
            zip.write_all(b"addappid(730)\naddappid(731, 1, \"abcd\")\nsetManifestid(731, \"999\")\n")
                .unwrap();
            zip.start_file("731_999.manifest", opts).unwrap();
            zip.write_all(b"m").unwrap();
            zip.finish().unwrap();
        }
        let tmp = tempfile::tempdir().unwrap();
        let staged = stage(tmp.path(), &[("730.zip", buf.into_inner())]).await;

        let pkg = assemble(&staged, TargetAgent::SteamTools, GameId::new(730), FreshnessPolicy::Pinned)
            .unwrap();
        let script = pkg.generated("730.lua").unwrap();
        assert!(script.contains("addappid(731, 1, \"abcd\")"));
        assert!(script.contains("setManifestid(731, \"999\")"));
        assert!(pkg.files.iter().any(|f| f.path == "depotcache/731_999.manifest"));
    }

    #[tokio::test]
    async fn zip_bundle_with_st_script_yields_keys() {
        let st = crate::io::archive::encode_st(
            "addappid(730)\naddappid(731, 1, \"ef01\")\nsetManifestid(731, \"555\")\n",
            0x3c,
        );
        let mut buf = std::io::Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut buf);
            let opts = zip::write::SimpleFileOptions::default();
            zip.start_file("730.st", opts).unwrap();
            zip.write_all(&st).unwrap();
            zip.start_file("broken.st", opts).unwrap();
            zip.write_all(b"not an st file").unwrap();
            zip.finish().unwrap();
        }
        let tmp = tempfile::tempdir().unwrap();
        let staged = stage(tmp.path(), &[("730.zip", buf.into_inner())]).await;

        let pkg = assemble(&staged, TargetAgent::SteamTools, GameId::new(730), FreshnessPolicy::Pinned)
            .unwrap();
        assert_eq!(
            pkg.generated("730.lua").unwrap(),
            "addappid(730, 1, \"None\")\n\
             addappid(731, 1, \"ef01\")\n\
             setManifestid(731, \"555\")\n"
        );
    }
}
