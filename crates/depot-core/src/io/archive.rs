//! Zip bundle expansion and `.st` script decoding
//!
//! Some repositories publish a whole artifact set as one `.zip` per game.
//! Bundles are expanded inside the staging area before assembly. Bundles
//! may carry loader scripts in the obfuscated `.st` form, which decodes to
//! plain Lua.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use flate2::read::ZlibDecoder;
use thiserror::Error;
use zip::ZipArchive;

/// `.st` header: XOR seed, payload length, reserved (little-endian `u32`s).
const ST_HEADER_LEN: usize = 12;
const ST_XOR_MASK: u32 = 0xFFFE_A4C8;
/// Padding in front of the script inside the inflated payload.
const ST_PREAMBLE_LEN: usize = 512;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Archive entry escapes the extraction root: {0}")]
    UnsafeEntry(String),

    #[error("Invalid .st script: {0}")]
    InvalidScript(String),
}

/// Decode an `.st` script into its Lua text.
pub fn decode_st(content: &[u8]) -> Result<String, ArchiveError> {
    let Some((header, rest)) = content.split_first_chunk::<ST_HEADER_LEN>() else {
        return Err(ArchiveError::InvalidScript("header too short".into()));
    };
    let word = |i: usize| u32::from_le_bytes([header[i], header[i + 1], header[i + 2], header[i + 3]]);
    let key = ((word(0) ^ ST_XOR_MASK) & 0xFF) as u8;
    let size = word(4) as usize;

    let Some(payload) = rest.get(..size) else {
        return Err(ArchiveError::InvalidScript(format!(
            "payload truncated: expected {size} bytes, got {}",
            rest.len()
        )));
    };
    let unmasked: Vec<u8> = payload.iter().map(|b| b ^ key).collect();

    let mut inflated = Vec::new();
    ZlibDecoder::new(unmasked.as_slice())
        .read_to_end(&mut inflated)
        .map_err(|e| ArchiveError::InvalidScript(format!("inflate: {e}")))?;

    let script = inflated
        .get(ST_PREAMBLE_LEN..)
        .ok_or_else(|| ArchiveError::InvalidScript("payload shorter than preamble".into()))?;
    String::from_utf8(script.to_vec()).map_err(|e| ArchiveError::InvalidScript(e.to_string()))
}

/// Encode Lua text as an `.st` script.
#[cfg(test)]
pub(crate) fn encode_st(script: &str, key: u8) -> Vec<u8> {
    use flate2::Compression;
    use flate2::write::ZlibEncoder;
    use std::io::Write;

    let mut plain = vec![0u8; ST_PREAMBLE_LEN];
    plain.extend_from_slice(script.as_bytes());
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&plain).unwrap();
    let masked: Vec<u8> = encoder.finish().unwrap().iter().map(|b| b ^ key).collect();

    let mut out = Vec::with_capacity(ST_HEADER_LEN + masked.len());
    out.extend_from_slice(&(ST_XOR_MASK ^ u32::from(key)).to_le_bytes());
    out.extend_from_slice(&(masked.len() as u32).to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&masked);
    out
}

/// Returns true if the path looks like a zip bundle.
pub fn is_zip(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("zip"))
}

/// Extract a zip archive, returning the extracted file paths in archive order.
///
/// Entries whose names would land outside `dest_dir` abort the extraction.
pub fn extract_zip(archive_path: &Path, dest_dir: &Path) -> Result<Vec<PathBuf>, ArchiveError> {
    let file = File::open(archive_path)?;
    let mut archive = ZipArchive::new(file).map_err(|e| ArchiveError::Archive(e.to_string()))?;

    fs::create_dir_all(dest_dir)?;
    let mut extracted = Vec::new();

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| ArchiveError::Archive(e.to_string()))?;
        let Some(relative_path) = entry.enclosed_name() else {
            return Err(ArchiveError::UnsafeEntry(entry.name().to_string()));
        };

        let absolute_path = dest_dir.join(&relative_path);
        if entry.is_dir() {
            fs::create_dir_all(&absolute_path)?;
            continue;
        }
        if let Some(p) = absolute_path.parent() {
            fs::create_dir_all(p)?;
        }

        let mut outfile = File::create(&absolute_path)?;
        io::copy(&mut entry, &mut outfile)?;
        extracted.push(absolute_path);
    }

    Ok(extracted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        for (name, data) in entries {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn extracts_nested_entries() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("730.zip");
        write_zip(
            &archive,
            &[("731_42.manifest", b"m"), ("sub/key.vdf", b"k")],
        );

        let out = dir.path().join("out");
        let files = extract_zip(&archive, &out).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(fs::read(out.join("sub/key.vdf")).unwrap(), b"k");
    }

    #[test]
    fn rejects_escaping_entries() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("evil.zip");
        write_zip(&archive, &[("../evil.txt", b"x")]);

        let err = extract_zip(&archive, &dir.path().join("out")).unwrap_err();
        assert!(matches!(err, ArchiveError::UnsafeEntry(_)));
        assert!(!dir.path().join("evil.txt").exists());
    }

    #[test]
    fn st_script_decodes_to_lua() {
        let lua = "addappid(731, 1, \"abcd\")\nsetManifestid(731, \"111\")\n";
        let encoded = encode_st(lua, 0x5a);
        assert_ne!(&encoded[ST_HEADER_LEN..], lua.as_bytes());
        assert_eq!(decode_st(&encoded).unwrap(), lua);
    }

    #[test]
    fn damaged_st_scripts_are_rejected() {
        assert!(matches!(decode_st(b"short"), Err(ArchiveError::InvalidScript(_))));

        let mut truncated = encode_st("addappid(1)", 7);
        truncated.truncate(truncated.len() - 4);
        assert!(matches!(decode_st(&truncated), Err(ArchiveError::InvalidScript(_))));

        let mut garbage = encode_st("addappid(1)", 7);
        for b in &mut garbage[ST_HEADER_LEN..] {
            *b = 0xff;
        }
        assert!(matches!(decode_st(&garbage), Err(ArchiveError::InvalidScript(_))));
    }

    #[test]
    fn zip_detection_is_case_insensitive() {
        assert!(is_zip(Path::new("a/B.ZIP")));
        assert!(!is_zip(Path::new("key.vdf")));
    }
}
