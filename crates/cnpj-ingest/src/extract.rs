//! Archive extraction
//!
//! Members are streamed to a scratch directory rather than held in memory;
//! a single establishment member can exceed a gigabyte uncompressed.
//!
//! An archive may carry a nested zip instead of the delimited file itself.
//! One level of nesting is flattened transparently. A zip inside a nested zip
//! is rejected.

use crate::error::{IngestError, Result};
use cnpj_common::types::EntityKind;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;
use zip::ZipArchive;

const MAX_NESTING: usize = 1;

/// A delimited member written to scratch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedMember {
    pub name: String,
    pub kind: EntityKind,
    pub path: PathBuf,
}

/// Extract every recognised member of `archive` into `scratch`.
///
/// Blocking; run it on the blocking pool. Members whose names match no known
/// entity are skipped. An archive with no recognised member is an error.
pub fn extract(archive: &Path, scratch: &Path) -> Result<Vec<ExtractedMember>> {
    let label = archive_label(archive);
    std::fs::create_dir_all(scratch).map_err(|e| IngestError::extraction(&label, e))?;

    let mut members = Vec::new();
    extract_level(archive, &label, scratch, 0, &mut members)?;

    if members.is_empty() {
        return Err(IngestError::extraction(label, "no recognised delimited members"));
    }

    members.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(members)
}

/// Whether `path` opens as a zip with a readable central directory.
pub fn is_readable_zip(path: &Path) -> bool {
    File::open(path)
        .ok()
        .and_then(|file| ZipArchive::new(file).ok())
        .is_some()
}

fn extract_level(
    archive: &Path,
    label: &str,
    scratch: &Path,
    depth: usize,
    members: &mut Vec<ExtractedMember>,
) -> Result<()> {
    let file = File::open(archive).map_err(|e| IngestError::extraction(label, e))?;
    let mut zip = ZipArchive::new(file).map_err(|e| IngestError::extraction(label, e))?;

    for index in 0..zip.len() {
        let mut entry = zip
            .by_index(index)
            .map_err(|e| IngestError::extraction(label, format!("entry {index}: {e}")))?;
        if entry.is_dir() {
            continue;
        }

        let name = base_name(entry.name());
        if name.is_empty() {
            continue;
        }

        if name.to_lowercase().ends_with(".zip") {
            if depth >= MAX_NESTING {
                return Err(IngestError::extraction(
                    label,
                    format!("nested archive {name} is more than {MAX_NESTING} level deep"),
                ));
            }

            let nested = scratch.join(&name);
            copy_entry(&mut entry, &nested).map_err(|e| IngestError::extraction(label, e))?;
            drop(entry);
            debug!(archive = %label, nested = %name, "Flattening nested archive");

            let nested_label = format!("{label}/{name}");
            let outcome = extract_level(&nested, &nested_label, scratch, depth + 1, members);
            let _ = std::fs::remove_file(&nested);
            outcome?;
            continue;
        }

        let Some(kind) = EntityKind::from_member_name(&name) else {
            debug!(archive = %label, member = %name, "Skipping unrecognised member");
            continue;
        };

        let path = scratch.join(&name);
        let bytes = copy_entry(&mut entry, &path)
            .map_err(|e| IngestError::extraction(label, format!("{name}: {e}")))?;
        debug!(archive = %label, member = %name, kind = %kind, bytes, "Extracted member");

        members.push(ExtractedMember { name, kind, path });
    }

    Ok(())
}

fn copy_entry(entry: &mut impl std::io::Read, dest: &Path) -> std::io::Result<u64> {
    let mut out = BufWriter::new(File::create(dest)?);
    let bytes = std::io::copy(entry, &mut out)?;
    out.flush()?;
    Ok(bytes)
}

/// Last path component, so entries cannot escape the scratch directory.
fn base_name(entry_name: &str) -> String {
    entry_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(entry_name)
        .trim()
        .to_string()
}

fn archive_label(archive: &Path) -> String {
    archive
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| archive.display().to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data) in entries {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn write_archive(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn test_extracts_recognised_members_only() {
        let dir = TempDir::new().unwrap();
        let archive = write_archive(
            dir.path(),
            "Cnaes.zip",
            &zip_bytes(&[
                ("F.K03200$Z.D40309.CNAECSV", b"\"0111301\";\"Cultivo de arroz\"\n"),
                ("LEIAME.txt", b"ignored"),
            ]),
        );
        let scratch = dir.path().join("members");

        let members = extract(&archive, &scratch).unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].kind, EntityKind::Cnae);
        assert!(members[0].path.exists());
        assert!(!scratch.join("LEIAME.txt").exists());
    }

    #[test]
    fn test_flattens_one_nested_level() {
        let dir = TempDir::new().unwrap();
        let inner = zip_bytes(&[("F.K03200$W.SIMPLES.CSV.D40309", b"\"12345678\";\"S\"\n")]);
        let archive = write_archive(dir.path(), "Simples.zip", &zip_bytes(&[("Simples.zip", &inner)]));
        let scratch = dir.path().join("members");

        let members = extract(&archive, &scratch).unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].kind, EntityKind::Simples);
        assert!(!scratch.join("Simples.zip").exists());
    }

    #[test]
    fn test_rejects_two_nested_levels() {
        let dir = TempDir::new().unwrap();
        let innermost = zip_bytes(&[("X.SOCIOCSV", b"a;b\n")]);
        let middle = zip_bytes(&[("deeper.zip", &innermost)]);
        let archive = write_archive(dir.path(), "Socios0.zip", &zip_bytes(&[("middle.zip", &middle)]));

        let err = extract(&archive, &dir.path().join("members")).unwrap_err();
        assert!(matches!(err, IngestError::Extraction { .. }), "{err}");
    }

    #[test]
    fn test_corrupt_archive_is_extraction_error() {
        let dir = TempDir::new().unwrap();
        let archive = write_archive(dir.path(), "Empresas0.zip", b"PK\x03\x04 definitely not a zip");

        let err = extract(&archive, &dir.path().join("members")).unwrap_err();
        assert!(matches!(err, IngestError::Extraction { ref archive, .. } if archive == "Empresas0.zip"));
        assert!(!is_readable_zip(&dir.path().join("Empresas0.zip")));
    }

    #[test]
    fn test_archive_without_known_members_is_error() {
        let dir = TempDir::new().unwrap();
        let archive = write_archive(dir.path(), "Paises.zip", &zip_bytes(&[("readme.md", b"x")]));

        assert!(extract(&archive, &dir.path().join("members")).is_err());
        assert!(is_readable_zip(&archive));
    }

    #[test]
    fn test_entry_paths_are_flattened() {
        assert_eq!(base_name("../../etc/K3241.EMPRECSV"), "K3241.EMPRECSV");
        assert_eq!(base_name("dir\\inner.MOTICSV"), "inner.MOTICSV");
    }
}
