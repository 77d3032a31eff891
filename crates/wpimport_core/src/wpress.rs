use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

pub const HEADER_SIZE: usize = 4377;
pub const DATABASE_FILENAME: &str = "database.sql";

const NAME_END: usize = 255;
const SIZE_END: usize = 269;
const MTIME_END: usize = 281;
const UPLOADS_MARKER: &str = "wp-content/uploads";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WpressEntry {
    pub name: String,
    pub size: usize,
    pub mtime: Option<u64>,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Header {
    EndOfArchive,
    Entry(WpressEntry),
    Invalid,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExtractReport {
    pub archive: String,
    pub output_dir: String,
    pub database: Option<String>,
    pub extracted_files: usize,
    pub extracted_bytes: u64,
    pub skipped_entries: usize,
    pub rejected_paths: Vec<String>,
    /// Bytes stepped over while looking for the next readable header.
    pub resync_bytes: usize,
    pub truncated: bool,
}

/// Unpack `database.sql` and `wp-content/uploads` from an All-in-One WP
/// Migration archive into `output_dir`. Everything else is skipped.
pub fn extract_wpress(archive: &Path, output_dir: &Path) -> Result<ExtractReport> {
    let buffer =
        fs::read(archive).with_context(|| format!("failed to read {}", archive.display()))?;
    fs::create_dir_all(output_dir)
        .with_context(|| format!("failed to create {}", output_dir.display()))?;

    let mut report = ExtractReport {
        archive: normalize_path(archive),
        output_dir: normalize_path(output_dir),
        ..ExtractReport::default()
    };

    let mut offset = 0usize;
    while offset + HEADER_SIZE <= buffer.len() {
        let entry = match parse_header(&buffer[offset..offset + HEADER_SIZE]) {
            Header::EndOfArchive => break,
            Header::Invalid => {
                report.resync_bytes += 1;
                offset += 1;
                continue;
            }
            Header::Entry(entry) => entry,
        };

        let body_start = offset + HEADER_SIZE;
        let Some(body_end) = body_start
            .checked_add(entry.size)
            .filter(|end| *end <= buffer.len())
        else {
            log::warn!(
                "{}: entry {} claims {} bytes past the end of the archive; stopping",
                report.archive,
                entry.name,
                entry.size
            );
            report.truncated = true;
            break;
        };
        offset = body_end;
        log::debug!(
            "entry {}/{} ({} bytes, mtime {:?})",
            entry.path,
            entry.name,
            entry.size,
            entry.mtime
        );

        let Some(relative) = destination(&entry) else {
            report.skipped_entries += 1;
            continue;
        };
        if !is_safe_relative(&relative) {
            log::warn!("rejecting unsafe archive path {}", relative.display());
            report.rejected_paths.push(normalize_path(&relative));
            continue;
        }

        let target = output_dir.join(&relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::write(&target, &buffer[body_start..body_end])
            .with_context(|| format!("failed to write {}", target.display()))?;

        report.extracted_files += 1;
        report.extracted_bytes += entry.size as u64;
        if entry.name == DATABASE_FILENAME {
            log::info!("found {DATABASE_FILENAME} ({} bytes)", entry.size);
            report.database = Some(normalize_path(&target));
        }
    }

    if report.resync_bytes > 0 {
        log::warn!(
            "{}: skipped {} bytes of unreadable headers",
            report.archive,
            report.resync_bytes
        );
    }
    Ok(report)
}

fn parse_header(header: &[u8]) -> Header {
    if header.iter().all(|byte| *byte == 0) {
        return Header::EndOfArchive;
    }

    let Some(name) = field_text(&header[..NAME_END]) else {
        return Header::Invalid;
    };
    if name.is_empty() || name.chars().any(char::is_control) {
        return Header::Invalid;
    }
    let Some(size) = field_text(&header[NAME_END..SIZE_END]).and_then(|text| text.parse().ok())
    else {
        return Header::Invalid;
    };
    let mtime = field_text(&header[SIZE_END..MTIME_END]).and_then(|text| text.parse().ok());
    let Some(path) = field_text(&header[MTIME_END..HEADER_SIZE]) else {
        return Header::Invalid;
    };

    Header::Entry(WpressEntry {
        name,
        size,
        mtime,
        path,
    })
}

/// NUL-terminated, NUL-padded UTF-8 field.
fn field_text(bytes: &[u8]) -> Option<String> {
    let end = bytes
        .iter()
        .position(|byte| *byte == 0)
        .unwrap_or(bytes.len());
    std::str::from_utf8(&bytes[..end])
        .ok()
        .map(|text| text.trim().to_string())
}

fn destination(entry: &WpressEntry) -> Option<PathBuf> {
    if entry.name == DATABASE_FILENAME {
        return Some(PathBuf::from(DATABASE_FILENAME));
    }
    let path = entry.path.replace('\\', "/");
    if !path.contains(UPLOADS_MARKER) {
        return None;
    }
    Some(Path::new(path.trim_start_matches("./")).join(&entry.name))
}

fn is_safe_relative(path: &Path) -> bool {
    path.components()
        .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::{HEADER_SIZE, extract_wpress};

    fn header(name: &str, size: usize, path: &str) -> Vec<u8> {
        let mut header = vec![0u8; HEADER_SIZE];
        header[..name.len()].copy_from_slice(name.as_bytes());
        let size = size.to_string();
        header[255..255 + size.len()].copy_from_slice(size.as_bytes());
        let mtime = b"1700000000";
        header[269..269 + mtime.len()].copy_from_slice(mtime);
        header[281..281 + path.len()].copy_from_slice(path.as_bytes());
        header
    }

    fn entry(name: &str, path: &str, body: &[u8]) -> Vec<u8> {
        let mut bytes = header(name, body.len(), path);
        bytes.extend_from_slice(body);
        bytes
    }

    #[test]
    fn extracts_database_and_uploads_only() {
        let temp = tempdir().expect("tempdir");
        let archive = temp.path().join("site.wpress");
        let output = temp.path().join("out");

        let mut bytes = Vec::new();
        bytes.extend(entry("database.sql", ".", b"INSERT INTO `wp_terms` VALUES (1,'a','a',0);"));
        bytes.extend(entry("foto.jpg", "wp-content/uploads/2024/03", b"\xff\xd8jpeg"));
        bytes.extend(entry("plugin.php", "wp-content/plugins/seo", b"<?php"));
        bytes.extend(vec![0u8; HEADER_SIZE]);
        fs::write(&archive, bytes).expect("write archive");

        let report = extract_wpress(&archive, &output).expect("extract");
        assert_eq!(report.extracted_files, 2);
        assert_eq!(report.skipped_entries, 1);
        assert!(report.database.is_some());
        assert!(!report.truncated);
        assert_eq!(report.resync_bytes, 0);
        assert_eq!(
            fs::read_to_string(output.join("database.sql")).expect("read sql"),
            "INSERT INTO `wp_terms` VALUES (1,'a','a',0);"
        );
        assert_eq!(
            fs::read(output.join("wp-content/uploads/2024/03/foto.jpg")).expect("read upload"),
            b"\xff\xd8jpeg"
        );
        assert!(!output.join("wp-content/plugins").exists());
    }

    #[test]
    fn resynchronizes_after_garbage_bytes() {
        let temp = tempdir().expect("tempdir");
        let archive = temp.path().join("site.wpress");
        let output = temp.path().join("out");

        let mut bytes = vec![0u8, 0, 0];
        bytes.extend(entry("database.sql", "", b"SELECT 1;"));
        fs::write(&archive, bytes).expect("write archive");

        let report = extract_wpress(&archive, &output).expect("extract");
        assert_eq!(report.resync_bytes, 3);
        assert_eq!(report.extracted_files, 1);
        assert_eq!(
            fs::read_to_string(output.join("database.sql")).expect("read sql"),
            "SELECT 1;"
        );
    }

    #[test]
    fn stops_on_truncated_body() {
        let temp = tempdir().expect("tempdir");
        let archive = temp.path().join("site.wpress");
        let output = temp.path().join("out");

        let mut bytes = header("database.sql", 1000, "");
        bytes.extend_from_slice(b"short");
        fs::write(&archive, bytes).expect("write archive");

        let report = extract_wpress(&archive, &output).expect("extract");
        assert!(report.truncated);
        assert_eq!(report.extracted_files, 0);
        assert!(!output.join("database.sql").exists());
    }

    #[test]
    fn rejects_parent_directory_paths() {
        let temp = tempdir().expect("tempdir");
        let archive = temp.path().join("site.wpress");
        let output = temp.path().join("out");

        let bytes = entry("evil.jpg", "wp-content/uploads/../../../etc", b"x");
        fs::write(&archive, bytes).expect("write archive");

        let report = extract_wpress(&archive, &output).expect("extract");
        assert_eq!(report.extracted_files, 0);
        assert_eq!(report.rejected_paths.len(), 1);
        assert!(!temp.path().join("etc").exists());
    }

    #[test]
    fn missing_archive_is_an_error() {
        let temp = tempdir().expect("tempdir");
        let err = extract_wpress(&temp.path().join("nope.wpress"), temp.path())
            .expect_err("must fail");
        assert!(err.to_string().contains("failed to read"));
    }
}
