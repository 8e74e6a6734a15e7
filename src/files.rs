//! Tiered on-disk file store: submission/thumbnail paths derived from an
//! entity id, plus a small content-type sniffing helper for files saved
//! without a trustworthy extension.

use std::fs;
use std::path::{Path, PathBuf};

use content_inspector::{inspect, ContentType};

use crate::error::{Error, Result};

/// Depth and segment width for [`tiered_path`]. Five segments of two digits
/// each comfortably covers ids up to 10^10.
pub const TIER_DEPTH: usize = 5;
pub const TIER_WIDTH: usize = 2;

/// Split a zero-padded decimal id into `depth` fixed-width segments, e.g.
/// `tiered_path(14, 5, 2)` → `00/00/00/00/14`.
pub fn tiered_path(id: u64, depth: usize, width: usize) -> PathBuf {
    let padded = format!("{:0width$}", id, width = depth * width);
    let mut path = PathBuf::new();
    for chunk in padded.as_bytes().chunks(width) {
        path.push(std::str::from_utf8(chunk).expect("decimal digits are valid utf-8"));
    }
    path
}

/// The folder an entity's files live under, relative to the files root.
pub fn entry_folder(files_root: &Path, id: u64) -> PathBuf {
    files_root.join(tiered_path(id, TIER_DEPTH, TIER_WIDTH))
}

/// `submission[N][.ext]` — `n` distinguishes multi-file submissions, absent
/// for the first (or only) file.
pub fn submission_file_name(index: usize, extension: Option<&str>) -> String {
    let suffix = if index == 0 {
        String::new()
    } else {
        index.to_string()
    };
    match extension {
        Some(ext) if !ext.is_empty() => format!("submission{suffix}.{ext}"),
        _ => format!("submission{suffix}"),
    }
}

pub const THUMBNAIL_FILE_NAME: &str = "thumbnail.jpg";

/// Bit 0: thumbnail saved. Bit 1: at least one submission file saved.
/// Bit 2: every expected file (thumbnail + all submission files) is
/// present. Callers compute bit 2 themselves once they know the expected
/// count; this only names the bits.
pub mod filesaved {
    pub const THUMBNAIL: i64 = 0b001;
    pub const ANY_FILE: i64 = 0b010;
    pub const ALL_FILES: i64 = 0b100;
}

pub fn read_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| Error::io(path, e))
}

pub fn write_file(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }
    fs::write(path, content).map_err(|e| Error::io(path, e))
}

/// Best-effort extension guess for content saved without one, via magic-byte
/// sniffing. Falls back to `"bin"` for anything that isn't recognisably
/// plain text.
pub fn guess_extension(content: &[u8]) -> &'static str {
    match inspect(content) {
        ContentType::UTF_8 | ContentType::UTF_8_BOM => "txt",
        ContentType::UTF_16LE | ContentType::UTF_16BE | ContentType::UTF_32LE | ContentType::UTF_32BE => "txt",
        ContentType::BINARY => sniff_binary_extension(content),
    }
}

fn sniff_binary_extension(content: &[u8]) -> &'static str {
    const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF];
    const PNG: &[u8] = &[0x89, b'P', b'N', b'G'];
    const GIF87: &[u8] = b"GIF87a";
    const GIF89: &[u8] = b"GIF89a";
    const PDF: &[u8] = b"%PDF";
    const ZIP: &[u8] = &[0x50, 0x4B, 0x03, 0x04];

    if content.starts_with(JPEG) {
        "jpg"
    } else if content.starts_with(PNG) {
        "png"
    } else if content.starts_with(GIF87) || content.starts_with(GIF89) {
        "gif"
    } else if content.starts_with(PDF) {
        "pdf"
    } else if content.starts_with(ZIP) {
        "zip"
    } else {
        "bin"
    }
}

/// Non-overwriting recursive copy: existing destination files are left
/// untouched, new ones are copied, directories are created as needed.
/// Returns the number of files actually copied.
pub fn copy_tree_non_overwriting(src: &Path, dst: &Path) -> Result<usize> {
    if !src.exists() {
        return Ok(0);
    }
    fs::create_dir_all(dst).map_err(|e| Error::io(dst, e))?;
    let mut copied = 0;
    for entry in fs::read_dir(src).map_err(|e| Error::io(src, e))? {
        let entry = entry.map_err(|e| Error::io(src, e))?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());
        let file_type = entry.file_type().map_err(|e| Error::io(&src_path, e))?;
        if file_type.is_dir() {
            copied += copy_tree_non_overwriting(&src_path, &dst_path)?;
        } else if !dst_path.exists() {
            fs::copy(&src_path, &dst_path).map_err(|e| Error::io(&dst_path, e))?;
            copied += 1;
        }
    }
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiered_path_pads_and_splits() {
        assert_eq!(tiered_path(14, 5, 2), PathBuf::from("00/00/00/00/14"));
    }

    #[test]
    fn tiered_path_handles_large_ids() {
        assert_eq!(
            tiered_path(10_000_000_000, 5, 2),
            PathBuf::from("10/00/00/00/00")
        );
    }

    #[test]
    fn submission_file_name_omits_index_zero() {
        assert_eq!(submission_file_name(0, Some("png")), "submission.png");
        assert_eq!(submission_file_name(1, Some("png")), "submission1.png");
        assert_eq!(submission_file_name(0, None), "submission");
    }

    #[test]
    fn guess_extension_detects_jpeg_magic() {
        let jpeg = [0xFF, 0xD8, 0xFF, 0xE0, 0x00];
        assert_eq!(guess_extension(&jpeg), "jpg");
    }

    #[test]
    fn guess_extension_detects_plain_text() {
        assert_eq!(guess_extension(b"hello world"), "txt");
    }

    #[test]
    fn copy_tree_skips_existing_files() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        fs::write(src.path().join("a.txt"), b"new").unwrap();
        fs::write(dst.path().join("a.txt"), b"old").unwrap();
        let copied = copy_tree_non_overwriting(src.path(), dst.path()).unwrap();
        assert_eq!(copied, 0);
        assert_eq!(fs::read(dst.path().join("a.txt")).unwrap(), b"old");
    }

    #[test]
    fn copy_tree_copies_new_files_recursively() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        fs::create_dir_all(src.path().join("sub")).unwrap();
        fs::write(src.path().join("sub/b.txt"), b"content").unwrap();
        let copied = copy_tree_non_overwriting(src.path(), dst.path()).unwrap();
        assert_eq!(copied, 1);
        assert_eq!(fs::read(dst.path().join("sub/b.txt")).unwrap(), b"content");
    }
}
