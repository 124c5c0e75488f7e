//! Safe archive extraction
//!
//! Supports `.tar.gz` and `.zip` archives downloaded by the http downloader.
//! Every entry path is joined onto the extraction base and lexically
//! normalized before any filesystem operation; entries escaping the base fail
//! the whole extraction. File contents are copied in bounded chunks and each
//! handle is closed as soon as its entry is written, so handle counts and
//! transient buffers stay bounded regardless of archive size.
//!
//! The extractor reports the archive's top-level directory name so the caller
//! can rename it to the package target.

use std::fs;
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;

use crate::error::{Error, Result};

/// Copy chunk size for extracted file contents.
const COPY_CHUNK: usize = 1024;

/// Extract `archive_path` into `target_dir`, dispatching on the archive
/// filename suffix. Returns the name of the archive's top-level directory,
/// if it has one.
pub fn extract(archive_path: &Path, target_dir: &Path) -> Result<Option<String>> {
    let name = archive_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    if name.ends_with(".tar.gz") {
        untar(archive_path, target_dir)
    } else if name.ends_with(".zip") {
        unzip(archive_path, target_dir)
    } else {
        Err(Error::UnsupportedArchive { name })
    }
}

/// Extract a gzipped tarball, returning its top-level directory name.
pub fn untar(archive_path: &Path, target_dir: &Path) -> Result<Option<String>> {
    let file = fs::File::open(archive_path)?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));

    let mut root_dir: Option<String> = None;
    for entry in archive.entries()? {
        let mut entry = entry?;
        let entry_path = entry.path()?.into_owned();
        let target = sanitize_entry_path(target_dir, &entry_path)?;

        match entry.header().entry_type() {
            tar::EntryType::Directory => {
                root_dir = Some(entry_path.to_string_lossy().into_owned());
                create_dir(&target)?;
            }
            tar::EntryType::Regular => {
                let mode = entry.header().mode().unwrap_or(0o644);
                let mut out = create_file(&target, mode)?;
                copy_chunked(&mut entry, &mut out)?;
            }
            // Other entry kinds (symlinks, devices, ...) are skipped.
            _ => {}
        }
    }

    Ok(root_dir.as_deref().map(first_segment))
}

/// Extract a zip archive, returning its top-level directory name.
pub fn unzip(archive_path: &Path, target_dir: &Path) -> Result<Option<String>> {
    let file = fs::File::open(archive_path)?;
    let mut archive = zip::ZipArchive::new(file)?;

    let mut root_dir: Option<String> = None;
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let entry_name = entry.name().to_string();
        let target = sanitize_entry_path(target_dir, Path::new(&entry_name))?;

        if entry.is_dir() {
            root_dir = Some(entry_name);
            create_dir(&target)?;
            continue;
        }

        // Zip archives are not required to carry explicit directory entries.
        if let Some(parent) = target.parent() {
            create_dir(parent)?;
        }

        let mode = entry.unix_mode().unwrap_or(0o644);
        let mut out = create_file(&target, mode)?;
        copy_chunked(&mut entry, &mut out)?;
    }

    Ok(root_dir.as_deref().map(first_segment))
}

/// Join an archive entry name onto the extraction base and verify the result
/// stays inside it. Component-wise comparison keeps the check on exact
/// separator boundaries, so `base-evil` never passes for base `base`.
fn sanitize_entry_path(base: &Path, entry_name: &Path) -> Result<PathBuf> {
    let joined = normalize(&base.join(entry_name));
    if joined.starts_with(normalize(base)) {
        Ok(joined)
    } else {
        Err(Error::InvalidArchivePath {
            path: entry_name.display().to_string(),
        })
    }
}

/// Lexically normalize a path: resolve `.` and `..` without touching the
/// filesystem. `..` at the start simply pops nothing, which makes escaping
/// entries fail the prefix check in `sanitize_entry_path`.
fn normalize(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                result.pop();
            }
            other => result.push(other.as_os_str()),
        }
    }
    result
}

/// First path segment of an entry name, used as the archive root directory.
fn first_segment(name: &str) -> String {
    name.split('/').next().unwrap_or_default().to_string()
}

fn create_dir(path: &Path) -> Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o755);
    }
    if !path.exists() {
        builder.create(path)?;
    }
    Ok(())
}

fn create_file(path: &Path, _mode: u32) -> Result<fs::File> {
    let mut options = fs::OpenOptions::new();
    options.create(true).write(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(_mode);
    }
    Ok(options.open(path)?)
}

fn copy_chunked<R: Read, W: Write>(reader: &mut R, writer: &mut W) -> Result<()> {
    let mut buf = [0u8; COPY_CHUNK];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use tempfile::TempDir;

    /// Build a tar.gz on disk from (path, content) pairs. Entries whose path
    /// ends with '/' become directories.
    /// Writes the path directly into the header's name bytes, bypassing the
    /// `tar` crate's own `set_path` validation so tests can construct
    /// malicious (e.g. `..`-containing) fixtures for the extractor to reject.
    fn set_path_raw(header: &mut tar::Header, entry_path: &str) {
        let name = &mut header.as_old_mut().name;
        let bytes = entry_path.as_bytes();
        name[..bytes.len()].copy_from_slice(bytes);
    }

    fn write_tar_gz(dir: &Path, name: &str, entries: &[(&str, &str)]) -> PathBuf {
        let path = dir.join(name);
        let file = fs::File::create(&path).unwrap();
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(encoder);

        for (entry_path, content) in entries {
            let mut header = tar::Header::new_gnu();
            if entry_path.ends_with('/') {
                header.set_entry_type(tar::EntryType::Directory);
                header.set_size(0);
                header.set_mode(0o755);
                set_path_raw(&mut header, entry_path);
                header.set_cksum();
                builder.append(&header, std::io::empty()).unwrap();
            } else {
                header.set_entry_type(tar::EntryType::Regular);
                header.set_size(content.len() as u64);
                header.set_mode(0o644);
                set_path_raw(&mut header, entry_path);
                header.set_cksum();
                builder.append(&header, content.as_bytes()).unwrap();
            }
        }

        builder.into_inner().unwrap().finish().unwrap();
        path
    }

    fn write_zip(dir: &Path, name: &str, entries: &[(&str, &str)]) -> PathBuf {
        let path = dir.join(name);
        let file = fs::File::create(&path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();

        for (entry_path, content) in entries {
            if entry_path.ends_with('/') {
                writer.add_directory(*entry_path, options).unwrap();
            } else {
                writer.start_file(*entry_path, options).unwrap();
                writer.write_all(content.as_bytes()).unwrap();
            }
        }

        writer.finish().unwrap();
        path
    }

    #[test]
    fn test_untar_reports_root_dir() {
        let tmp = TempDir::new().unwrap();
        let archive = write_tar_gz(
            tmp.path(),
            "pkg.tar.gz",
            &[
                ("foo-0.0.1/", ""),
                ("foo-0.0.1/b.txt", "B"),
                ("foo-0.0.1/sub/", ""),
                ("foo-0.0.1/sub/c.txt", "C"),
            ],
        );

        let out = tmp.path().join("out");
        fs::create_dir(&out).unwrap();
        let root = extract(&archive, &out).unwrap();

        assert_eq!(root.as_deref(), Some("foo-0.0.1"));
        assert_eq!(
            fs::read_to_string(out.join("foo-0.0.1/b.txt")).unwrap(),
            "B"
        );
        assert_eq!(
            fs::read_to_string(out.join("foo-0.0.1/sub/c.txt")).unwrap(),
            "C"
        );
    }

    #[test]
    fn test_unzip_reports_root_dir() {
        let tmp = TempDir::new().unwrap();
        let archive = write_zip(
            tmp.path(),
            "pkg.zip",
            &[("foo-0.0.1/", ""), ("foo-0.0.1/b.txt", "B")],
        );

        let out = tmp.path().join("out");
        fs::create_dir(&out).unwrap();
        let root = extract(&archive, &out).unwrap();

        assert_eq!(root.as_deref(), Some("foo-0.0.1"));
        assert_eq!(
            fs::read_to_string(out.join("foo-0.0.1/b.txt")).unwrap(),
            "B"
        );
    }

    #[test]
    fn test_archive_without_root_dir() {
        let tmp = TempDir::new().unwrap();
        let archive = write_tar_gz(tmp.path(), "flat.tar.gz", &[("a.txt", "A")]);

        let out = tmp.path().join("out");
        fs::create_dir(&out).unwrap();
        let root = extract(&archive, &out).unwrap();

        // No directory entry means no root to rename.
        assert_eq!(root, None);
        assert_eq!(fs::read_to_string(out.join("a.txt")).unwrap(), "A");
    }

    #[test]
    fn test_unsupported_suffix() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("pkg.tar.bz2");
        fs::write(&archive, b"whatever").unwrap();

        let result = extract(&archive, tmp.path());
        assert!(matches!(result, Err(Error::UnsupportedArchive { .. })));
    }

    #[test]
    fn test_tar_path_traversal_rejected() {
        let tmp = TempDir::new().unwrap();
        let archive = write_tar_gz(tmp.path(), "evil.tar.gz", &[("../evil.txt", "gotcha")]);

        let out = tmp.path().join("out");
        fs::create_dir(&out).unwrap();
        let result = extract(&archive, &out);

        assert!(matches!(result, Err(Error::InvalidArchivePath { .. })));
        assert!(!tmp.path().join("evil.txt").exists());
    }

    #[test]
    fn test_zip_path_traversal_rejected() {
        let tmp = TempDir::new().unwrap();
        let archive = write_zip(tmp.path(), "evil.zip", &[("../evil.txt", "gotcha")]);

        let out = tmp.path().join("out");
        fs::create_dir(&out).unwrap();
        let result = extract(&archive, &out);

        assert!(matches!(result, Err(Error::InvalidArchivePath { .. })));
        assert!(!tmp.path().join("evil.txt").exists());
    }

    #[test]
    fn test_zip_without_directory_entries() {
        let tmp = TempDir::new().unwrap();
        let archive = write_zip(tmp.path(), "nodirs.zip", &[("deep/nested/file.txt", "X")]);

        let out = tmp.path().join("out");
        fs::create_dir(&out).unwrap();
        extract(&archive, &out).unwrap();

        assert_eq!(
            fs::read_to_string(out.join("deep/nested/file.txt")).unwrap(),
            "X"
        );
    }

    #[test]
    #[cfg(unix)]
    fn test_tar_preserves_file_mode() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("exec.tar.gz");
        let file = fs::File::create(&path).unwrap();
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(encoder);

        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(3);
        header.set_mode(0o755);
        header.set_path("run.sh").unwrap();
        header.set_cksum();
        builder.append(&header, &b"ok\n"[..]).unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        let out = tmp.path().join("out");
        fs::create_dir(&out).unwrap();
        extract(&path, &out).unwrap();

        let mode = fs::metadata(out.join("run.sh")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(Path::new("/a/b/../c")), PathBuf::from("/a/c"));
        assert_eq!(normalize(Path::new("a/./b")), PathBuf::from("a/b"));
        assert_eq!(normalize(Path::new("../x")), PathBuf::from("x"));
    }
}
