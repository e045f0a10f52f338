//! Native archive extraction
//!
//! Unpacks tar (gz, xz, bz2, zst, plain) and zip archives without external
//! tools. Entries that would land outside the destination, directly or
//! through a symlink, are rejected.

use crate::core::error::StepError;
use crate::core::output::{self, ProgressGuard};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Component, Path, PathBuf};

type Result<T> = std::result::Result<T, StepError>;

fn fail(message: String) -> StepError {
    StepError::Extract(message)
}

/// Resolve `.` and `..` without touching the filesystem, so paths can be
/// checked without following symlinks.
pub fn normalize_lexical(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    let mut has_root = false;

    for c in path.components() {
        match c {
            Component::Prefix(p) => {
                out.clear();
                out.push(p.as_os_str());
                has_root = true;
            }
            Component::RootDir => {
                out.push(Component::RootDir.as_os_str());
                has_root = true;
            }
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = out
                    .components()
                    .next_back()
                    .is_some_and(|last| matches!(last, Component::Normal(_)));
                if popped {
                    out.pop();
                } else if !has_root {
                    out.push("..");
                }
            }
            Component::Normal(seg) => out.push(seg),
        }
    }

    out
}

fn ensure_no_symlink_components(dest: &Path, full_path: &Path) -> Result<()> {
    let rel = full_path
        .strip_prefix(dest)
        .map_err(|_| StepError::UnsafePath(full_path.display().to_string()))?;

    let mut cur = dest.to_path_buf();
    for comp in rel.components() {
        cur.push(comp);
        if let Ok(md) = std::fs::symlink_metadata(&cur)
            && md.file_type().is_symlink()
        {
            return Err(fail(format!(
                "symlink in path component: {}",
                cur.display()
            )));
        }
    }

    Ok(())
}

fn ensure_link_target_within_dest(dest: &Path, link_parent: &Path, link_name: &Path) -> Result<()> {
    if link_name.is_absolute()
        || link_name
            .components()
            .any(|c| matches!(c, Component::Prefix(_) | Component::RootDir))
    {
        return Err(fail(format!(
            "unsafe link target (absolute): {}",
            link_name.display()
        )));
    }

    let candidate = normalize_lexical(&link_parent.join(link_name));
    let norm_dest = normalize_lexical(dest);
    if candidate.strip_prefix(&norm_dest).is_err() {
        return Err(fail(format!(
            "unsafe link target (escapes destination): {} -> {}",
            link_parent.display(),
            link_name.display()
        )));
    }

    Ok(())
}

fn extract_tar<R: Read>(reader: R, dest: &Path) -> Result<()> {
    let mut archive = tar::Archive::new(reader);

    for entry in archive
        .entries()
        .map_err(|e| fail(format!("tar read error: {}", e)))?
    {
        let mut entry = entry.map_err(|e| fail(format!("tar entry error: {}", e)))?;
        let path = entry
            .path()
            .map_err(|e| fail(format!("tar path error: {}", e)))?
            .into_owned();

        if path.is_absolute() || path.components().any(|c| c == Component::ParentDir) {
            return Err(StepError::UnsafePath(path.display().to_string()));
        }
        if path.as_os_str().is_empty() || path == Path::new(".") {
            continue;
        }

        let full_path = dest.join(&path);
        ensure_no_symlink_components(dest, &full_path)?;

        let entry_type = entry.header().entry_type();
        if entry_type == tar::EntryType::Symlink || entry_type == tar::EntryType::Link {
            let link_name = entry
                .link_name()
                .map_err(|e| fail(format!("tar link_name error: {}", e)))?
                .ok_or_else(|| fail(format!("link without target: {}", path.display())))?;
            let link_parent = full_path.parent().unwrap_or(dest);
            ensure_link_target_within_dest(dest, link_parent, &link_name)?;
        }

        if let Some(parent) = full_path.parent() {
            if parent.starts_with(dest) {
                ensure_no_symlink_components(dest, parent)?;
            }
            std::fs::create_dir_all(parent)?;
        }

        entry
            .unpack(&full_path)
            .map_err(|e| fail(format!("unpack error for {}: {}", path.display(), e)))?;
    }

    Ok(())
}

fn open(archive_path: &Path) -> Result<BufReader<File>> {
    let file = File::open(archive_path)
        .map_err(|e| fail(format!("cannot open {}: {}", archive_path.display(), e)))?;
    Ok(BufReader::new(file))
}

fn extract_zip(archive_path: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive_path)
        .map_err(|e| fail(format!("cannot open {}: {}", archive_path.display(), e)))?;
    let mut archive =
        zip::ZipArchive::new(file).map_err(|e| fail(format!("zip read error: {}", e)))?;

    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .map_err(|e| fail(format!("zip entry error: {}", e)))?;

        let Some(outpath) = file.enclosed_name().map(|p| dest.join(p)) else {
            tracing::warn!("skipping zip entry with unsafe path: {}", file.name());
            continue;
        };

        if file.is_dir() {
            std::fs::create_dir_all(&outpath)?;
            continue;
        }
        if let Some(parent) = outpath.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut outfile = File::create(&outpath)?;
        std::io::copy(&mut file, &mut outfile)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = file.unix_mode() {
                std::fs::set_permissions(&outpath, std::fs::Permissions::from_mode(mode)).ok();
            }
        }
    }

    Ok(())
}

/// Archive format, detected from the file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    TarGz,
    TarXz,
    TarBz2,
    TarZst,
    Tar,
    Zip,
}

impl ArchiveFormat {
    pub fn detect(name: &str) -> Option<Self> {
        let name = name.to_lowercase();
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if name.ends_with(".tar.xz") || name.ends_with(".txz") {
            Some(Self::TarXz)
        } else if name.ends_with(".tar.bz2") || name.ends_with(".tbz2") || name.ends_with(".tbz") {
            Some(Self::TarBz2)
        } else if name.ends_with(".tar.zst") || name.ends_with(".tzst") {
            Some(Self::TarZst)
        } else if name.ends_with(".zip") {
            Some(Self::Zip)
        } else if name.ends_with(".tar") {
            Some(Self::Tar)
        } else {
            None
        }
    }
}

/// True if the file name looks like an archive this module can unpack.
pub fn is_archive(name: &str) -> bool {
    ArchiveFormat::detect(name).is_some()
}

/// Unpack `archive` into `dest`, creating `dest` if needed.
pub fn extract(archive: &Path, dest: &Path) -> Result<()> {
    let name = archive
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "archive".to_string());
    let format = ArchiveFormat::detect(&name)
        .ok_or_else(|| fail(format!("cannot detect archive format: {}", name)))?;

    std::fs::create_dir_all(dest)?;
    let _guard = ProgressGuard(output::spinner(&format!("extracting {}", name)));

    match format {
        ArchiveFormat::TarGz => extract_tar(flate2::read::GzDecoder::new(open(archive)?), dest)?,
        ArchiveFormat::TarXz => extract_tar(xz2::read::XzDecoder::new(open(archive)?), dest)?,
        ArchiveFormat::TarBz2 => extract_tar(bzip2::read::BzDecoder::new(open(archive)?), dest)?,
        ArchiveFormat::TarZst => {
            let decoder = zstd::stream::read::Decoder::new(open(archive)?)
                .map_err(|e| fail(format!("zstd init error: {}", e)))?;
            extract_tar(decoder, dest)?
        }
        ArchiveFormat::Tar => extract_tar(open(archive)?, dest)?,
        ArchiveFormat::Zip => extract_zip(archive, dest)?,
    }

    tracing::debug!("extracted {} to {}", name, dest.display());
    Ok(())
}

/// The single top-level directory of an extracted tree, if there is
/// exactly one entry and it is a directory.
pub fn single_top_level_dir(dir: &Path) -> Option<PathBuf> {
    let mut entries = std::fs::read_dir(dir).ok()?.filter_map(|e| e.ok());
    let first = entries.next()?;
    if entries.next().is_some() {
        return None;
    }
    first.file_type().ok()?.is_dir().then(|| first.path())
}
