//! Local disk backend.
//!
//! Link support:
//! - reflink: FICLONE on Linux (btrfs, xfs), clonefile on macOS (APFS)
//! - hardlink: same device only, verified through the link count
//! - symlink: unix only, verified through `symlink_metadata`

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::fs::{FileSystem, FsKind};
use crate::link::LinkMethod;

/// `std::fs` backed [`FileSystem`].
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFs;

impl LocalFs {
    pub fn new() -> Self {
        Self
    }

    fn ensure_parent(path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }
}

impl FileSystem for LocalFs {
    fn kind(&self) -> FsKind {
        FsKind::Local
    }

    fn exists(&self, path: &Path) -> bool {
        // symlink_metadata so that dangling links still count as present
        path.symlink_metadata().is_ok()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn ls(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        let mut entries = fs::read_dir(dir)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<io::Result<Vec<_>>>()?;
        entries.sort();
        Ok(entries)
    }

    fn find(&self, prefix: &Path) -> io::Result<Vec<PathBuf>> {
        if !self.exists(prefix) {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in WalkDir::new(prefix).sort_by_file_name() {
            let entry = entry.map_err(io::Error::other)?;
            if !entry.file_type().is_dir() {
                files.push(entry.into_path());
            }
        }
        Ok(files)
    }

    fn size(&self, path: &Path) -> io::Result<u64> {
        Ok(fs::metadata(path)?.len())
    }

    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(File::open(path)?))
    }

    fn put_file(&self, reader: &mut dyn Read, path: &Path) -> io::Result<u64> {
        Self::ensure_parent(path)?;
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        match io::copy(reader, &mut file).and_then(|n| file.sync_all().map(|()| n)) {
            Ok(n) => Ok(n),
            Err(e) => {
                // Never leave a truncated file behind
                drop(file);
                let _ = fs::remove_file(path);
                Err(e)
            }
        }
    }

    fn makedirs(&self, dir: &Path) -> io::Result<()> {
        fs::create_dir_all(dir)
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        let meta = path.symlink_metadata()?;
        if meta.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        }
    }

    fn move_file(&self, src: &Path, dst: &Path) -> io::Result<()> {
        Self::ensure_parent(dst)?;
        match fs::rename(src, dst) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
                // EXDEV: copy next to the destination, then rename into place
                let staging = dst.with_file_name(format!(
                    ".{}.tmp",
                    uuid::Uuid::new_v4().simple()
                ));
                fs::copy(src, &staging)?;
                fs::rename(&staging, dst)?;
                fs::remove_file(src)
            }
            Err(e) => Err(e),
        }
    }

    fn reflink(&self, src: &Path, dst: &Path) -> io::Result<()> {
        if self.exists(dst) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", dst.display()),
            ));
        }
        Self::ensure_parent(dst)?;
        reflink_copy::reflink(src, dst)
    }

    fn hardlink(&self, src: &Path, dst: &Path) -> io::Result<()> {
        Self::ensure_parent(dst)?;
        fs::hard_link(src, dst)
    }

    #[cfg(unix)]
    fn symlink(&self, src: &Path, dst: &Path) -> io::Result<()> {
        Self::ensure_parent(dst)?;
        std::os::unix::fs::symlink(src, dst)
    }

    #[cfg(not(unix))]
    fn symlink(&self, _src: &Path, _dst: &Path) -> io::Result<()> {
        Err(crate::fs::unsupported(self.kind(), LinkMethod::Symlink))
    }

    fn is_link(&self, method: LinkMethod, path: &Path) -> Option<bool> {
        match method {
            LinkMethod::Symlink => Some(
                path.symlink_metadata()
                    .map(|m| m.file_type().is_symlink())
                    .unwrap_or(false),
            ),
            #[cfg(unix)]
            LinkMethod::Hardlink => {
                use std::os::unix::fs::MetadataExt;
                Some(fs::metadata(path).map(|m| m.nlink() > 1).unwrap_or(false))
            }
            _ => None,
        }
    }

    #[cfg(unix)]
    fn set_executable(&self, path: &Path) -> io::Result<()> {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(path)?.permissions();
        perms.set_mode(perms.mode() | 0o111);
        fs::set_permissions(path, perms)
    }

    #[cfg(unix)]
    fn is_executable(&self, path: &Path) -> bool {
        use std::os::unix::fs::PermissionsExt;
        fs::metadata(path)
            .map(|m| m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }
}
