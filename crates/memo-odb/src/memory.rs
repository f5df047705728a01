//! In-process backend.
//!
//! Used for `memory://` remotes and for exercising cross-kind transfers in
//! tests. Directories are implicit: a directory exists while some file lives
//! below it. Hardlinks share the underlying blob; reflink and symlink are not
//! available.

use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::fs::{FileSystem, FsKind};
use crate::link::LinkMethod;

#[derive(Debug)]
struct Blob {
    data: Vec<u8>,
    executable: AtomicBool,
}

/// Read handle that keeps the blob alive.
struct BlobBytes(Arc<Blob>);

impl AsRef<[u8]> for BlobBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0.data
    }
}

/// DashMap backed [`FileSystem`]. Clones share the same contents.
#[derive(Debug, Clone, Default)]
pub struct MemoryFs {
    files: Arc<DashMap<PathBuf, Arc<Blob>>>,
}

impl MemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    fn blob(&self, path: &Path) -> io::Result<Arc<Blob>> {
        self.files
            .get(path)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| not_found(path))
    }

    fn insert_new(&self, path: &Path, blob: Arc<Blob>) -> io::Result<()> {
        match self.files.entry(path.to_path_buf()) {
            Entry::Occupied(_) => Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", path.display()),
            )),
            Entry::Vacant(slot) => {
                slot.insert(blob);
                Ok(())
            }
        }
    }

    fn keys_under(&self, dir: &Path) -> Vec<PathBuf> {
        self.files
            .iter()
            .filter(|entry| entry.key() != dir && entry.key().starts_with(dir))
            .map(|entry| entry.key().clone())
            .collect()
    }
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("{} does not exist", path.display()),
    )
}

impl FileSystem for MemoryFs {
    fn kind(&self) -> FsKind {
        FsKind::Memory
    }

    fn exists(&self, path: &Path) -> bool {
        self.files.contains_key(path) || self.is_dir(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.files
            .iter()
            .any(|entry| entry.key() != path && entry.key().starts_with(path))
    }

    fn ls(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        let mut children: Vec<PathBuf> = self
            .keys_under(dir)
            .into_iter()
            .filter_map(|key| {
                let rel = key.strip_prefix(dir).ok()?;
                let first = rel.components().next()?;
                Some(dir.join(first.as_os_str()))
            })
            .collect();
        if children.is_empty() {
            return Err(not_found(dir));
        }
        children.sort();
        children.dedup();
        Ok(children)
    }

    fn find(&self, prefix: &Path) -> io::Result<Vec<PathBuf>> {
        let mut files: Vec<PathBuf> = self
            .files
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect();
        files.sort();
        Ok(files)
    }

    fn size(&self, path: &Path) -> io::Result<u64> {
        Ok(self.blob(path)?.data.len() as u64)
    }

    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(Cursor::new(BlobBytes(self.blob(path)?))))
    }

    fn put_file(&self, reader: &mut dyn Read, path: &Path) -> io::Result<u64> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        let len = data.len() as u64;
        self.insert_new(
            path,
            Arc::new(Blob {
                data,
                executable: AtomicBool::new(false),
            }),
        )?;
        Ok(len)
    }

    fn makedirs(&self, _dir: &Path) -> io::Result<()> {
        Ok(())
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        if self.files.remove(path).is_some() {
            return Ok(());
        }
        let under = self.keys_under(path);
        if under.is_empty() {
            return Err(not_found(path));
        }
        for key in under {
            self.files.remove(&key);
        }
        Ok(())
    }

    fn move_file(&self, src: &Path, dst: &Path) -> io::Result<()> {
        let (_, blob) = self.files.remove(src).ok_or_else(|| not_found(src))?;
        self.files.insert(dst.to_path_buf(), blob);
        Ok(())
    }

    fn hardlink(&self, src: &Path, dst: &Path) -> io::Result<()> {
        let blob = self.blob(src)?;
        self.insert_new(dst, blob)
    }

    fn is_link(&self, method: LinkMethod, path: &Path) -> Option<bool> {
        match method {
            LinkMethod::Hardlink => Some(
                self.files
                    .get(path)
                    .map(|entry| Arc::strong_count(entry.value()) > 1)
                    .unwrap_or(false),
            ),
            _ => None,
        }
    }

    fn set_executable(&self, path: &Path) -> io::Result<()> {
        self.blob(path)?.executable.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn is_executable(&self, path: &Path) -> bool {
        self.files
            .get(path)
            .map(|entry| entry.value().executable.load(Ordering::Relaxed))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_all(fs: &MemoryFs, path: &str) -> Vec<u8> {
        let mut buf = Vec::new();
        fs.open(Path::new(path))
            .unwrap()
            .read_to_end(&mut buf)
            .unwrap();
        buf
    }

    #[test]
    fn test_put_and_open() {
        let fs = MemoryFs::new();
        fs.put_file(&mut &b"hello"[..], Path::new("/r/a/b")).unwrap();

        assert!(fs.exists(Path::new("/r/a/b")));
        assert!(fs.exists(Path::new("/r/a")));
        assert!(fs.is_dir(Path::new("/r/a")));
        assert!(!fs.is_dir(Path::new("/r/a/b")));
        assert_eq!(fs.size(Path::new("/r/a/b")).unwrap(), 5);
        assert_eq!(read_all(&fs, "/r/a/b"), b"hello");
    }

    #[test]
    fn test_put_file_refuses_existing() {
        let fs = MemoryFs::new();
        fs.put_file(&mut &b"one"[..], Path::new("/x")).unwrap();
        let err = fs.put_file(&mut &b"two"[..], Path::new("/x")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        assert_eq!(read_all(&fs, "/x"), b"one");
    }

    #[test]
    fn test_ls_lists_immediate_children() {
        let fs = MemoryFs::new();
        fs.put_file(&mut &b""[..], Path::new("/runs/ab/abc/v1")).unwrap();
        fs.put_file(&mut &b""[..], Path::new("/runs/ab/abd/v2")).unwrap();
        fs.put_file(&mut &b""[..], Path::new("/runs/cd/cde/v3")).unwrap();

        assert_eq!(
            fs.ls(Path::new("/runs")).unwrap(),
            vec![PathBuf::from("/runs/ab"), PathBuf::from("/runs/cd")]
        );
        assert_eq!(fs.find(Path::new("/runs/ab")).unwrap().len(), 2);
        assert!(fs.ls(Path::new("/nope")).is_err());
    }

    #[test]
    fn test_hardlink_shares_blob() {
        let fs = MemoryFs::new();
        fs.put_file(&mut &b"data"[..], Path::new("/a")).unwrap();
        assert_eq!(fs.is_link(LinkMethod::Hardlink, Path::new("/a")), Some(false));

        fs.hardlink(Path::new("/a"), Path::new("/b")).unwrap();
        assert_eq!(fs.is_link(LinkMethod::Hardlink, Path::new("/b")), Some(true));
        assert_eq!(read_all(&fs, "/b"), b"data");

        let err = fs.hardlink(Path::new("/a"), Path::new("/b")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
    }

    #[test]
    fn test_reflink_unsupported() {
        let fs = MemoryFs::new();
        fs.put_file(&mut &b"data"[..], Path::new("/a")).unwrap();
        let err = fs.reflink(Path::new("/a"), Path::new("/b")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
    }

    #[test]
    fn test_move_and_remove() {
        let fs = MemoryFs::new();
        fs.put_file(&mut &b"new"[..], Path::new("/d/.tmp")).unwrap();
        fs.put_file(&mut &b"old"[..], Path::new("/d/final")).unwrap();

        fs.move_file(Path::new("/d/.tmp"), Path::new("/d/final")).unwrap();
        assert!(!fs.exists(Path::new("/d/.tmp")));
        assert_eq!(read_all(&fs, "/d/final"), b"new");

        fs.remove(Path::new("/d")).unwrap();
        assert!(!fs.exists(Path::new("/d/final")));
        assert!(fs.remove(Path::new("/d")).is_err());
    }

    #[test]
    fn test_clones_share_contents() {
        let fs = MemoryFs::new();
        let other = fs.clone();
        fs.put_file(&mut &b"x"[..], Path::new("/shared")).unwrap();
        assert!(other.exists(Path::new("/shared")));
    }
}
