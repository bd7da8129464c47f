//! Storage primitives over the removable card (or a host directory).
//!
//! Paths are `/`-separated strings relative to the storage root, the way the
//! device filesystem addresses them.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Fallible file-system operations used by the section and image caches.
pub trait Storage {
    /// Seekable handle; closed when dropped.
    type File: Read + Write + Seek;

    /// Open an existing file for reading.
    fn open_read(&self, path: &str) -> io::Result<Self::File>;

    /// Create or truncate a file for writing. The handle is also readable and
    /// seekable so header fields can be patched in place.
    fn open_write(&self, path: &str) -> io::Result<Self::File>;

    fn exists(&self, path: &str) -> bool;

    fn remove(&self, path: &str) -> io::Result<()>;

    /// Create `path` and any missing parents.
    fn create_dir_all(&self, path: &str) -> io::Result<()>;
}

impl<S: Storage> Storage for &S {
    type File = S::File;

    fn open_read(&self, path: &str) -> io::Result<Self::File> {
        (**self).open_read(path)
    }

    fn open_write(&self, path: &str) -> io::Result<Self::File> {
        (**self).open_write(path)
    }

    fn exists(&self, path: &str) -> bool {
        (**self).exists(path)
    }

    fn remove(&self, path: &str) -> io::Result<()> {
        (**self).remove(path)
    }

    fn create_dir_all(&self, path: &str) -> io::Result<()> {
        (**self).create_dir_all(path)
    }
}

/// Remove `path` if present, logging instead of failing.
pub(crate) fn remove_file_quiet<S: Storage>(storage: &S, path: &str) {
    if !storage.exists(path) {
        return;
    }
    if let Err(err) = storage.remove(path) {
        log::warn!("failed to remove {}: {}", path, err);
    }
}

/// Output file that is removed on drop unless committed.
///
/// Create the guard before opening the handle so the handle drops (closes)
/// first on every exit path.
pub struct PendingFile<'a, S: Storage> {
    storage: &'a S,
    path: String,
    armed: bool,
}

impl<'a, S: Storage> PendingFile<'a, S> {
    pub fn new(storage: &'a S, path: impl Into<String>) -> Self {
        Self {
            storage,
            path: path.into(),
            armed: true,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Keep the file on drop.
    pub fn commit(mut self) {
        self.armed = false;
    }
}

impl<S: Storage> Drop for PendingFile<'_, S> {
    fn drop(&mut self) {
        if self.armed {
            remove_file_quiet(self.storage, &self.path);
        }
    }
}

/// Storage rooted at a host directory.
#[derive(Clone, Debug)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Host path for a storage path.
    pub fn host_path(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }
}

impl Storage for FsStorage {
    type File = File;

    fn open_read(&self, path: &str) -> io::Result<File> {
        File::open(self.host_path(path))
    }

    fn open_write(&self, path: &str) -> io::Result<File> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(self.host_path(path))
    }

    fn exists(&self, path: &str) -> bool {
        self.host_path(path).exists()
    }

    fn remove(&self, path: &str) -> io::Result<()> {
        fs::remove_file(self.host_path(path))
    }

    fn create_dir_all(&self, path: &str) -> io::Result<()> {
        fs::create_dir_all(self.host_path(path))
    }
}

type SharedBytes = Rc<RefCell<Vec<u8>>>;

#[derive(Debug, Default)]
struct MemInner {
    files: RefCell<BTreeMap<String, SharedBytes>>,
    dirs: RefCell<BTreeSet<String>>,
    operations: Cell<usize>,
}

/// In-memory storage for host simulation and tests.
///
/// Clones share the same file table. Writing requires the parent directory
/// to exist, as on the card.
#[derive(Clone, Debug, Default)]
pub struct MemStorage {
    inner: Rc<MemInner>,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of trait operations performed so far.
    pub fn operations(&self) -> usize {
        self.inner.operations.get()
    }

    /// Snapshot of a file's bytes.
    pub fn read(&self, path: &str) -> Option<Vec<u8>> {
        let files = self.inner.files.borrow();
        files.get(clean(path)).map(|data| data.borrow().clone())
    }

    /// Replace a file's bytes, creating parent directories.
    pub fn write(&self, path: &str, bytes: &[u8]) {
        let path = clean(path);
        self.mark_dirs(parent_of(path));
        self.inner
            .files
            .borrow_mut()
            .insert(path.to_string(), Rc::new(RefCell::new(bytes.to_vec())));
    }

    /// Cut a file down to `len` bytes.
    pub fn truncate(&self, path: &str, len: usize) -> bool {
        let files = self.inner.files.borrow();
        match files.get(clean(path)) {
            Some(data) => {
                data.borrow_mut().truncate(len);
                true
            }
            None => false,
        }
    }

    /// All file paths, sorted.
    pub fn file_paths(&self) -> Vec<String> {
        self.inner.files.borrow().keys().cloned().collect()
    }

    fn tick(&self) {
        self.inner.operations.set(self.inner.operations.get() + 1);
    }

    fn dir_exists(&self, dir: &str) -> bool {
        dir.is_empty() || self.inner.dirs.borrow().contains(dir)
    }

    fn mark_dirs(&self, dir: &str) {
        let mut dirs = self.inner.dirs.borrow_mut();
        let mut prefix = String::with_capacity(dir.len());
        for part in dir.split('/').filter(|p| !p.is_empty()) {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(part);
            dirs.insert(prefix.clone());
        }
    }
}

impl Storage for MemStorage {
    type File = MemFile;

    fn open_read(&self, path: &str) -> io::Result<MemFile> {
        self.tick();
        let files = self.inner.files.borrow();
        let data = files
            .get(clean(path))
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.to_string()))?;
        Ok(MemFile {
            data: Rc::clone(data),
            pos: 0,
            writable: false,
        })
    }

    fn open_write(&self, path: &str) -> io::Result<MemFile> {
        self.tick();
        let path = clean(path);
        if !self.dir_exists(parent_of(path)) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("parent directory missing for {}", path),
            ));
        }
        let data = Rc::new(RefCell::new(Vec::new()));
        self.inner
            .files
            .borrow_mut()
            .insert(path.to_string(), Rc::clone(&data));
        Ok(MemFile {
            data,
            pos: 0,
            writable: true,
        })
    }

    fn exists(&self, path: &str) -> bool {
        self.tick();
        let path = clean(path);
        self.inner.files.borrow().contains_key(path) || self.inner.dirs.borrow().contains(path)
    }

    fn remove(&self, path: &str) -> io::Result<()> {
        self.tick();
        match self.inner.files.borrow_mut().remove(clean(path)) {
            Some(_) => Ok(()),
            None => Err(io::Error::new(io::ErrorKind::NotFound, path.to_string())),
        }
    }

    fn create_dir_all(&self, path: &str) -> io::Result<()> {
        self.tick();
        self.mark_dirs(clean(path));
        Ok(())
    }
}

/// Handle into a [`MemStorage`] file.
///
/// A removed file stays readable through handles opened before removal.
#[derive(Debug)]
pub struct MemFile {
    data: SharedBytes,
    pos: u64,
    writable: bool,
}

impl Read for MemFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let data = self.data.borrow();
        let start = usize::try_from(self.pos).unwrap_or(usize::MAX).min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl Write for MemFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.writable {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "file opened read-only",
            ));
        }
        let mut data = self.data.borrow_mut();
        let start = usize::try_from(self.pos)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "position overflow"))?;
        if data.len() < start {
            data.resize(start, 0);
        }
        let overlap = buf.len().min(data.len() - start);
        data[start..start + overlap].copy_from_slice(&buf[..overlap]);
        data.extend_from_slice(&buf[overlap..]);
        self.pos += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for MemFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let len = self.data.borrow().len() as i128;
        let target = match pos {
            SeekFrom::Start(offset) => offset as i128,
            SeekFrom::End(delta) => len + delta as i128,
            SeekFrom::Current(delta) => self.pos as i128 + delta as i128,
        };
        if target < 0 || target > u64::MAX as i128 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of file",
            ));
        }
        self.pos = target as u64;
        Ok(self.pos)
    }
}

fn clean(path: &str) -> &str {
    path.trim_start_matches('/')
}

fn parent_of(path: &str) -> &str {
    path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}
