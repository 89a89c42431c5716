use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::config::DEFAULT_SYSFS_ROOT;
use crate::gpio::{OpenMode, SysfsBackend};

const INITIAL_VALUE: &[u8] = b"0\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsEvent {
    Open { path: PathBuf, mode: OpenMode },
    Write { path: PathBuf, data: Vec<u8> },
    Close { path: PathBuf },
}

/// In-memory stand-in for the sysfs GPIO class directory.
///
/// Behaves like the kernel where it matters: `gpio<N>/*` attributes only
/// exist once `N` has been written to `export`, and exporting a line twice
/// fails the write with `EBUSY`. Every open, write and close is recorded.
#[derive(Debug, Clone)]
pub struct MockSysfs {
    root: PathBuf,
    state: Arc<Mutex<MockState>>,
}

#[derive(Debug, Default)]
struct MockState {
    exported: FxHashSet<u32>,
    denied: FxHashSet<PathBuf>,
    failing_writes: FxHashSet<PathBuf>,
    short_writes: FxHashSet<PathBuf>,
    contents: FxHashMap<PathBuf, Vec<u8>>, // keyed by attribute path
    events: Vec<FsEvent>,
    opened: usize,
    closed: usize,
}

impl Default for MockSysfs {
    fn default() -> Self {
        Self::new(DEFAULT_SYSFS_ROOT)
    }
}

impl MockSysfs {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            state: Arc::default(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of `rel` under the mock root.
    pub fn path<P: AsRef<Path>>(&self, rel: P) -> PathBuf {
        self.root.join(rel)
    }

    /// Make opening `rel` fail with `EACCES`.
    pub fn deny<P: AsRef<Path>>(&self, rel: P) {
        self.state.lock().denied.insert(self.path(rel));
    }

    /// Make every write to `rel` fail with `EIO`.
    pub fn fail_writes<P: AsRef<Path>>(&self, rel: P) {
        self.state.lock().failing_writes.insert(self.path(rel));
    }

    /// Make every write to `rel` accept one byte less than offered.
    pub fn short_writes<P: AsRef<Path>>(&self, rel: P) {
        self.state.lock().short_writes.insert(self.path(rel));
    }

    pub fn export(&self, gpio: u32) {
        let value = self.path(format!("gpio{gpio}/value"));
        let mut state = self.state.lock();
        state.exported.insert(gpio);
        state
            .contents
            .entry(value)
            .or_insert_with(|| INITIAL_VALUE.to_vec());
    }

    pub fn is_exported(&self, gpio: u32) -> bool {
        self.state.lock().exported.contains(&gpio)
    }

    pub fn events(&self) -> Vec<FsEvent> {
        self.state.lock().events.clone()
    }

    /// Paths in the order they were opened.
    pub fn opened_paths(&self) -> Vec<PathBuf> {
        self.state
            .lock()
            .events
            .iter()
            .filter_map(|e| match e {
                FsEvent::Open { path, .. } => Some(path.clone()),
                _ => None,
            })
            .collect()
    }

    /// Payloads written to `rel`, including rejected ones.
    pub fn writes_to<P: AsRef<Path>>(&self, rel: P) -> Vec<Vec<u8>> {
        let target = self.path(rel);
        self.state
            .lock()
            .events
            .iter()
            .filter_map(|e| match e {
                FsEvent::Write { path, data } if *path == target => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().opened
    }

    pub fn close_count(&self) -> usize {
        self.state.lock().closed
    }

    /// Descriptors opened and not yet dropped.
    pub fn open_files(&self) -> usize {
        let state = self.state.lock();
        state.opened - state.closed
    }

    fn line_of(&self, path: &Path) -> Option<u32> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let mut parts = rel.components();
        let dir = parts.next()?.as_os_str().to_str()?;
        parts.next()?;
        if parts.next().is_some() {
            return None;
        }
        let digits = dir.strip_prefix("gpio")?;
        if digits.starts_with('0') && digits.len() > 1 {
            return None;
        }
        digits.parse().ok()
    }

    fn exists(&self, state: &MockState, path: &Path) -> bool {
        if *path == self.path("export") {
            return true;
        }
        self.line_of(path)
            .is_some_and(|gpio| state.exported.contains(&gpio))
    }
}

impl SysfsBackend for MockSysfs {
    type File = MockFile;

    fn open(&self, path: &Path, mode: OpenMode) -> io::Result<MockFile> {
        let mut state = self.state.lock();
        if state.denied.contains(path) {
            return Err(io::Error::from(io::ErrorKind::PermissionDenied));
        }
        if !self.exists(&state, path) {
            return Err(io::Error::from(io::ErrorKind::NotFound));
        }
        state.opened += 1;
        state.events.push(FsEvent::Open {
            path: path.to_path_buf(),
            mode,
        });
        Ok(MockFile {
            sysfs: self.clone(),
            path: path.to_path_buf(),
            mode,
            pos: 0,
        })
    }
}

/// An open mock attribute. Dropping it records a close.
#[derive(Debug)]
pub struct MockFile {
    sysfs: MockSysfs,
    path: PathBuf,
    mode: OpenMode,
    pos: usize,
}

impl MockFile {
    fn store(&self, state: &mut MockState, data: &[u8]) -> io::Result<()> {
        if self.path != self.sysfs.path("export") {
            state.contents.insert(self.path.clone(), data.to_vec());
            return Ok(());
        }
        let gpio = std::str::from_utf8(data)
            .ok()
            .map(|s| s.trim_end_matches(['\0', '\n']))
            .and_then(|s| s.parse::<u32>().ok())
            .ok_or_else(|| io::Error::from(io::ErrorKind::InvalidInput))?;
        if !state.exported.insert(gpio) {
            return Err(io::Error::from(io::ErrorKind::ResourceBusy));
        }
        state
            .contents
            .entry(self.sysfs.path(format!("gpio{gpio}/value")))
            .or_insert_with(|| INITIAL_VALUE.to_vec());
        Ok(())
    }
}

impl Write for MockFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.sysfs.state.lock();
        state.events.push(FsEvent::Write {
            path: self.path.clone(),
            data: buf.to_vec(),
        });
        if state.failing_writes.contains(&self.path) {
            return Err(io::Error::other("mock write failure"));
        }
        let accepted = if state.short_writes.contains(&self.path) {
            buf.len().saturating_sub(1)
        } else {
            buf.len()
        };
        self.store(&mut state, &buf[..accepted])?;
        Ok(accepted)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Read for MockFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.mode != OpenMode::ReadWrite {
            return Err(io::Error::from(io::ErrorKind::PermissionDenied));
        }
        let state = self.sysfs.state.lock();
        let data = state
            .contents
            .get(&self.path)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let rest = data.get(self.pos..).unwrap_or_default();
        let n = rest.len().min(buf.len());
        buf[..n].copy_from_slice(&rest[..n]);
        self.pos += n;
        Ok(n)
    }
}

impl Seek for MockFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let next = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::Current(d) => (self.pos as u64).checked_add_signed(d),
            SeekFrom::End(d) => {
                let len = self
                    .sysfs
                    .state
                    .lock()
                    .contents
                    .get(&self.path)
                    .map_or(0, Vec::len);
                (len as u64).checked_add_signed(d)
            }
        }
        .ok_or_else(|| io::Error::from(io::ErrorKind::InvalidInput))?;
        self.pos = next as usize;
        Ok(next)
    }
}

impl Drop for MockFile {
    fn drop(&mut self) {
        let mut state = self.sysfs.state.lock();
        state.closed += 1;
        state.events.push(FsEvent::Close {
            path: self.path.clone(),
        });
    }
}
