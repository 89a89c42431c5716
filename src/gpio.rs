use std::ffi::OsStr;
use std::fmt::{self, Write as _};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, warn};

use crate::config::ControllerConfig;
use crate::error::GpioError;

/// Bytes available for a formatted attribute path or payload, terminator
/// included.
pub const PATH_BUFFER_CAPACITY: usize = 256;

/// Edge mode written to every line this controller opens.
pub const LINE_EDGE: EdgeDetect = EdgeDetect::Falling;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeDetect {
    None,
    Rising,
    Falling,
    Both,
}

impl EdgeDetect {
    /// Spelling accepted by the `edge` attribute.
    pub fn as_sysfs_str(&self) -> &'static str {
        match self {
            EdgeDetect::None => "none",
            EdgeDetect::Rising => "rising",
            EdgeDetect::Falling => "falling",
            EdgeDetect::Both => "both",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Export,
    Direction,
    Edge,
    Value,
    Wrap,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Export => "export",
            Stage::Direction => "direction",
            Stage::Edge => "edge",
            Stage::Value => "value",
            Stage::Wrap => "wrap",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    WriteOnly,
    ReadWrite,
}

/// The filesystem the controller drives. Closing a file is dropping it.
pub trait SysfsBackend: Send + Sync {
    type File: Read + Write + Send;

    fn open(&self, path: &Path, mode: OpenMode) -> io::Result<Self::File>;
}

/// An open `value` attribute of an exported line.
///
/// The descriptor is closed when the handle is dropped, unless ownership
/// has been moved out with [`LineHandle::into_inner`].
#[derive(Debug)]
pub struct LineHandle<F> {
    gpio: u32,
    file: F,
}

impl<F> LineHandle<F> {
    fn new(gpio: u32, file: F) -> Self {
        Self { gpio, file }
    }

    pub fn gpio(&self) -> u32 {
        self.gpio
    }

    pub fn get_ref(&self) -> &F {
        &self.file
    }

    pub fn into_inner(self) -> F {
        self.file
    }
}

impl<F: Read> Read for LineHandle<F> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl<F: Write> Write for LineHandle<F> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl<F: Seek> Seek for LineHandle<F> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }
}

/// Fixed-capacity formatting target. Anything that would not fit, with one
/// byte left for a C terminator, is rejected instead of truncated.
struct BoundedBuf {
    buf: [u8; PATH_BUFFER_CAPACITY],
    len: usize,
}

impl BoundedBuf {
    fn new() -> Self {
        Self {
            buf: [0; PATH_BUFFER_CAPACITY],
            len: 0,
        }
    }

    fn push(&mut self, bytes: &[u8]) -> Result<(), fmt::Error> {
        let end = self.len + bytes.len();
        if end >= PATH_BUFFER_CAPACITY {
            return Err(fmt::Error);
        }
        self.buf[self.len..end].copy_from_slice(bytes);
        self.len = end;
        Ok(())
    }

    fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    fn to_path(&self) -> PathBuf {
        PathBuf::from(OsStr::from_bytes(self.as_bytes()))
    }
}

impl fmt::Write for BoundedBuf {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.push(s.as_bytes())
    }
}

/// Exports a sysfs GPIO line, configures it and opens its value attribute.
pub struct GpioController<B: SysfsBackend> {
    config: ControllerConfig,
    backend: Arc<B>,
}

impl<B: SysfsBackend> GpioController<B> {
    /// Fails if `config.sysfs_root` is empty.
    pub fn new(config: ControllerConfig, backend: Arc<B>) -> Result<Self, GpioError> {
        if config.sysfs_root.as_os_str().is_empty() {
            return Err(GpioError::Config("sysfs_root must not be empty".into()));
        }
        Ok(Self { config, backend })
    }

    /// Runs export, direction, edge and value-open in that order, stopping
    /// at the first failure.
    ///
    /// Steps already committed are not rolled back: a line exported before
    /// a later failure stays exported. Every transient descriptor is closed
    /// before this returns; the value descriptor is returned only on
    /// success.
    pub fn open_line(
        &self,
        gpio: u32,
        direction: &str,
    ) -> Result<LineHandle<B::File>, GpioError> {
        debug!("gpio {gpio}: opening line with direction {direction:?}");
        self.run_sequence(gpio, direction)
            .inspect_err(|e| match e.stage() {
                Some(stage) => warn!("gpio {gpio}: {stage} step failed: {e}"),
                None => warn!("gpio {gpio}: {e}"),
            })
    }

    fn run_sequence(
        &self,
        gpio: u32,
        direction: &str,
    ) -> Result<LineHandle<B::File>, GpioError> {
        let direction = Self::direction_payload(gpio, direction)?;

        self.export(gpio)?;
        debug!("gpio {gpio}: exported");
        self.set_attr(gpio, Stage::Direction, direction.as_bytes())?;
        debug!("gpio {gpio}: direction set");
        let mut edge = BoundedBuf::new();
        push_terminated(&mut edge, LINE_EDGE.as_sysfs_str().as_bytes())
            .map_err(|_| self.overflow(gpio, Stage::Edge))?;
        self.set_attr(gpio, Stage::Edge, edge.as_bytes())?;
        debug!("gpio {gpio}: edge set to {}", LINE_EDGE.as_sysfs_str());
        let value = self.open_value(gpio)?;
        debug!("gpio {gpio}: value opened");

        Ok(LineHandle::new(gpio, value))
    }

    fn direction_payload(gpio: u32, direction: &str) -> Result<BoundedBuf, GpioError> {
        let invalid = || GpioError::InvalidDirection {
            gpio,
            direction: direction.to_string(),
        };
        if direction.is_empty() || direction.contains('\0') {
            return Err(invalid());
        }
        let mut payload = BoundedBuf::new();
        push_terminated(&mut payload, direction.as_bytes()).map_err(|_| invalid())?;
        Ok(payload)
    }

    fn export(&self, gpio: u32) -> Result<(), GpioError> {
        let mut path = self.root_buf(gpio, Stage::Export)?;
        path.write_str("/export")
            .map_err(|_| self.overflow(gpio, Stage::Export))?;

        let mut payload = BoundedBuf::new();
        write!(payload, "{gpio}").map_err(|_| self.overflow(gpio, Stage::Export))?;

        let mut file = self
            .backend
            .open(&path.to_path(), OpenMode::WriteOnly)
            .map_err(|source| GpioError::ExportUnavailable { gpio, source })?;
        self.write_payload(&mut file, gpio, Stage::Export, payload.as_bytes())
    }

    fn set_attr(&self, gpio: u32, stage: Stage, payload: &[u8]) -> Result<(), GpioError> {
        let path = self.attr_path(gpio, stage)?;
        let mut file = self
            .backend
            .open(&path, OpenMode::WriteOnly)
            .map_err(|source| match stage {
                Stage::Edge => GpioError::EdgeUnavailable { gpio, source },
                _ => GpioError::DirectionUnavailable { gpio, source },
            })?;
        self.write_payload(&mut file, gpio, stage, payload)
    }

    fn open_value(&self, gpio: u32) -> Result<B::File, GpioError> {
        let path = self.attr_path(gpio, Stage::Value)?;
        self.backend
            .open(&path, OpenMode::ReadWrite)
            .map_err(|source| GpioError::ValueOpenFailed { gpio, source })
    }

    /// One write call per attribute, as sysfs stores expect. Unless strict
    /// writes are enabled the outcome is only logged.
    fn write_payload(
        &self,
        file: &mut B::File,
        gpio: u32,
        stage: Stage,
        payload: &[u8],
    ) -> Result<(), GpioError> {
        let result = file.write(payload);

        if !self.config.strict_writes {
            if let Err(e) = &result {
                debug!("gpio {gpio}: ignoring {stage} write error: {e}");
            }
            return Ok(());
        }

        match result {
            Ok(n) if n == payload.len() => Ok(()),
            Ok(n) => Err(GpioError::WriteFailed {
                gpio,
                stage,
                source: io::Error::new(
                    io::ErrorKind::WriteZero,
                    format!("short write: {n} of {} bytes", payload.len()),
                ),
            }),
            // EBUSY: the line is already exported.
            Err(e) if stage == Stage::Export && e.kind() == io::ErrorKind::ResourceBusy => {
                debug!("gpio {gpio}: already exported");
                Ok(())
            }
            Err(source) => Err(GpioError::WriteFailed { gpio, stage, source }),
        }
    }

    fn root_buf(&self, gpio: u32, stage: Stage) -> Result<BoundedBuf, GpioError> {
        // "/" trims to "", so the attribute suffix supplies the only slash.
        let mut root = self.config.sysfs_root.as_os_str().as_bytes();
        while let Some(rest) = root.strip_suffix(b"/") {
            root = rest;
        }
        let mut buf = BoundedBuf::new();
        buf.push(root).map_err(|_| self.overflow(gpio, stage))?;
        Ok(buf)
    }

    fn attr_path(&self, gpio: u32, stage: Stage) -> Result<PathBuf, GpioError> {
        let mut buf = self.root_buf(gpio, stage)?;
        write!(buf, "/gpio{gpio}/{stage}").map_err(|_| self.overflow(gpio, stage))?;
        Ok(buf.to_path())
    }

    fn overflow(&self, gpio: u32, stage: Stage) -> GpioError {
        GpioError::PathOverflow {
            gpio,
            stage,
            capacity: PATH_BUFFER_CAPACITY,
        }
    }
}

fn push_terminated(buf: &mut BoundedBuf, bytes: &[u8]) -> Result<(), fmt::Error> {
    buf.push(bytes)?;
    buf.push(b"\0")
}
