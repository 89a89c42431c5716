use log::{error, info};
use std::collections::HashSet;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::fs::MetadataExt;
use std::sync::Arc;
use std::time::Duration;

use nix::poll::{PollFd, PollFlags, poll};
use nix::unistd::geteuid;
use once_cell::sync::OnceCell;
use thiserror::Error;

use crate::config::ServiceConfig;
use crate::error::GpioError;
use crate::gpio::{GpioController, LineHandle, Stage, SysfsBackend};

static REGISTRATION: OnceCell<Registration> = OnceCell::new();

/// Read-only context handed to every [`HandleWrapper`].
///
/// A process normally sets this up once, before the first port is opened,
/// through [`Registration::global`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    consumer: String,
}

impl Registration {
    pub fn new(consumer: impl Into<String>) -> Self {
        Self {
            consumer: consumer.into(),
        }
    }

    /// Initializes the process-wide registration on first use. Later calls
    /// return the existing one and ignore `config`.
    pub fn global(config: &ServiceConfig) -> &'static Registration {
        REGISTRATION.get_or_init(|| {
            info!("registering gpio port consumer {:?}", config.consumer);
            Registration::new(config.consumer.clone())
        })
    }

    pub fn get() -> Option<&'static Registration> {
        REGISTRATION.get()
    }

    pub fn consumer(&self) -> &str {
        &self.consumer
    }
}

/// Why a line handle could not be turned into a caller-visible port. It
/// never carries the handle, so the descriptor is closed by the time the
/// error is seen.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct WrapError(pub String);

/// Turns an open line handle into whatever the caller passes around.
pub trait HandleWrapper<F>: Send + Sync {
    type Output;

    fn wrap(&self, ctx: &Registration, handle: LineHandle<F>) -> Result<Self::Output, WrapError>;
}

/// An opened GPIO port as seen by its caller.
#[derive(Debug)]
pub struct GpioPort {
    gpio: u32,
    consumer: String,
    device: u64,
    inode: u64,
    file: File,
}

impl GpioPort {
    pub fn gpio(&self) -> u32 {
        self.gpio
    }

    pub fn consumer(&self) -> &str {
        &self.consumer
    }

    /// `(st_dev, st_ino)` of the value attribute behind this port.
    pub fn identity(&self) -> (u64, u64) {
        (self.device, self.inode)
    }

    pub fn read_level(&mut self) -> io::Result<bool> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut buf = [0u8; 4];
        let n = self.file.read(&mut buf)?;
        match buf[..n].first() {
            Some(b'0') => Ok(false),
            Some(b'1') => Ok(true),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unexpected value for gpio {}: {:?}", self.gpio, &buf[..n]),
            )),
        }
    }

    pub fn write_level(&mut self, high: bool) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(if high { b"1" } else { b"0" })
    }

    /// Waits for the kernel to flag an edge on the value attribute, then
    /// reads the new level. Returns `Ok(None)` if `timeout` expires first;
    /// `None` waits indefinitely.
    ///
    /// sysfs only reports edges that occur after the last read, so read the
    /// level once before the first wait.
    pub fn wait_for_edge(&mut self, timeout: Option<Duration>) -> io::Result<Option<bool>> {
        let timeout_ms = match timeout {
            Some(t) => i32::try_from(t.as_millis()).unwrap_or(i32::MAX),
            None => -1,
        };
        let mut fds = [PollFd::new(
            self.file.as_raw_fd(),
            PollFlags::POLLPRI | PollFlags::POLLERR,
        )];
        if poll(&mut fds, timeout_ms)? == 0 {
            return Ok(None);
        }
        self.read_level().map(Some)
    }

    pub fn into_owned_fd(self) -> OwnedFd {
        self.file.into()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PortWrapper;

impl HandleWrapper<File> for PortWrapper {
    type Output = GpioPort;

    fn wrap(&self, ctx: &Registration, handle: LineHandle<File>) -> Result<GpioPort, WrapError> {
        let meta = handle
            .get_ref()
            .metadata()
            .map_err(|e| WrapError(format!("cannot stat value descriptor: {e}")))?;

        Ok(GpioPort {
            gpio: handle.gpio(),
            consumer: ctx.consumer().to_string(),
            device: meta.dev(),
            inode: meta.ino(),
            file: handle.into_inner(),
        })
    }
}

/// Identity of whoever asks for a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Credentials {
    pub uid: u32,
}

impl Credentials {
    pub fn new(uid: u32) -> Self {
        Self { uid }
    }

    /// Effective credentials of the running process.
    pub fn current() -> Self {
        Self {
            uid: geteuid().as_raw(),
        }
    }
}

/// Permission-checked entry point that opens a line and wraps it.
pub struct GpioService<'r, B: SysfsBackend, W: HandleWrapper<B::File>> {
    controller: GpioController<B>,
    wrapper: W,
    registration: &'r Registration,
    allowed_uids: HashSet<u32>,
}

impl<'r, B: SysfsBackend, W: HandleWrapper<B::File>> GpioService<'r, B, W> {
    pub fn new(
        config: &ServiceConfig,
        backend: Arc<B>,
        wrapper: W,
        registration: &'r Registration,
    ) -> Result<Self, GpioError> {
        Ok(Self {
            controller: GpioController::new(config.controller.clone(), backend)?,
            wrapper,
            registration,
            allowed_uids: config.allowed_uids.clone(),
        })
    }

    pub fn is_permitted(&self, caller: Credentials) -> bool {
        caller.uid == 0 || self.allowed_uids.contains(&caller.uid)
    }

    pub fn open_gpio_port(
        &self,
        caller: Credentials,
        gpio: u32,
        direction: &str,
    ) -> Result<W::Output, GpioError> {
        if !self.is_permitted(caller) {
            error!("uid {} is not allowed to open gpio {gpio}", caller.uid);
            return Err(GpioError::PermissionDenied {
                uid: caller.uid,
                gpio,
            });
        }

        let handle = self.controller.open_line(gpio, direction).inspect_err(|e| {
            let stage = e.stage().map_or_else(|| "request".to_string(), |s| s.to_string());
            error!("Error opening gpio {gpio} at {stage}: {e}");
        })?;

        self.wrapper
            .wrap(self.registration, handle)
            .map_err(|e| {
                error!("Error opening gpio {gpio} at {}: {e}", Stage::Wrap);
                GpioError::HandleWrapFailed {
                    gpio,
                    reason: e.to_string(),
                }
            })
    }
}
