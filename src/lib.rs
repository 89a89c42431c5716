//! Opens sysfs GPIO lines: export, set direction and edge, then hand back
//! the open `value` attribute.

mod backend;
mod config;
mod error;
mod gpio;
mod service;

pub use backend::{FsEvent, MockFile, MockSysfs, SysfsFilesystem};
pub use config::{ControllerConfig, ServiceConfig};
pub use error::{ErrorKind, GpioError};
pub use gpio::{
    EdgeDetect, GpioController, LINE_EDGE, LineHandle, OpenMode, PATH_BUFFER_CAPACITY, Stage,
    SysfsBackend,
};
pub use service::{
    Credentials, GpioPort, GpioService, HandleWrapper, PortWrapper, Registration, WrapError,
};
