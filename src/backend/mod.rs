mod mock;
mod sysfs;

pub use mock::{FsEvent, MockFile, MockSysfs};
pub use sysfs::SysfsFilesystem;
