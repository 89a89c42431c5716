use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

use log::trace;

use crate::gpio::{OpenMode, SysfsBackend};

/// Backend over the real filesystem. Attributes are never created or
/// truncated; the kernel owns them.
#[derive(Debug, Default, Clone, Copy)]
pub struct SysfsFilesystem;

impl SysfsFilesystem {
    pub fn new() -> Self {
        Self
    }
}

impl SysfsBackend for SysfsFilesystem {
    type File = File;

    fn open(&self, path: &Path, mode: OpenMode) -> io::Result<File> {
        trace!("open {} ({mode:?})", path.display());
        let mut opts = OpenOptions::new();
        match mode {
            OpenMode::WriteOnly => opts.write(true),
            OpenMode::ReadWrite => opts.read(true).write(true),
        };
        opts.open(path)
    }
}
