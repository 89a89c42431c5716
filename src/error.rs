use std::io;

use thiserror::Error;

use crate::gpio::Stage;

/// Failure categories, independent of the attached context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ExportUnavailable,
    DirectionUnavailable,
    EdgeUnavailable,
    ValueOpenFailed,
    HandleWrapFailed,
    WriteFailed,
    PathOverflow,
    InvalidDirection,
    PermissionDenied,
    Config,
}

#[derive(Debug, Error)]
pub enum GpioError {
    #[error("Export unavailable for gpio {gpio}: {source}")]
    ExportUnavailable { gpio: u32, source: io::Error },
    #[error("Direction unavailable for gpio {gpio}: {source}")]
    DirectionUnavailable { gpio: u32, source: io::Error },
    #[error("Edge unavailable for gpio {gpio}: {source}")]
    EdgeUnavailable { gpio: u32, source: io::Error },
    #[error("Value open failed for gpio {gpio}: {source}")]
    ValueOpenFailed { gpio: u32, source: io::Error },
    #[error("Handle wrap failed for gpio {gpio}: {reason}")]
    HandleWrapFailed { gpio: u32, reason: String },
    #[error("Write to {stage} failed for gpio {gpio}: {source}")]
    WriteFailed {
        gpio: u32,
        stage: Stage,
        source: io::Error,
    },
    #[error("Path for {stage} of gpio {gpio} exceeds {capacity} bytes")]
    PathOverflow {
        gpio: u32,
        stage: Stage,
        capacity: usize,
    },
    #[error("Invalid direction for gpio {gpio}: {direction:?}")]
    InvalidDirection { gpio: u32, direction: String },
    #[error("Permission denied: uid {uid} may not open gpio {gpio}")]
    PermissionDenied { uid: u32, gpio: u32 },
    #[error("Configuration error: {0}")]
    Config(String),
}

impl GpioError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GpioError::ExportUnavailable { .. } => ErrorKind::ExportUnavailable,
            GpioError::DirectionUnavailable { .. } => ErrorKind::DirectionUnavailable,
            GpioError::EdgeUnavailable { .. } => ErrorKind::EdgeUnavailable,
            GpioError::ValueOpenFailed { .. } => ErrorKind::ValueOpenFailed,
            GpioError::HandleWrapFailed { .. } => ErrorKind::HandleWrapFailed,
            GpioError::WriteFailed { .. } => ErrorKind::WriteFailed,
            GpioError::PathOverflow { .. } => ErrorKind::PathOverflow,
            GpioError::InvalidDirection { .. } => ErrorKind::InvalidDirection,
            GpioError::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            GpioError::Config(_) => ErrorKind::Config,
        }
    }

    /// The sequence step that failed, if the error came from one.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            GpioError::ExportUnavailable { .. } => Some(Stage::Export),
            GpioError::DirectionUnavailable { .. } => Some(Stage::Direction),
            GpioError::EdgeUnavailable { .. } => Some(Stage::Edge),
            GpioError::ValueOpenFailed { .. } => Some(Stage::Value),
            GpioError::HandleWrapFailed { .. } => Some(Stage::Wrap),
            GpioError::WriteFailed { stage, .. } | GpioError::PathOverflow { stage, .. } => {
                Some(*stage)
            }
            GpioError::InvalidDirection { .. }
            | GpioError::PermissionDenied { .. }
            | GpioError::Config(_) => None,
        }
    }

    pub fn gpio(&self) -> Option<u32> {
        match self {
            GpioError::ExportUnavailable { gpio, .. }
            | GpioError::DirectionUnavailable { gpio, .. }
            | GpioError::EdgeUnavailable { gpio, .. }
            | GpioError::ValueOpenFailed { gpio, .. }
            | GpioError::HandleWrapFailed { gpio, .. }
            | GpioError::WriteFailed { gpio, .. }
            | GpioError::PathOverflow { gpio, .. }
            | GpioError::InvalidDirection { gpio, .. }
            | GpioError::PermissionDenied { gpio, .. } => Some(*gpio),
            GpioError::Config(_) => None,
        }
    }
}

impl From<GpioError> for io::Error {
    fn from(err: GpioError) -> Self {
        let kind = match err.kind() {
            ErrorKind::PermissionDenied => io::ErrorKind::PermissionDenied,
            ErrorKind::InvalidDirection | ErrorKind::PathOverflow => io::ErrorKind::InvalidInput,
            _ => io::ErrorKind::Other,
        };
        let msg = match err.gpio() {
            Some(gpio) => format!("Could not open Gpio port {gpio}: {err}"),
            None => err.to_string(),
        };
        io::Error::new(kind, msg)
    }
}
