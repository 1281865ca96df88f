//! Error taxonomy of the write session.

use std::path::PathBuf;

use rust_xlsxwriter::XlsxError;
use thiserror::Error;

/// Errors raised by the write session.
#[derive(Debug, Error)]
pub enum XlsxWriteError {
    /// Invalid target or options, or use of a finished session.
    #[error("invalid write configuration: {0}")]
    Config(String),

    /// Workbook, sheet, table or header creation failed.
    #[error("failed to generate {message}")]
    Generate {
        message: String,
        #[source]
        source: Box<XlsxWriteError>,
    },

    /// Finish failed; carries the first failure captured during finalize.
    #[error("cannot finalize workbook: {0}")]
    Finalize(#[source] Box<XlsxWriteError>),

    /// Temporary file used for stream encryption could not be deleted.
    #[error("cannot delete temporary file {path}: {source}")]
    TempFileCleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Encryption container could not be built or parsed.
    #[error("encryption error: {0}")]
    Crypto(String),

    /// Template workbook could not be read.
    #[error("template error: {0}")]
    Template(String),

    /// Lifecycle handler failure.
    #[error("handler error: {0}")]
    Handler(String),

    #[error("xlsx write error: {0}")]
    Xlsx(#[from] XlsxError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl XlsxWriteError {
    /// Wrap `self` as a generation failure of `message`.
    pub fn into_generate(self, message: impl Into<String>) -> XlsxWriteError {
        XlsxWriteError::Generate {
            message: message.into(),
            source: Box::new(self),
        }
    }

    /// First captured cause when `self` is a finalize failure.
    pub fn finalize_cause(&self) -> Option<&XlsxWriteError> {
        match self {
            XlsxWriteError::Finalize(cause) => Some(cause.as_ref()),
            _ => None,
        }
    }
}

impl From<calamine::Error> for XlsxWriteError {
    fn from(err: calamine::Error) -> Self {
        XlsxWriteError::Template(err.to_string())
    }
}

/// Result alias of the write session.
pub type Result<T> = std::result::Result<T, XlsxWriteError>;

/// Outcome of locating an existing sheet in the engine workbook.
///
/// A miss is recoverable and makes the caller create a fresh sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumSheetLookup {
    /// Sheet exists at this workbook index.
    Found(usize),
    /// No matching sheet.
    NotFound,
}

/// Holds at most one error; later captures are ignored.
#[derive(Debug, Default)]
pub struct ErrorSlot {
    err_first: Option<XlsxWriteError>,
}

impl ErrorSlot {
    /// Keep `err` only when no error was captured yet.
    pub fn capture(&mut self, err: XlsxWriteError) {
        if self.err_first.is_none() {
            self.err_first = Some(err);
        } else {
            log::debug!("Dropping subsequent finalize failure: {err}");
        }
    }

    /// Capture the error side of `result`.
    pub fn capture_result<T>(&mut self, result: Result<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                self.capture(err);
                None
            }
        }
    }

    /// Whether an error was captured.
    pub fn is_empty(&self) -> bool {
        self.err_first.is_none()
    }

    /// Convert into `Err(Finalize(first))` when an error was captured.
    pub fn into_result(self) -> Result<()> {
        match self.err_first {
            Some(err) => Err(XlsxWriteError::Finalize(Box::new(err))),
            None => Ok(()),
        }
    }
}
