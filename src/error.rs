use std::{error, fmt, io};

/// An error that occurred while linking a ROM image.
#[derive(Debug)]
pub struct Error {
    inner: ErrorInner,
}

#[derive(Debug)]
enum ErrorInner {
    Io(io::Error),
    Format(String),
    Naming(String),
    Linkage(String),
    Capacity(String),
    Relocation(String),
}

/// The kind of error, for callers that want to match without depending on the message text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// An I/O error occurred while reading or writing a file.
    Io,
    /// The object or archive text did not follow the expected grammar.
    Format,
    /// A module or directive symbol name could not be resolved.
    Naming,
    /// Symbol resolution or page/segment assignment failed.
    Linkage,
    /// A size budget (code segment, ROM, RAM) was exceeded.
    Capacity,
    /// A relocation record could not be applied.
    Relocation,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            ErrorInner::Io(e) => e.fmt(f),
            ErrorInner::Format(e) => write!(f, "format error: {e}"),
            ErrorInner::Naming(e) => write!(f, "naming error: {e}"),
            ErrorInner::Linkage(e) => write!(f, "linkage error: {e}"),
            ErrorInner::Capacity(e) => write!(f, "capacity error: {e}"),
            ErrorInner::Relocation(e) => write!(f, "relocation error: {e}"),
        }
    }
}

impl error::Error for Error {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error {
            inner: ErrorInner::Io(e),
        }
    }
}

impl Error {
    /// Get the kind of error.
    pub fn kind(&self) -> ErrorKind {
        match &self.inner {
            ErrorInner::Io(_) => ErrorKind::Io,
            ErrorInner::Format(_) => ErrorKind::Format,
            ErrorInner::Naming(_) => ErrorKind::Naming,
            ErrorInner::Linkage(_) => ErrorKind::Linkage,
            ErrorInner::Capacity(_) => ErrorKind::Capacity,
            ErrorInner::Relocation(_) => ErrorKind::Relocation,
        }
    }

    pub(crate) fn format(message: impl Into<String>) -> Self {
        Error {
            inner: ErrorInner::Format(message.into()),
        }
    }

    pub(crate) fn naming(message: impl Into<String>) -> Self {
        Error {
            inner: ErrorInner::Naming(message.into()),
        }
    }

    pub(crate) fn linkage(message: impl Into<String>) -> Self {
        Error {
            inner: ErrorInner::Linkage(message.into()),
        }
    }

    pub(crate) fn capacity(message: impl Into<String>) -> Self {
        Error {
            inner: ErrorInner::Capacity(message.into()),
        }
    }

    pub(crate) fn relocation(message: impl Into<String>) -> Self {
        Error {
            inner: ErrorInner::Relocation(message.into()),
        }
    }
}

/// The `Result` type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
