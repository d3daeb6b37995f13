use std::borrow::Cow;
use std::error::Error as StdError;
use std::fmt::Display;
use std::fmt::Formatter;
use std::fmt::Result as FmtResult;
use std::io;


/// A result type using our [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;


/// An enum providing a rough classification of errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// An entity, such as a symbol source or file, was not found or is
    /// unavailable.
    NotFound,
    /// Data, such as the contents of a symbol container, is malformed.
    InvalidData,
    /// A parameter was incorrect.
    InvalidInput,
    /// The operation is not supported.
    Unsupported,
    /// An I/O error that does not fall under any other kind.
    Io,
    /// An error that does not fall under any other kind.
    Other,
}

impl ErrorKind {
    fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "entity not found",
            Self::InvalidData => "invalid data",
            Self::InvalidInput => "invalid input parameter",
            Self::Unsupported => "unsupported",
            Self::Io => "I/O error",
            Self::Other => "other error",
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}


/// The error type used by the library.
///
/// Errors carry a [kind][Self::kind] for programmatic handling and an
/// optional chain of human readable context, established via
/// [`ErrorExt`].
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    context: Option<Cow<'static, str>>,
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
}

impl Error {
    fn with_kind(kind: ErrorKind, context: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            context: Some(context.into()),
            source: None,
        }
    }

    /// Create a new [`Error`] of kind [`ErrorKind::NotFound`].
    pub fn with_not_found(context: impl Into<Cow<'static, str>>) -> Self {
        Self::with_kind(ErrorKind::NotFound, context)
    }

    /// Create a new [`Error`] of kind [`ErrorKind::InvalidData`].
    pub fn with_invalid_data(context: impl Into<Cow<'static, str>>) -> Self {
        Self::with_kind(ErrorKind::InvalidData, context)
    }

    /// Create a new [`Error`] of kind [`ErrorKind::InvalidInput`].
    pub fn with_invalid_input(context: impl Into<Cow<'static, str>>) -> Self {
        Self::with_kind(ErrorKind::InvalidInput, context)
    }

    /// Create a new [`Error`] of kind [`ErrorKind::Unsupported`].
    pub fn with_unsupported(context: impl Into<Cow<'static, str>>) -> Self {
        Self::with_kind(ErrorKind::Unsupported, context)
    }

    /// Retrieve the error's kind.
    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match &self.context {
            Some(context) => write!(f, "{context}")?,
            None => write!(f, "{}", self.kind)?,
        }
        if let Some(source) = &self.source {
            write!(f, ": {source}")?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<io::Error> for Error {
    fn from(other: io::Error) -> Self {
        let kind = match other.kind() {
            io::ErrorKind::NotFound => ErrorKind::NotFound,
            io::ErrorKind::InvalidData => ErrorKind::InvalidData,
            io::ErrorKind::InvalidInput => ErrorKind::InvalidInput,
            io::ErrorKind::Unsupported => ErrorKind::Unsupported,
            _ => ErrorKind::Io,
        };
        Self {
            kind,
            context: None,
            source: Some(Box::new(other)),
        }
    }
}


/// A trait providing ergonomic chaining of contextual information to
/// errors and results.
pub trait ErrorExt {
    /// The output type produced by [`context`][Self::context] and
    /// [`with_context`][Self::with_context].
    type Output;

    /// Add context to this error.
    fn context<C>(self, context: C) -> Self::Output
    where
        C: Into<Cow<'static, str>>;

    /// Add context to this error, using a closure for lazy evaluation.
    fn with_context<C, F>(self, f: F) -> Self::Output
    where
        C: Into<Cow<'static, str>>,
        F: FnOnce() -> C;
}

impl ErrorExt for Error {
    type Output = Error;

    fn context<C>(self, context: C) -> Self::Output
    where
        C: Into<Cow<'static, str>>,
    {
        Self {
            kind: self.kind,
            context: Some(context.into()),
            source: Some(Box::new(self)),
        }
    }

    fn with_context<C, F>(self, f: F) -> Self::Output
    where
        C: Into<Cow<'static, str>>,
        F: FnOnce() -> C,
    {
        self.context(f())
    }
}

impl<T, E> ErrorExt for Result<T, E>
where
    Error: From<E>,
{
    type Output = Result<T, Error>;

    fn context<C>(self, context: C) -> Self::Output
    where
        C: Into<Cow<'static, str>>,
    {
        self.map_err(|err| Error::from(err).context(context))
    }

    fn with_context<C, F>(self, f: F) -> Self::Output
    where
        C: Into<Cow<'static, str>>,
        F: FnOnce() -> C,
    {
        self.map_err(|err| Error::from(err).context(f()))
    }
}


#[cfg(test)]
mod tests {
    use super::*;


    /// Check that errors retain their kind when context is layered on
    /// top.
    #[test]
    fn kind_retention() {
        let err = Error::with_invalid_data("data is broken");
        assert_eq!(err.kind(), ErrorKind::InvalidData);

        let err = err.context("while reading symbols");
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    /// Make sure that the `Display` representation includes the full
    /// context chain.
    #[test]
    fn context_chain_display() {
        let err = Error::with_not_found("no such file");
        let err = err.context("failed to open symbol source");
        assert_eq!(
            err.to_string(),
            "failed to open symbol source: no such file"
        );
    }

    /// Check that `io::Error` kinds map to the expected [`ErrorKind`].
    #[test]
    fn io_error_conversion() {
        let err = Error::from(io::Error::new(io::ErrorKind::NotFound, "oops"));
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = Error::from(io::Error::new(io::ErrorKind::WouldBlock, "oops"));
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    /// Check that context can be added to a `Result` directly.
    #[test]
    fn result_context() {
        let result = Result::<(), _>::Err(io::Error::new(io::ErrorKind::InvalidData, "junk"));
        let err = result.with_context(|| "failed to parse").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
        assert!(err.to_string().starts_with("failed to parse"), "{err}");
    }
}
