#![deny(missing_docs)]

//! Error handling for the molstore workspace.
//!
//! Every fallible operation returns a [`MolResult`]. Errors are built with [`mol_err!`] and
//! returned early with [`mol_bail!`]. Internal invariants that can never be violated by callers
//! use [`mol_panic!`] or [`MolExpect::mol_expect`] instead of raw `panic!`/`expect`.

pub use ext::*;

mod ext;

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::fmt::{Debug, Display, Formatter};
use std::ops::Deref;
use std::{fmt, io};

/// A string that can be used as an error message.
#[derive(Debug)]
pub struct ErrString(Cow<'static, str>);

impl<T> From<T> for ErrString
where
    T: Into<Cow<'static, str>>,
{
    fn from(msg: T) -> Self {
        Self(msg.into())
    }
}

impl AsRef<str> for ErrString {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Deref for ErrString {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for ErrString {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Alias so `thiserror` does not emit a nightly-only `provide` impl for backtrace fields.
type StdBacktrace = Backtrace;

/// The top-level error type for molstore.
#[derive(thiserror::Error)]
#[non_exhaustive]
pub enum MolError {
    /// A record property does not fit its leaf template.
    #[error("dimension mismatch: {0}\nBacktrace:\n{1}")]
    DimensionMismatch(ErrString, StdBacktrace),
    /// An insertion received something that is neither a record nor a list of records.
    #[error("unsupported instance type: {0}\nBacktrace:\n{1}")]
    UnsupportedType(ErrString, StdBacktrace),
    /// A retrieval received something that is neither an index pair nor a batch of pairs.
    #[error("unsupported selector: {0}\nBacktrace:\n{1}")]
    UnsupportedSelector(ErrString, StdBacktrace),
    /// A record omits a property required by the schema.
    #[error("missing property: {0}\nBacktrace:\n{1}")]
    MissingProperty(ErrString, StdBacktrace),
    /// Two element types were expected to be equal.
    #[error("expected type: {0} but instead got {1}\nBacktrace:\n{2}")]
    MismatchedTypes(ErrString, ErrString, StdBacktrace),
    /// An index is out of bounds.
    #[error("index {0} out of bounds from {1} to {2}\nBacktrace:\n{3}")]
    OutOfBounds(usize, usize, usize, StdBacktrace),
    /// An invalid argument was provided.
    #[error("{0}\nBacktrace:\n{1}")]
    InvalidArgument(ErrString, StdBacktrace),
    /// A path in the backend namespace does not exist.
    #[error("not found: {0}\nBacktrace:\n{1}")]
    NotFound(ErrString, StdBacktrace),
    /// A path in the backend namespace already exists.
    #[error("already exists: {0}\nBacktrace:\n{1}")]
    AlreadyExists(ErrString, StdBacktrace),
    /// An internal invariant was violated.
    #[error("{0}\nBacktrace:\n{1}")]
    AssertionFailed(ErrString, StdBacktrace),
    /// A wrapper for IO errors.
    #[error("{0}\nBacktrace:\n{1}")]
    IOError(io::Error, StdBacktrace),
    /// A wrapper for JSON (de)serialization errors.
    #[error("{0}\nBacktrace:\n{1}")]
    JSONError(serde_json::Error, StdBacktrace),
    /// A wrapper for other errors, carrying additional context.
    #[error("{0}: {1}")]
    Context(ErrString, Box<MolError>),
}

impl MolError {
    /// Adds additional context to an error.
    pub fn with_context<T: Into<ErrString>>(self, msg: T) -> Self {
        MolError::Context(msg.into(), Box::new(self))
    }

    /// Returns the innermost error, skipping over any [`MolError::Context`] layers.
    pub fn root(&self) -> &MolError {
        match self {
            MolError::Context(_, inner) => inner.root(),
            other => other,
        }
    }
}

impl Debug for MolError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

impl From<io::Error> for MolError {
    fn from(value: io::Error) -> Self {
        MolError::IOError(value, Backtrace::capture())
    }
}

impl From<serde_json::Error> for MolError {
    fn from(value: serde_json::Error) -> Self {
        MolError::JSONError(value, Backtrace::capture())
    }
}

/// A type alias for Results that return MolErrors as their error type.
pub type MolResult<T> = Result<T, MolError>;

/// A trait for expect-ing a MolResult or an Option.
pub trait MolExpect {
    /// The type of the value being expected.
    type Output;

    /// Returns the value of the result if it is Ok, otherwise panics with the error.
    /// Should be called only in contexts where the error condition represents a bug (programmer error).
    fn mol_expect(self, msg: &str) -> Self::Output;
}

impl<T, E> MolExpect for Result<T, E>
where
    E: Into<MolError>,
{
    type Output = T;

    #[inline(always)]
    fn mol_expect(self, msg: &str) -> Self::Output {
        self.map_err(|err| err.into())
            .unwrap_or_else(|e| mol_panic!(e.with_context(msg.to_string())))
    }
}

impl<T> MolExpect for Option<T> {
    type Output = T;

    #[inline(always)]
    fn mol_expect(self, msg: &str) -> Self::Output {
        self.unwrap_or_else(|| {
            let err = MolError::AssertionFailed(msg.to_string().into(), Backtrace::capture());
            mol_panic!(err)
        })
    }
}

/// A convenient macro for creating a MolError.
#[macro_export]
macro_rules! mol_err {
    (OutOfBounds: $idx:expr, $start:expr, $stop:expr) => {{
        $crate::__private::must_use(
            $crate::MolError::OutOfBounds($idx, $start, $stop, std::backtrace::Backtrace::capture())
        )
    }};
    (MismatchedTypes: $expected:expr, $actual:expr) => {{
        $crate::__private::must_use(
            $crate::MolError::MismatchedTypes(
                $expected.to_string().into(),
                $actual.to_string().into(),
                std::backtrace::Backtrace::capture(),
            )
        )
    }};
    ($variant:ident: $fmt:literal $(, $arg:expr)* $(,)?) => {{
        $crate::__private::must_use(
            $crate::MolError::$variant(format!($fmt, $($arg),*).into(), std::backtrace::Backtrace::capture())
        )
    }};
    ($fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::mol_err!(InvalidArgument: $fmt, $($arg),*)
    };
}

/// A convenience macro for returning a MolError.
#[macro_export]
macro_rules! mol_bail {
    ($($tt:tt)+) => {
        return Err($crate::mol_err!($($tt)+))
    };
}

/// A convenient macro for panicking with a MolError in the presence of a programmer error
/// (e.g., an invariant has been violated).
#[macro_export]
macro_rules! mol_panic {
    (OutOfBounds: $idx:expr, $start:expr, $stop:expr) => {{
        $crate::mol_panic!($crate::mol_err!(OutOfBounds: $idx, $start, $stop))
    }};
    ($variant:ident: $fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::mol_panic!($crate::mol_err!($variant: $fmt, $($arg),*))
    };
    ($err:expr, $fmt:literal $(, $arg:expr)* $(,)?) => {{
        let err: $crate::MolError = $err;
        #[allow(clippy::panic)]
        {
            panic!("{}", err.with_context(format!($fmt, $($arg),*)))
        }
    }};
    ($fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::mol_panic!($crate::mol_err!($fmt, $($arg),*))
    };
    ($err:expr) => {{
        let err: $crate::MolError = $err;
        #[allow(clippy::panic)]
        {
            panic!("{}", err)
        }
    }};
}

#[doc(hidden)]
pub mod __private {
    #[doc(hidden)]
    #[inline]
    #[must_use]
    pub const fn must_use(error: crate::MolError) -> crate::MolError {
        error
    }
}
