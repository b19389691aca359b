use crate::{ErrString, MolResult};

/// Extension trait for MolResult
pub trait ResultExt<T>: private::Sealed {
    /// Wrap the error, if any, in a [`crate::MolError::Context`] whose message is only built on
    /// failure.
    fn with_context<F, S>(self, msg: F) -> MolResult<T>
    where
        F: FnOnce() -> S,
        S: Into<ErrString>;
}

mod private {
    use crate::MolResult;

    pub trait Sealed {}

    impl<T> Sealed for MolResult<T> {}
}

impl<T> ResultExt<T> for MolResult<T> {
    fn with_context<F, S>(self, msg: F) -> MolResult<T>
    where
        F: FnOnce() -> S,
        S: Into<ErrString>,
    {
        self.map_err(|e| e.with_context(msg()))
    }
}
