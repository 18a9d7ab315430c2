use crate::error::{Error, ErrorKind, Result};

/// The outcome of a call: a value, an error, or both.
///
/// A server may return a partial result together with an error. Both travel
/// in the same response frame, and a [`Reply`] keeps both of them. Use
/// [`Reply::into_result`] when the error should win.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply<T> {
    pub value: Option<T>,
    pub error: Option<Error>,
}

impl<T> Default for Reply<T> {
    fn default() -> Self {
        Self {
            value: None,
            error: None,
        }
    }
}

impl<T> Reply<T> {
    #[must_use]
    pub fn ok(value: T) -> Self {
        Self {
            value: Some(value),
            error: None,
        }
    }

    #[must_use]
    pub fn err(error: Error) -> Self {
        Self {
            value: None,
            error: Some(error),
        }
    }

    /// A value with an error attached.
    #[must_use]
    pub fn partial(value: T, error: Error) -> Self {
        Self {
            value: Some(value),
            error: Some(error),
        }
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// # Errors
    ///
    /// Returns the carried error if there is one, or `InvalidArgument` if the
    /// reply has neither value nor error (e.g. a oneway call).
    pub fn into_result(self) -> Result<T> {
        match (self.value, self.error) {
            (_, Some(error)) => Err(error),
            (Some(value), None) => Ok(value),
            (None, None) => Err(Error::new(
                ErrorKind::InvalidArgument,
                "reply carries no value",
            )),
        }
    }
}

impl<T> From<Result<T>> for Reply<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(value) => Self::ok(value),
            Err(error) => Self::err(error),
        }
    }
}
