use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{
    error::{Error, ErrorKind, Result},
    msg::{Meta, Request},
};

/// Execution context passed to every stub and service method.
///
/// A context carries a cancellation token, an optional deadline and request
/// metadata. Derived contexts (`with_timeout`, `with_deadline`, `child`) are
/// cancelled together with their parent.
#[derive(Clone, Debug, Default)]
pub struct Context {
    cancel: CancellationToken,
    deadline: Option<Instant>,
    meta: Arc<Meta>,
    request_id: u32,
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    #[must_use]
    pub fn background() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            deadline: self.deadline,
            meta: self.meta.clone(),
            request_id: self.request_id,
        }
    }

    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Keeps the earlier of the current deadline and `deadline`.
    #[must_use]
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let mut ctx = self.child();
        ctx.deadline = Some(ctx.deadline.map_or(deadline, |d| d.min(deadline)));
        ctx
    }

    /// Adds an entry that the client copies into the request meta.
    #[must_use]
    pub fn with_meta(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut ctx = self.clone();
        Arc::make_mut(&mut ctx.meta).insert(key.into(), value.into());
        ctx
    }

    pub(crate) fn server_ctx(req: &Request) -> Self {
        Self {
            meta: Arc::new(req.meta.clone()),
            request_id: req.request_id,
            ..Self::background()
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    #[must_use]
    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    /// The id of the request being served; zero on client contexts.
    #[must_use]
    pub fn request_id(&self) -> u32 {
        self.request_id
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn done(&self) -> Error {
        if let Some(deadline) = self.deadline {
            tokio::select! {
                () = self.cancel.cancelled() => Error::kind(ErrorKind::Cancelled),
                () = tokio::time::sleep_until(deadline) => {
                    Error::new(ErrorKind::Timeout, "deadline exceeded")
                }
            }
        } else {
            self.cancel.cancelled().await;
            Error::kind(ErrorKind::Cancelled)
        }
    }

    /// Runs `fut` until it completes or the context is done.
    ///
    /// # Errors
    ///
    /// Returns the future's own error, or `Cancelled`/`Timeout`.
    pub async fn run<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            result = fut => result,
            err = self.done() => Err(err),
        }
    }
}
