//! # Executor Composition
//!
//! An [`Executor`] is a deferred unit of work: a one-shot closure that, when run,
//! drives some provider operations and reports success or the first failure.
//! Workflows are assembled from the compositors in this module:
//!
//! - [`sequence`] runs children in order and stops at the first failure.
//! - [`parallel`] runs children concurrently and reports the first failure (in
//!   child order) once every child has finished.
//! - [`conditional`] picks a branch from a predicate evaluated at run time.
//! - [`errored`] defers a constructor-time failure until the executor runs.
//! - [`warn_on_fail`] logs and swallows failures matched by a predicate.
//!
//! Nothing runs until [`Executor::execute`] is awaited.
use std::fmt;
use std::future::Future;

use futures::future::{BoxFuture, FutureExt};
use log::{debug, warn};

use crate::kernel::error::{Error, Result};

type ExecutorFn = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

pub struct Executor {
    run: ExecutorFn,
}

impl Executor {
    /// Wrap an async closure as an executor.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            run: Box::new(move || f().boxed()),
        }
    }

    /// An executor that succeeds without doing anything.
    pub fn noop() -> Self {
        Self::new(|| async { Ok(()) })
    }

    /// Run the composed work to completion.
    pub async fn execute(self) -> Result<()> {
        (self.run)().await
    }
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Executor")
    }
}

/// Run `executors` one after another, returning the first failure.
pub fn sequence(executors: Vec<Executor>) -> Executor {
    Executor::new(move || async move {
        for executor in executors {
            executor.execute().await?;
        }
        Ok(())
    })
}

/// Run `executors` concurrently on the tokio runtime.
///
/// Every child runs to completion even when a sibling fails; the first failure in
/// child order is returned.
pub fn parallel(executors: Vec<Executor>) -> Executor {
    Executor::new(move || async move {
        let handles: Vec<_> = executors
            .into_iter()
            .map(|executor| tokio::spawn(executor.execute()))
            .collect();

        let mut first_error: Option<Error> = None;
        for handle in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(join_error) => Err(Error::Other(format!(
                    "Parallel executor task did not complete: {join_error}"
                ))),
            };
            if let Err(err) = outcome {
                if first_error.is_none() {
                    first_error = Some(err);
                } else {
                    debug!("Additional parallel failure: {err}");
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    })
}

/// Run `then` when `predicate` resolves to true, otherwise `otherwise` (if any).
pub fn conditional<P, PF>(predicate: P, then: Executor, otherwise: Option<Executor>) -> Executor
where
    P: FnOnce() -> PF + Send + 'static,
    PF: Future<Output = bool> + Send + 'static,
{
    Executor::new(move || async move {
        if predicate().await {
            then.execute().await
        } else if let Some(otherwise) = otherwise {
            otherwise.execute().await
        } else {
            Ok(())
        }
    })
}

/// An executor that fails with `error` when run.
pub fn errored(error: Error) -> Executor {
    Executor::new(move || async move { Err(error) })
}

/// Swallow failures of `executor` that match `predicate`, logging them as warnings.
pub fn warn_on_fail<P>(predicate: P, executor: Executor) -> Executor
where
    P: Fn(&Error) -> bool + Send + 'static,
{
    Executor::new(move || async move {
        match executor.execute().await {
            Err(err) if predicate(&err) => {
                warn!("  {err}");
                Ok(())
            }
            other => other,
        }
    })
}

/// Predicate for [`warn_on_fail`] that ignores every failure.
pub fn any_error(_: &Error) -> bool {
    true
}

#[cfg(test)]
mod tests;
