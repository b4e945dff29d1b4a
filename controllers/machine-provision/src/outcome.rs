//! Reconcile outcomes.
//!
//! A reconcile step either finished (`Done`) or has to run again later
//! without the current state being treated as final or as a failure
//! (`RetryWithoutFinalizing`). Failures travel separately as the `Err` side
//! of `Result<Outcome<T>, ControllerError>`.

use std::time::Duration;

/// Non-error result of a reconcile step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    /// Step finished with a value
    Done(T),
    /// Run again later; keep any finalizer in place.
    ///
    /// `requeue_after` schedules the re-check. `None` waits for the next
    /// change event.
    RetryWithoutFinalizing { requeue_after: Option<Duration> },
}

impl<T> Outcome<T> {
    /// Retry after a fixed delay
    pub fn retry_after(delay: Duration) -> Self {
        Outcome::RetryWithoutFinalizing {
            requeue_after: Some(delay),
        }
    }

    /// Retry on the next change event
    pub fn retry_on_change() -> Self {
        Outcome::RetryWithoutFinalizing { requeue_after: None }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Outcome::Done(_))
    }

    /// Maps the `Done` value, keeping a retry as is
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Done(value) => Outcome::Done(f(value)),
            Outcome::RetryWithoutFinalizing { requeue_after } => Outcome::RetryWithoutFinalizing { requeue_after },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_keeps_retry_delay() {
        let retry: Outcome<u8> = Outcome::retry_after(Duration::from_secs(5));
        assert_eq!(retry.map(|_| "x"), Outcome::retry_after(Duration::from_secs(5)));
        assert_eq!(Outcome::Done(2).map(|v| v * 2), Outcome::Done(4));
        assert!(!Outcome::<()>::retry_on_change().is_done());
    }
}
