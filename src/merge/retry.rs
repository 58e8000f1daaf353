//! Bounded retry with feedback.
//!
//! Each attempt sees the error from the previous one, so a caller can turn
//! it into feedback for the next try.

/// What one attempt produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Attempt<T, E> {
    /// Success; stop.
    Done(T),
    /// Failed, worth another try.
    Retry(E),
    /// Failed, retrying cannot help; stop.
    Fatal(E),
}

/// Why [`bounded`] gave up.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RetryError<E> {
    /// Every attempt asked to retry.
    Exhausted {
        /// Attempts made.
        attempts: u32,
        /// Error from the last attempt.
        last: E,
    },
    /// An attempt failed fatally.
    Aborted {
        /// Attempts made, including the fatal one.
        attempts: u32,
        /// The fatal error.
        error: E,
    },
}

impl<E> RetryError<E> {
    /// Attempts made before giving up.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. } | Self::Aborted { attempts, .. } => *attempts,
        }
    }

    /// The final error.
    #[must_use]
    pub fn into_error(self) -> E {
        match self {
            Self::Exhausted { last, .. } => last,
            Self::Aborted { error, .. } => error,
        }
    }
}

/// Run `attempt` up to `max_attempts` times (at least once).
///
/// The closure receives the 1-based attempt number and the error from the
/// previous attempt (`None` on the first). On success returns the value and
/// the number of attempts it took.
pub fn bounded<T, E, F>(max_attempts: u32, mut attempt: F) -> Result<(T, u32), RetryError<E>>
where
    F: FnMut(u32, Option<&E>) -> Attempt<T, E>,
{
    let max_attempts = max_attempts.max(1);
    let mut last: Option<E> = None;
    let mut n = 1;
    loop {
        match attempt(n, last.as_ref()) {
            Attempt::Done(value) => return Ok((value, n)),
            Attempt::Fatal(error) => return Err(RetryError::Aborted { attempts: n, error }),
            Attempt::Retry(error) if n >= max_attempts => {
                return Err(RetryError::Exhausted {
                    attempts: n,
                    last: error,
                });
            }
            Attempt::Retry(error) => {
                last = Some(error);
                n += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_success_stops() {
        let mut calls = 0;
        let result: Result<(&str, u32), RetryError<String>> = bounded(3, |_, _| {
            calls += 1;
            Attempt::Done("ok")
        });
        assert_eq!(result.unwrap(), ("ok", 1));
        assert_eq!(calls, 1);
    }

    #[test]
    fn previous_error_is_passed_along() {
        let mut seen = Vec::new();
        let result = bounded(3, |n, prev: Option<&String>| {
            seen.push(prev.cloned());
            if n < 3 {
                Attempt::Retry(format!("fail {n}"))
            } else {
                Attempt::Done(n)
            }
        });
        assert_eq!(result.unwrap(), (3, 3));
        assert_eq!(
            seen,
            vec![None, Some("fail 1".to_owned()), Some("fail 2".to_owned())]
        );
    }

    #[test]
    fn exhaustion_keeps_last_error() {
        let result: Result<((), u32), _> = bounded(3, |n, _| Attempt::Retry(n));
        assert_eq!(result, Err(RetryError::Exhausted { attempts: 3, last: 3 }));
    }

    #[test]
    fn fatal_stops_immediately() {
        let mut calls = 0;
        let result: Result<((), u32), _> = bounded(5, |n, _| {
            calls += 1;
            if n == 2 { Attempt::Fatal("boom") } else { Attempt::Retry("again") }
        });
        assert_eq!(result, Err(RetryError::Aborted { attempts: 2, error: "boom" }));
        assert_eq!(calls, 2);
    }

    #[test]
    fn zero_max_still_tries_once() {
        let result: Result<((), u32), _> = bounded(0, |_, _| Attempt::Retry("x"));
        assert_eq!(result.unwrap_err().attempts(), 1);
    }
}
