use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::domain::{ShelfName, UserId};
use crate::error::ShelfError;

/// Deadline and cancellation signal tied to one inbound request.
///
/// Clones share the cancellation flag, so the request owner can cancel a
/// pipeline running on another thread.
#[derive(Debug, Clone)]
pub struct Deadline {
    expires_at: Option<Instant>,
    cancelled: Arc<AtomicBool>,
}

impl Deadline {
    /// A timeout too large to represent means no deadline.
    pub fn after(timeout: Duration) -> Self {
        Self {
            expires_at: Instant::now().checked_add(timeout),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn none() -> Self {
        Self {
            expires_at: None,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Time left before expiry. `None` means unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.expires_at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.is_cancelled() || self.remaining().is_some_and(|left| left.is_zero())
    }

    pub fn check(&self, stage: &'static str) -> Result<(), ShelfError> {
        if self.is_expired() {
            return Err(ShelfError::DeadlineExceeded { stage });
        }
        Ok(())
    }

    /// Caps `timeout` to the time left on this deadline.
    pub fn clamp(&self, timeout: Duration) -> Duration {
        match self.remaining() {
            Some(left) => timeout.min(left),
            None => timeout,
        }
    }
}

/// Authenticated caller identity and target shelf for one request.
///
/// Built once by whatever authenticated the caller and passed explicitly into
/// the pipeline.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub user_id: UserId,
    pub shelf: ShelfName,
    pub deadline: Deadline,
}

impl RequestContext {
    pub fn new(user_id: UserId, shelf: ShelfName, deadline: Deadline) -> Self {
        Self {
            user_id,
            shelf,
            deadline,
        }
    }

    /// Builds a context from raw, possibly absent values.
    ///
    /// Fails before any I/O when either value is missing or malformed.
    pub fn from_raw(
        user_id: Option<&str>,
        shelf: Option<&str>,
        deadline: Deadline,
    ) -> Result<Self, ShelfError> {
        let user_id = user_id
            .filter(|value| !value.trim().is_empty())
            .ok_or(ShelfError::MissingContext("user"))?
            .parse()?;
        let shelf = shelf
            .filter(|value| !value.trim().is_empty())
            .ok_or(ShelfError::MissingContext("shelf"))?
            .parse()?;
        Ok(Self::new(user_id, shelf, deadline))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn from_raw_requires_user_and_shelf() {
        let err = RequestContext::from_raw(None, Some("to-read"), Deadline::none()).unwrap_err();
        assert_matches!(err, ShelfError::MissingContext("user"));

        let err = RequestContext::from_raw(Some("42"), Some("  "), Deadline::none()).unwrap_err();
        assert_matches!(err, ShelfError::MissingContext("shelf"));

        let err =
            RequestContext::from_raw(Some("forty-two"), Some("to-read"), Deadline::none())
                .unwrap_err();
        assert_matches!(err, ShelfError::InvalidUserId(_));

        let ctx = RequestContext::from_raw(Some("42"), Some("To-Read"), Deadline::none()).unwrap();
        assert_eq!(ctx.user_id.get(), 42);
        assert_eq!(ctx.shelf.as_str(), "to-read");
    }

    #[test]
    fn cancelled_deadline_is_expired() {
        let deadline = Deadline::after(Duration::from_secs(60));
        let shared = deadline.clone();
        assert!(deadline.check("lookup").is_ok());
        shared.cancel();
        assert_matches!(
            deadline.check("lookup"),
            Err(ShelfError::DeadlineExceeded { stage: "lookup" })
        );
    }

    #[test]
    fn huge_timeout_does_not_overflow() {
        let deadline = Deadline::after(Duration::MAX);
        assert!(!deadline.is_expired());
        assert!(deadline.check("lookup").is_ok());
    }

    #[test]
    fn clamp_respects_remaining_time() {
        let deadline = Deadline::after(Duration::from_millis(50));
        assert!(deadline.clamp(Duration::from_secs(30)) <= Duration::from_millis(50));
        assert_eq!(
            Deadline::none().clamp(Duration::from_secs(30)),
            Duration::from_secs(30)
        );
    }
}
