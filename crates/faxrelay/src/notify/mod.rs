pub mod error;
pub mod message;
pub mod smtp;

pub use error::NotificationError;
pub use message::{compose_failure, compose_success, MessageKind, OutboundMessage};
pub use smtp::SmtpNotifier;

use crate::retry::{RetryFailure, RetryPolicy};

/// Outbound delivery of job results and failure alerts.
pub trait Notifier: Send + Sync {
    fn deliver(&self, message: &OutboundMessage) -> Result<(), NotificationError>;

    /// Connects and authenticates without sending anything.
    fn self_test(&self) -> Result<(), NotificationError>;
}

/// Delivers `message`, retrying transient transport failures under `policy`.
/// Returns the number of attempts made.
pub fn deliver_with_retry(
    notifier: &dyn Notifier,
    policy: &RetryPolicy,
    message: &OutboundMessage,
) -> Result<u32, NotificationError> {
    policy
        .run(
            "notification.deliver",
            |_| notifier.deliver(message),
            NotificationError::is_transient,
        )
        .map(|((), attempts)| attempts)
        .map_err(|failure| match failure {
            RetryFailure::Permanent { error, .. } => error,
            RetryFailure::Exhausted { error, attempts } => NotificationError::RetriesExhausted {
                attempts,
                last: Box::new(error),
            },
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::Backoff;
    use std::sync::Mutex;
    use std::time::Duration;

    struct Flaky {
        failures_left: Mutex<u32>,
        transient: bool,
        calls: Mutex<u32>,
    }

    impl Notifier for Flaky {
        fn deliver(&self, _: &OutboundMessage) -> Result<(), NotificationError> {
            *self.calls.lock().unwrap() += 1;
            let mut left = self.failures_left.lock().unwrap();
            if *left > 0 {
                *left -= 1;
                return Err(NotificationError::Transport {
                    message: "421 try later".to_string(),
                    transient: self.transient,
                });
            }
            Ok(())
        }

        fn self_test(&self) -> Result<(), NotificationError> {
            Ok(())
        }
    }

    fn message() -> OutboundMessage {
        OutboundMessage {
            subject: "s".to_string(),
            body: "b".to_string(),
            kind: MessageKind::Success,
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::ZERO, Backoff::Fixed)
    }

    #[test]
    fn test_transient_failure_retried() {
        let notifier = Flaky {
            failures_left: Mutex::new(2),
            transient: true,
            calls: Mutex::new(0),
        };
        assert_eq!(deliver_with_retry(&notifier, &policy(), &message()).unwrap(), 3);
    }

    #[test]
    fn test_exhaustion_reported() {
        let notifier = Flaky {
            failures_left: Mutex::new(5),
            transient: true,
            calls: Mutex::new(0),
        };
        let err = deliver_with_retry(&notifier, &policy(), &message()).unwrap_err();
        assert!(matches!(
            err,
            NotificationError::RetriesExhausted { attempts: 3, .. }
        ));
    }

    #[test]
    fn test_permanent_failure_not_retried() {
        let notifier = Flaky {
            failures_left: Mutex::new(1),
            transient: false,
            calls: Mutex::new(0),
        };
        assert!(deliver_with_retry(&notifier, &policy(), &message()).is_err());
        assert_eq!(*notifier.calls.lock().unwrap(), 1);
    }
}
