use thiserror::Error;

#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("Failed to build message: {0}")]
    Build(String),

    #[error("Mail transport error: {message}")]
    Transport { message: String, transient: bool },

    #[error("Delivery failed after {attempts} attempt(s): {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<NotificationError>,
    },

    #[error("Mail server did not accept the connection test")]
    SelfTestRejected,
}

impl NotificationError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transport {
                transient: true,
                ..
            }
        )
    }
}

impl From<lettre::transport::smtp::Error> for NotificationError {
    fn from(err: lettre::transport::smtp::Error) -> Self {
        // 5xx replies (bad credentials, rejected recipient) and client-side
        // errors will not improve on retry; network drops and 4xx replies may.
        let transient = !(err.is_permanent() || err.is_client());
        Self::Transport {
            message: err.to_string(),
            transient,
        }
    }
}

impl From<lettre::error::Error> for NotificationError {
    fn from(err: lettre::error::Error) -> Self {
        Self::Build(err.to_string())
    }
}

impl From<lettre::address::AddressError> for NotificationError {
    fn from(err: lettre::address::AddressError) -> Self {
        Self::Build(err.to_string())
    }
}
