use thiserror::Error;

/// Everything that can stop the assistant short of a final estimate.
///
/// Off-topic is deliberately absent: the backend understood the request
/// and ruled it out of domain, which is a valid outcome, not a failure.
#[derive(Debug, Clone, Error)]
pub enum AssistantError {
    #[error("image could not be read: {0}")]
    ImageLoad(String),

    #[error("batch is limited to {limit} image(s)")]
    BatchFull { limit: usize },

    #[error("photos total {total_mb:.1} MB, over the {limit_mb:.0} MB upload limit")]
    PayloadTooLarge { total_mb: f64, limit_mb: f64 },

    #[error("server rejected the upload as too large")]
    ServerPayloadTooLarge,

    #[error("server timed out while analyzing")]
    ServerTimeout,

    #[error("no answer within {timeout_ms} ms")]
    ClientTimeout { timeout_ms: u64 },

    #[error("network request failed: {0}")]
    Network(String),

    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("a request is already in flight")]
    Busy,
}

impl AssistantError {
    /// One-line guidance shown next to the failure. Every failure path
    /// must leave the user with something actionable.
    pub fn user_message(&self) -> String {
        match self {
            Self::ImageLoad(_) => {
                "That photo could not be read. Try a different file or retake it.".to_string()
            }
            Self::BatchFull { limit } => {
                format!("You can attach at most {limit} photo(s) on this device.")
            }
            Self::PayloadTooLarge { .. } | Self::ServerPayloadTooLarge => {
                "The photos are too large to upload. Please use smaller photos.".to_string()
            }
            Self::ServerTimeout | Self::ClientTimeout { .. } => {
                "The analysis took too long. Try again with fewer or smaller photos.".to_string()
            }
            Self::Network(_) => {
                "Could not reach the estimate service. Check your connection and retry.".to_string()
            }
            Self::Server { .. } => {
                "The estimate service had a problem. Please try again in a moment.".to_string()
            }
            Self::Busy => "Hold on, the previous request is still being analyzed.".to_string(),
        }
    }

    /// True for failures where resubmitting the same batch may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ServerTimeout
                | Self::ClientTimeout { .. }
                | Self::Network(_)
                | Self::Server { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::AssistantError;

    #[test]
    fn every_variant_has_guidance() {
        let errors = [
            AssistantError::ImageLoad("bad jpeg".to_string()),
            AssistantError::BatchFull { limit: 1 },
            AssistantError::PayloadTooLarge {
                total_mb: 4.5,
                limit_mb: 4.0,
            },
            AssistantError::ServerPayloadTooLarge,
            AssistantError::ServerTimeout,
            AssistantError::ClientTimeout { timeout_ms: 30_000 },
            AssistantError::Network("connection refused".to_string()),
            AssistantError::Server {
                status: 500,
                message: "boom".to_string(),
            },
            AssistantError::Busy,
        ];
        for error in errors {
            assert!(!error.user_message().trim().is_empty());
        }
    }

    #[test]
    fn timeout_guidance_mentions_smaller_photos() {
        let message = AssistantError::ClientTimeout { timeout_ms: 30_000 }.user_message();
        assert!(message.contains("fewer or smaller"));
    }

    #[test]
    fn size_failures_are_not_retryable_as_is() {
        assert!(!AssistantError::PayloadTooLarge {
            total_mb: 5.0,
            limit_mb: 4.0
        }
        .is_retryable());
        assert!(AssistantError::Network("reset".to_string()).is_retryable());
    }
}
