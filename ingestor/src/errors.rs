use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Unknown station: {0}")]
    UnknownStation(String),

    #[error("Malformed payload: {field}: {reason}")]
    MalformedPayload { field: String, reason: String },

    #[error("Malformed timestamp: {0:?}")]
    MalformedTimestamp(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("MQTT error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),
}

impl Error {
    pub fn malformed(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::MalformedPayload {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Only store failures are worth retrying; bad input stays bad.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::StoreUnavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors() {
        assert!(Error::StoreUnavailable(sqlx::Error::PoolClosed).is_transient());
        assert!(!Error::UnknownStation("XX".to_string()).is_transient());
        assert!(!Error::malformed("time", "missing").is_transient());
        assert!(!Error::MalformedTimestamp("yesterday".to_string()).is_transient());
    }

    #[test]
    fn test_malformed_payload_cites_field() {
        let err = Error::malformed("dome.t.t_sht", "expected a number");
        assert_eq!(
            err.to_string(),
            "Malformed payload: dome.t.t_sht: expected a number"
        );
    }
}
