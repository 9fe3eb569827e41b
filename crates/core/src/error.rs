use thiserror::Error;

pub type Result<T, E = ExchangeError> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExchangeError {
    /// A pair symbol or numeric field could not be parsed.
    #[error("format error: {0}")]
    Format(String),
    #[error("{0}: authenticated request attempted without api key/secret configured")]
    CredentialsMissing(String),
    /// The exchange throttled the request. Callers may fall back to the last
    /// cached snapshot instead of failing.
    #[error("http request rate limited")]
    RateLimited,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unexpected http status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    /// Structured error payload returned by the exchange, message kept verbatim.
    #[error("{exchange} error: {message}")]
    Exchange { exchange: String, message: String },
    #[error("{exchange} does not support {operation}")]
    Unsupported {
        exchange: String,
        operation: &'static str,
    },
    /// An order breaks a declared precision or minimum.
    #[error("order rejected by limits: {0}")]
    Limits(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("signature error: {0}")]
    Signature(String),
    #[error("empty response from {0}")]
    EmptyResponse(String),
    #[error("failed to deserialize payload: {0}")]
    Deserialize(String),
}

impl ExchangeError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ExchangeError::RateLimited)
    }

    pub fn unsupported(exchange: impl Into<String>, operation: &'static str) -> Self {
        ExchangeError::Unsupported {
            exchange: exchange.into(),
            operation,
        }
    }

    pub fn business(exchange: impl Into<String>, message: impl Into<String>) -> Self {
        ExchangeError::Exchange {
            exchange: exchange.into(),
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for ExchangeError {
    fn from(err: serde_json::Error) -> Self {
        ExchangeError::Deserialize(err.to_string())
    }
}

impl From<rust_decimal::Error> for ExchangeError {
    fn from(err: rust_decimal::Error) -> Self {
        ExchangeError::Format(err.to_string())
    }
}
