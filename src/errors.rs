use thiserror::Error;

/// WebSocket transport errors
#[derive(Error, Debug, Clone)]
pub enum WsError {
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Send error: {0}")]
    Send(String),
    #[error("Read error: {0}")]
    Read(String),
    #[error("Invalid endpoint url: {0}")]
    InvalidUrl(String),
}

/// Main client error type
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// WebSocket connection or framing error
    #[error("Websocket error: {0}")]
    Websocket(#[from] WsError),

    /// JSON parse error
    #[error("Json parse error: {0}")]
    JsonParse(String),

    /// Configuration could not be read or parsed
    #[error("Config error: {0}")]
    Config(String),

    /// Filesystem error
    #[error("IO error: {0}")]
    Io(String),

    /// Store snapshot could not be persisted or restored
    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::JsonParse(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ws_error_wraps_into_error() {
        let err: Error = WsError::Connection("refused".to_string()).into();
        assert_eq!(err.to_string(), "Websocket error: Connection error: refused");
    }

    #[test]
    fn test_json_error_conversion() {
        let parse = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: Error = parse.into();
        assert!(matches!(err, Error::JsonParse(_)));
    }
}
