use thiserror::Error;
use wasm_bindgen::{JsCast, JsValue};

/// Errors surfaced by ingestion and map display.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GeoLayerError {
    /// Input could not be parsed; carries a human-readable cause.
    #[error("Parse failure: {0}")]
    ParseFailure(String),

    /// Declared kind not recognized, or an archive is missing required parts.
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Map view is not initialized")]
    NotInitialized,

    #[error("Map view is already initialized")]
    AlreadyInitialized,

    /// The rendering surface rejected an operation.
    #[error("Map surface failure: {0}")]
    SurfaceFailure(String),

    /// The host could not deliver the file contents.
    #[error("Failed to read file: {0}")]
    FileRead(String),

    #[error("Invalid viewer configuration: {0}")]
    InvalidConfig(String),
}

impl GeoLayerError {
    pub fn parse(cause: impl Into<String>) -> Self {
        GeoLayerError::ParseFailure(cause.into())
    }

    pub fn unsupported(cause: impl Into<String>) -> Self {
        GeoLayerError::UnsupportedFormat(cause.into())
    }
}

pub type Result<T> = std::result::Result<T, GeoLayerError>;

impl From<GeoLayerError> for JsValue {
    fn from(err: GeoLayerError) -> Self {
        js_sys::Error::new(&err.to_string()).into()
    }
}

// Best-effort message from a thrown JS value
pub(crate) fn js_error_message(value: &JsValue) -> String {
    if let Some(message) = value.as_string() {
        return message;
    }
    value
        .dyn_ref::<js_sys::Error>()
        .map(|e| String::from(e.message()))
        .unwrap_or_else(|| format!("{:?}", value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_the_cause() {
        let err = GeoLayerError::parse("<Point> is missing <coordinates>");
        assert_eq!(err.to_string(), "Parse failure: <Point> is missing <coordinates>");

        let err = GeoLayerError::unsupported("archive has no .shx index");
        assert_eq!(err.to_string(), "Unsupported format: archive has no .shx index");
    }
}
