use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use url::Url;

use crate::error::{Result, ViewerError};

const EMBEDDED_PREFIXES: [&str; 2] = [
    "data:application/pdf;base64,",
    "data:application/octet-stream;base64,",
];

/// Raw source handed to the viewer by a caller.
///
/// The caller does not tag the input; strings are classified by content.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceInput {
    Text(String),
    Bytes(Bytes),
    /// Anything that is neither a string nor a byte buffer, carrying a
    /// description of what was supplied.
    Other(String),
}

impl SourceInput {
    /// Interprets a dynamically-typed value, e.g. one read from a config
    /// file or an IPC message. Arrays of integers in `0..=255` are treated as
    /// byte buffers; every other non-string shape becomes [`SourceInput::Other`].
    pub fn from_json(value: &serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::String(text) => SourceInput::Text(text.clone()),
            Value::Array(items) => {
                let bytes: Option<Vec<u8>> = items
                    .iter()
                    .map(|item| item.as_u64().and_then(|n| u8::try_from(n).ok()))
                    .collect();
                match bytes {
                    Some(bytes) => SourceInput::Bytes(Bytes::from(bytes)),
                    None => SourceInput::Other("array".to_string()),
                }
            }
            Value::Null => SourceInput::Other("null".to_string()),
            Value::Bool(_) => SourceInput::Other("boolean".to_string()),
            Value::Number(_) => SourceInput::Other("number".to_string()),
            Value::Object(_) => SourceInput::Other("object".to_string()),
        }
    }
}

impl From<&str> for SourceInput {
    fn from(value: &str) -> Self {
        SourceInput::Text(value.to_string())
    }
}

impl From<String> for SourceInput {
    fn from(value: String) -> Self {
        SourceInput::Text(value)
    }
}

impl From<&Path> for SourceInput {
    fn from(value: &Path) -> Self {
        SourceInput::Text(value.to_string_lossy().into_owned())
    }
}

impl From<Vec<u8>> for SourceInput {
    fn from(value: Vec<u8>) -> Self {
        SourceInput::Bytes(Bytes::from(value))
    }
}

impl From<&[u8]> for SourceInput {
    fn from(value: &[u8]) -> Self {
        SourceInput::Bytes(Bytes::copy_from_slice(value))
    }
}

impl From<Bytes> for SourceInput {
    fn from(value: Bytes) -> Self {
        SourceInput::Bytes(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Url,
    Base64,
    Binary,
}

/// Normalized, immutable description of where document bytes come from.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceDescriptor {
    Url(Url),
    /// Decoded payload of an embedded `data:` string.
    Base64(Bytes),
    Binary(Bytes),
}

impl SourceDescriptor {
    pub fn kind(&self) -> SourceKind {
        match self {
            SourceDescriptor::Url(_) => SourceKind::Url,
            SourceDescriptor::Base64(_) => SourceKind::Base64,
            SourceDescriptor::Binary(_) => SourceKind::Binary,
        }
    }

    /// In-memory bytes, if the source does not need fetching.
    pub fn bytes(&self) -> Option<&Bytes> {
        match self {
            SourceDescriptor::Url(_) => None,
            SourceDescriptor::Base64(bytes) | SourceDescriptor::Binary(bytes) => Some(bytes),
        }
    }
}

/// Classifies [`SourceInput`]s, resolving relative locations against a base.
#[derive(Debug, Clone)]
pub struct SourceResolver {
    base: Url,
}

impl SourceResolver {
    pub fn new(base: Url) -> Self {
        Self { base }
    }

    /// Resolves relative locations against the process working directory.
    pub fn from_current_dir() -> Result<Self> {
        let cwd = std::env::current_dir()
            .map_err(|err| ViewerError::Config(format!("failed to read working directory: {err}")))?;
        let base = Url::from_directory_path(&cwd)
            .map_err(|_| ViewerError::Config(format!("{} is not an absolute path", cwd.display())))?;
        Ok(Self::new(base))
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub fn resolve(&self, input: SourceInput) -> Result<SourceDescriptor> {
        match input {
            SourceInput::Text(text) => self.resolve_text(&text),
            SourceInput::Bytes(bytes) => Ok(SourceDescriptor::Binary(bytes)),
            SourceInput::Other(kind) => Err(ViewerError::InvalidSource(kind)),
        }
    }

    fn resolve_text(&self, text: &str) -> Result<SourceDescriptor> {
        if EMBEDDED_PREFIXES.iter().any(|prefix| text.starts_with(prefix)) {
            return decode_embedded(text).map(SourceDescriptor::Base64);
        }

        match Url::parse(text) {
            Ok(url) => Ok(SourceDescriptor::Url(url)),
            Err(url::ParseError::RelativeUrlWithoutBase) => self
                .base
                .join(text)
                .map(SourceDescriptor::Url)
                .map_err(|err| ViewerError::InvalidSource(format!("{text:?}: {err}"))),
            Err(err) => Err(ViewerError::InvalidSource(format!("{text:?}: {err}"))),
        }
    }
}

fn decode_embedded(text: &str) -> Result<Bytes> {
    let payload = text
        .split_once(',')
        .map(|(_, payload)| payload)
        .unwrap_or_default();
    BASE64
        .decode(payload)
        .map(Bytes::from)
        .map_err(|err| ViewerError::InvalidEmbeddedData(err.to_string()))
}
