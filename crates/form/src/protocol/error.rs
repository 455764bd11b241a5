use std::io;
use thiserror::Error;

/// Top-level error returned while turning a request into a [`Form`](crate::form::Form).
#[derive(Debug, Error)]
pub enum FormError {
    #[error("decode error: {source}")]
    Decode {
        #[from]
        source: DecodeError,
    },

    #[error("invalid value for field '{field}': {source}")]
    Conversion { field: String, source: ConversionError },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl FormError {
    pub fn conversion<S: ToString>(field: S, source: ConversionError) -> Self {
        Self::Conversion { field: field.to_string(), source }
    }

    /// Returns the converter error if this is a field-level failure.
    pub fn as_conversion(&self) -> Option<&ConversionError> {
        match self {
            FormError::Conversion { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Which part of a multipart body was being read when the input ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TruncatedStage {
    Header,
    Body,
}

impl std::fmt::Display for TruncatedStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TruncatedStage::Header => f.write_str("part header"),
            TruncatedStage::Body => f.write_str("part body"),
        }
    }
}

/// Transport level failures. Any of these aborts the whole parse.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("invalid boundary in multipart form: {boundary:?}")]
    InvalidBoundary { boundary: String },

    #[error("multipart content type without boundary")]
    MissingBoundary,

    #[error("input truncated while reading {stage}")]
    Truncated { stage: TruncatedStage },

    #[error("content-length mismatch, expected {expected} bytes but got {actual}")]
    ContentLengthMismatch { expected: u64, actual: u64 },

    #[error("invalid content-length header: {reason}")]
    InvalidContentLength { reason: String },

    #[error("part header size too large, current: {current_size} exceed the limit {max_size}")]
    TooLargeHeader { current_size: usize, max_size: usize },

    #[error("multipart part number exceed the limit {max_num}")]
    TooManyParts { max_num: usize },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl DecodeError {
    pub fn invalid_boundary<S: ToString>(boundary: S) -> Self {
        Self::InvalidBoundary { boundary: boundary.to_string() }
    }

    pub fn truncated(stage: TruncatedStage) -> Self {
        Self::Truncated { stage }
    }

    pub fn content_length_mismatch(expected: u64, actual: u64) -> Self {
        Self::ContentLengthMismatch { expected, actual }
    }

    pub fn invalid_content_length<S: ToString>(str: S) -> Self {
        Self::InvalidContentLength { reason: str.to_string() }
    }

    pub fn too_large_header(current_size: usize, max_size: usize) -> Self {
        Self::TooLargeHeader { current_size, max_size }
    }

    pub fn too_many_parts(max_num: usize) -> Self {
        Self::TooManyParts { max_num }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }
}

/// A converter rejected a raw field value.
///
/// `message` is the user facing text, `value` the literal input that failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ConversionError {
    message: String,
    value: String,
}

impl ConversionError {
    pub fn new<M: ToString, V: ToString>(message: M, value: V) -> Self {
        Self { message: message.to_string(), value: value.to_string() }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("existing converter for field_type: {field_type}")]
    AlreadyRegistered { field_type: String },
}
