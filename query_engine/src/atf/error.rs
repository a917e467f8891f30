use std::{fmt, io, path::PathBuf};

use thiserror::Error;

/// Category of an [`AtfError`], one per failure class of the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtfErrorKind {
    Mapping,
    Header,
    Manifest,
    Decode,
    NotOpen,
}

#[derive(Debug, Error)]
pub enum AtfError {
    #[error("memory map error: {0}")]
    Mapping(String),
    #[error("memory map error at {path:?}: {source}")]
    MappingIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("header validation error: {0}")]
    Header(String),
    #[error("manifest parse error: {0}")]
    Manifest(String),
    #[error("event decode error: {0}")]
    Decode(String),
    #[error("{0} is not open")]
    NotOpen(&'static str),
}

pub type AtfResult<T> = Result<T, AtfError>;

impl AtfError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::MappingIo {
            path: path.into(),
            source,
        }
    }

    pub fn mapping(details: impl fmt::Display) -> Self {
        Self::Mapping(details.to_string())
    }

    pub fn header(details: impl fmt::Display) -> Self {
        Self::Header(details.to_string())
    }

    pub fn manifest(details: impl fmt::Display) -> Self {
        Self::Manifest(details.to_string())
    }

    pub fn decode(details: impl fmt::Display) -> Self {
        Self::Decode(details.to_string())
    }

    pub fn kind(&self) -> AtfErrorKind {
        match self {
            AtfError::Mapping(_) | AtfError::MappingIo { .. } => AtfErrorKind::Mapping,
            AtfError::Header(_) => AtfErrorKind::Header,
            AtfError::Manifest(_) => AtfErrorKind::Manifest,
            AtfError::Decode(_) => AtfErrorKind::Decode,
            AtfError::NotOpen(_) => AtfErrorKind::NotOpen,
        }
    }
}
