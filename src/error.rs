//! Error taxonomy for the ingestion pipeline.
//!
//! Errors are layered by how far they are allowed to travel:
//!
//! - [`FieldError`] never leaves the transformer; the offending datafield is
//!   skipped and the record continues.
//! - [`RecordError`] ends one record (structural parse failure or failed
//!   validation) and is counted by the orchestrator.
//! - [`PipelineError`] stops the run.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Malformed markup inside one block. Aborts that record only.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StructuralParseError {
    #[error("no <record> element found")]
    MissingRecord,

    #[error("closing tag </{found}> does not match open element <{expected}>")]
    MismatchedClose { expected: String, found: String },

    #[error("closing tag </{0}> without an open element")]
    UnmatchedClose(String),

    #[error("element <{0}> is still open at the end of the record")]
    Unclosed(String),

    #[error("datafield {0} opened inside another datafield")]
    NestedDataField(String),

    #[error("subfield outside of a datafield")]
    OrphanSubfield,

    #[error("element <{0}> inside a subfield")]
    ElementInSubfield(String),

    #[error("<{element}> is missing the '{attribute}' attribute")]
    MissingAttribute {
        element: &'static str,
        attribute: &'static str,
    },

    #[error("subfield code '{0}' is not a single character")]
    InvalidSubfieldCode(String),

    #[error("unreadable markup at byte {0}")]
    Malformed(usize),
}

/// Invalid or missing data in one datafield. The field is skipped.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FieldError {
    #[error("mandatory subfield ${0} is missing")]
    MissingSubfield(char),

    #[error("subfield ${code} has malformed value \"{value}\": {reason}")]
    Malformed {
        code: char,
        value: String,
        reason: String,
    },

    #[error("coordinate ({latitude}, {longitude}) is outside the valid range")]
    OutOfRange { latitude: f64, longitude: f64 },

    #[error("unsupported coordinate coding '{0}'")]
    UnsupportedCoding(char),
}

/// A finalized document is missing mandatory data and is dropped.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("record has no identifier")]
    MissingIdentifier,

    #[error("record {id} has no preferred label")]
    MissingPreferredLabel { id: String },
}

/// Why a block produced no document.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordError {
    #[error("structural error in record starting at line {line}: {source}")]
    Structural {
        line: usize,
        #[source]
        source: StructuralParseError,
    },

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Submission to the worker pool failed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AdmissionError {
    #[error("worker pool '{0}' is shutting down")]
    Closed(String),

    #[error("submission to worker pool '{0}' was interrupted")]
    Interrupted(String),

    #[error("worker pool '{0}' began shutting down during submission")]
    Disconnected(String),
}

/// A submitted task did not produce a value.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TaskError {
    #[error("task panicked: {0}")]
    Panicked(String),

    #[error("task was abandoned by a hard stop")]
    Abandoned,

    #[error("worker exited without reporting a result")]
    Lost,
}

/// Failure reported by a document sink.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("sink I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to serialize document: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("document rejected by sink: {0}")]
    Rejected(String),
}

/// Invalid configuration or dispatch table.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid pattern for {name}: {source}")]
    InvalidPattern {
        name: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid parameter '{parameter}': {reason}")]
    InvalidParameter { parameter: String, reason: String },
}

/// Errors that stop a pipeline run.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Admission(#[from] AdmissionError),

    #[error("failed reading the source: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("record starting at line {line} failed: {source}")]
    Task {
        line: usize,
        #[source]
        source: TaskError,
    },

    #[error("pipeline was interrupted")]
    Interrupted,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("reader thread terminated abnormally")]
    ReaderPanicked,
}
