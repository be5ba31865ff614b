//! # gnd-ingest
//!
//! Streaming ingestion of MARC21-XML authority records (GND) into flat
//! search documents.
//!
//! ## Overview
//!
//! A run moves every record through four stages:
//! - **Segmenting**: input lines are grouped into one block per record
//! - **Admission**: blocks are handed to a bounded worker pool; a full
//!   queue stalls the reader instead of buffering the whole file
//! - **Transformation**: each datafield is dispatched by its tag to the
//!   rules that fill the document (labels, identifiers, coordinates)
//! - **Delivery**: finished documents reach the sink in source order
//!
//! ## Example
//!
//! ```
//! use std::io::Cursor;
//! use gnd_ingest::{DispatchTable, MemorySink, Pipeline, PipelineConfig};
//!
//! let xml = concat!(
//!     "<record type=\"Authority\">\n",
//!     "<datafield tag=\"035\" ind1=\" \" ind2=\" \"><subfield code=\"a\">(DE-588)4021477-1</subfield></datafield>\n",
//!     "<datafield tag=\"150\" ind1=\" \" ind2=\" \"><subfield code=\"a\">Geschichte</subfield></datafield>\n",
//!     "</record>\n",
//! );
//!
//! let pipeline = Pipeline::new(PipelineConfig::default(), DispatchTable::gnd().unwrap()).unwrap();
//! let mut sink = MemorySink::new();
//! let summary = pipeline.run(Cursor::new(xml), &mut sink).unwrap();
//!
//! assert_eq!(summary.emitted, 1);
//! assert_eq!(sink.documents[0].preferred(), Some("Geschichte"));
//! ```

pub mod config;
pub mod coordinates;
pub mod dispatch;
pub mod document;
pub mod error;
pub mod field;
pub mod lookup;
pub mod markup;
pub mod names;
pub mod pipeline;
pub mod pool;
pub mod segment;
pub mod sink;
pub mod transform;

pub use config::PipelineConfig;
pub use coordinates::{Coding, Coordinate};
pub use dispatch::{DispatchTable, RuleSpec, WriteMode};
pub use document::{Document, FieldValue};
pub use error::{
    AdmissionError, ConfigError, FieldError, PipelineError, RecordError, SinkError,
    StructuralParseError, TaskError, ValidationError,
};
pub use field::FieldGroup;
pub use lookup::{AuthorityLookup, AuthorityRecord, InMemoryLookup};
pub use markup::MarkupReader;
pub use names::NameStyle;
pub use pipeline::{Pipeline, RunSummary};
pub use pool::{Interrupt, PoolState, ResultHandle, ShutdownOutcome, WorkerPool};
pub use segment::{Block, Delimiters, TrailingBlock, segment};
pub use sink::{DocumentSink, JsonLinesSink, MemorySink};
pub use transform::RecordTransformer;
