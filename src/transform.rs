//! Block to document transformation.
//!
//! One call handles one record: the block markup is walked with the
//! [`MarkupReader`], every datafield is dispatched by tag, and the finished
//! document is validated. Field-level failures are logged and skipped;
//! only broken markup or a failed validation loses the record.

use std::sync::Arc;

use log::warn;

use crate::dispatch::DispatchTable;
use crate::document::{self, Document};
use crate::error::{RecordError, ValidationError};
use crate::lookup::AuthorityLookup;
use crate::markup::MarkupReader;
use crate::segment::Block;

/// Turns blocks into documents. Cheap to clone and shared by all workers.
#[derive(Clone)]
pub struct RecordTransformer {
    table: Arc<DispatchTable>,
    lookup: Option<Arc<dyn AuthorityLookup>>,
    keep_full_record: bool,
}

impl RecordTransformer {
    pub fn new(table: Arc<DispatchTable>) -> Self {
        Self {
            table,
            lookup: None,
            keep_full_record: true,
        }
    }

    /// Resolve referrals to other records through `lookup`.
    pub fn with_lookup(mut self, lookup: Arc<dyn AuthorityLookup>) -> Self {
        self.lookup = Some(lookup);
        self
    }

    /// Whether the raw markup is stored in the `fullrecord` field.
    pub fn keep_full_record(mut self, keep: bool) -> Self {
        self.keep_full_record = keep;
        self
    }

    pub fn transform(&self, block: &Block) -> Result<Document, RecordError> {
        let markup = block.text();
        let mut doc = Document::new();
        for field in MarkupReader::new(&markup) {
            let field = field.map_err(|source| RecordError::Structural {
                line: block.first_line(),
                source,
            })?;
            if let Err(e) = self.table.apply(&field, &mut doc, self.lookup.as_deref()) {
                warn!(
                    "{}: skipping field {}: {e}",
                    doc.primary_id().unwrap_or("<no id>"),
                    field.tag()
                );
            }
        }
        // stored last so dispatch does not copy it around
        if self.keep_full_record {
            doc.store_unique(document::FULLRECORD, &markup);
        }

        Ok(finalize(doc)?)
    }
}

/// Check the mandatory fields of a finished document.
pub fn finalize(doc: Document) -> Result<Document, ValidationError> {
    let Some(id) = doc.primary_id() else {
        return Err(ValidationError::MissingIdentifier);
    };
    if doc.preferred().is_none() {
        return Err(ValidationError::MissingPreferredLabel { id: id.to_string() });
    }
    Ok(doc)
}
