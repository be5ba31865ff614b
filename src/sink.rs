//! Destinations for finished documents.

use std::io::{BufWriter, Write};

use log::debug;

use crate::document::Document;
use crate::error::SinkError;

/// Receives documents in source order.
///
/// `add` is called once per document; `commit` once after the source is
/// exhausted. A failed `add` costs one document, a failed `commit` fails
/// the run.
pub trait DocumentSink {
    fn add(&mut self, doc: Document) -> Result<(), SinkError>;

    fn commit(&mut self) -> Result<(), SinkError>;
}

impl<S: DocumentSink + ?Sized> DocumentSink for &mut S {
    fn add(&mut self, doc: Document) -> Result<(), SinkError> {
        (**self).add(doc)
    }

    fn commit(&mut self) -> Result<(), SinkError> {
        (**self).commit()
    }
}

/// Writes one JSON object per line.
pub struct JsonLinesSink<W: Write> {
    writer: BufWriter<W>,
    written: usize,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
            written: 0,
        }
    }

    pub fn written(&self) -> usize {
        self.written
    }

    /// Flush and return the underlying writer.
    pub fn into_inner(self) -> Result<W, SinkError> {
        self.writer
            .into_inner()
            .map_err(|e| SinkError::Io(e.into_error()))
    }
}

impl<W: Write> DocumentSink for JsonLinesSink<W> {
    fn add(&mut self, doc: Document) -> Result<(), SinkError> {
        serde_json::to_writer(&mut self.writer, &doc)?;
        self.writer.write_all(b"\n")?;
        self.written += 1;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), SinkError> {
        self.writer.flush()?;
        debug!("committed {} documents", self.written);
        Ok(())
    }
}

/// Collects documents in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub documents: Vec<Document>,
    pub commits: usize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DocumentSink for MemorySink {
    fn add(&mut self, doc: Document) -> Result<(), SinkError> {
        self.documents.push(doc);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), SinkError> {
        self.commits += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{ID, PREFERRED};

    fn doc(id: &str) -> Document {
        let mut doc = Document::new();
        doc.store_unique(ID, id);
        doc.store_unique(PREFERRED, "label");
        doc
    }

    #[test]
    fn test_json_lines_sink() {
        let mut sink = JsonLinesSink::new(Vec::new());
        sink.add(doc("a")).unwrap();
        sink.add(doc("b")).unwrap();
        sink.commit().unwrap();
        assert_eq!(sink.written(), 2);
        let out = String::from_utf8(sink.into_inner().unwrap()).unwrap();
        assert_eq!(
            out,
            "{\"id\":\"a\",\"preferred\":\"label\"}\n{\"id\":\"b\",\"preferred\":\"label\"}\n"
        );
    }

    #[test]
    fn test_memory_sink_through_reference() {
        fn feed<S: DocumentSink>(mut sink: S) {
            sink.add(doc("a")).unwrap();
            sink.commit().unwrap();
        }
        let mut sink = MemorySink::new();
        feed(&mut sink);
        assert_eq!(sink.documents.len(), 1);
        assert_eq!(sink.commits, 1);
    }
}
