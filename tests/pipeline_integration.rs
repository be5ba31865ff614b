//! End-to-end ingestion tests
//!
//! These tests run complete collections through the pipeline and check the
//! documents that reach a JSON lines file.

use std::fs::{self, File};
use std::io::{BufReader, Cursor, Write};
use std::sync::Arc;

use gnd_ingest::document::{COORDINATES, LOOK4ME, RELATED, RELATED_IDS, SAME_AS};
use gnd_ingest::{
    DispatchTable, Document, InMemoryLookup, JsonLinesSink, MemorySink, Pipeline, PipelineConfig,
};
use serde_json::Value;
use tempfile::{NamedTempFile, TempDir};

const BERLIN: &str = r#"<record xmlns="http://www.loc.gov/MARC21/slim" type="Authority">
  <leader>00000nz  a2200000nc 4500</leader>
  <controlfield tag="001">040054970</controlfield>
  <datafield tag="024" ind1="7" ind2=" ">
    <subfield code="a">http://d-nb.info/gnd/4005728-8</subfield>
    <subfield code="2">uri</subfield>
  </datafield>
  <datafield tag="034" ind1=" " ind2=" ">
    <subfield code="d">E 013 24 00</subfield>
    <subfield code="e">E 013 24 00</subfield>
    <subfield code="f">N 052 30 00</subfield>
    <subfield code="g">N 052 30 00</subfield>
  </datafield>
  <datafield tag="035" ind1=" " ind2=" ">
    <subfield code="a">(DE-101)040054970</subfield>
  </datafield>
  <datafield tag="035" ind1=" " ind2=" ">
    <subfield code="a">(DE-588)4005728-8</subfield>
  </datafield>
  <datafield tag="151" ind1=" " ind2=" ">
    <subfield code="a">Berlin</subfield>
  </datafield>
  <datafield tag="451" ind1=" " ind2=" ">
    <subfield code="a">Berolinum</subfield>
  </datafield>
  <datafield tag="451" ind1=" " ind2=" ">
    <subfield code="a">Berlin (West)</subfield>
  </datafield>
  <datafield tag="551" ind1=" " ind2=" ">
    <subfield code="0">(DE-588)4011882-4</subfield>
    <subfield code="0">https://d-nb.info/gnd/4011882-4</subfield>
    <subfield code="a">Deutschland</subfield>
  </datafield>
</record>
"#;

const NAMELESS: &str = r#"<record xmlns="http://www.loc.gov/MARC21/slim" type="Authority">
  <datafield tag="035" ind1=" " ind2=" ">
    <subfield code="a">(DE-588)1-1</subfield>
  </datafield>
</record>
"#;

const REFERRAL: &str = r#"<record xmlns="http://www.loc.gov/MARC21/slim" type="Authority">
  <datafield tag="035" ind1=" " ind2=" ">
    <subfield code="a">(DE-588)4123456-7</subfield>
  </datafield>
  <datafield tag="150" ind1=" " ind2=" ">
    <subfield code="a">Stadtgeschichte</subfield>
  </datafield>
  <datafield tag="550" ind1=" " ind2=" ">
    <subfield code="0">(DE-588)4020517-4</subfield>
  </datafield>
</record>
"#;

fn collection(records: &[&str]) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<collection xmlns=\"http://www.loc.gov/MARC21/slim\">\n{}</collection>\n",
        records.concat()
    )
}

fn pipeline(config: PipelineConfig) -> Pipeline {
    Pipeline::new(config, DispatchTable::gnd().unwrap()).unwrap()
}

fn read_json_lines(path: &std::path::Path) -> Vec<Value> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[test]
fn test_place_record_to_json_lines() {
    let dir = TempDir::new().unwrap();
    let out_path = dir.path().join("gnd.jsonl");

    let mut sink = JsonLinesSink::new(File::create(&out_path).unwrap());
    let summary = pipeline(PipelineConfig::default())
        .run(Cursor::new(collection(&[BERLIN])), &mut sink)
        .unwrap();
    sink.into_inner().unwrap();
    assert_eq!(summary.emitted, 1);

    let docs = read_json_lines(&out_path);
    assert_eq!(docs.len(), 1);
    let doc = &docs[0];
    assert_eq!(doc["id"], "(DE-588)4005728-8");
    assert_eq!(doc["preferred"], "Berlin");
    assert_eq!(doc["sameAs"], serde_json::json!(["(DE-101)040054970"]));
    assert_eq!(doc["synonyms"], serde_json::json!(["Berolinum", "Berlin (West)"]));
    assert_eq!(doc["coordinates"], serde_json::json!(["52.5, 13.4"]));
    assert_eq!(doc["related"], serde_json::json!(["Deutschland"]));
    assert_eq!(doc["relatedIds"], serde_json::json!(["(DE-588)4011882-4"]));
    assert!(
        doc["fullrecord"]
            .as_str()
            .is_some_and(|markup| markup.contains("<subfield code=\"a\">Berlin</subfield>"))
    );
}

#[test]
fn test_record_without_label_is_skipped_between_valid_ones() {
    let mut sink = MemorySink::new();
    let summary = pipeline(PipelineConfig::default())
        .run(
            Cursor::new(collection(&[BERLIN, NAMELESS, REFERRAL])),
            &mut sink,
        )
        .unwrap();

    assert_eq!(summary.blocks, 3);
    assert_eq!(summary.emitted, 2);
    assert_eq!(summary.rejected, 1);
    let ids: Vec<_> = sink.documents.iter().filter_map(Document::primary_id).collect();
    assert_eq!(ids, vec!["(DE-588)4005728-8", "(DE-588)4123456-7"]);
}

#[test]
fn test_referral_resolved_through_lookup() {
    let mut lookup = InMemoryLookup::new();
    lookup.insert("(DE-588)4020517-4", "Geschichte");

    let mut sink = MemorySink::new();
    pipeline(PipelineConfig::default())
        .with_lookup(Arc::new(lookup))
        .run(Cursor::new(collection(&[REFERRAL])), &mut sink)
        .unwrap();

    let doc = &sink.documents[0];
    assert_eq!(doc.unique(LOOK4ME), Some("true"));
    assert_eq!(doc.multi(RELATED), &["Geschichte"]);
    assert_eq!(doc.multi(RELATED_IDS), &["(DE-588)4020517-4"]);
}

#[test]
fn test_referral_without_lookup_only_flags() {
    let mut sink = MemorySink::new();
    pipeline(PipelineConfig::default())
        .run(Cursor::new(collection(&[REFERRAL])), &mut sink)
        .unwrap();

    let doc = &sink.documents[0];
    assert_eq!(doc.unique(LOOK4ME), Some("true"));
    assert!(doc.multi(RELATED).is_empty());
}

#[test]
fn test_config_file_drives_the_run() {
    let mut config_file = NamedTempFile::new().unwrap();
    writeln!(
        config_file,
        r#"{{"pool_name": "it", "workers": 3, "admission_capacity": 1, "delivery_capacity": 2, "keep_full_record": false}}"#
    )
    .unwrap();
    let config = PipelineConfig::from_path(config_file.path()).unwrap();

    let records: Vec<String> = (0..50)
        .map(|i| BERLIN.replace("4005728-8", &format!("{i}-x")))
        .collect();
    let records: Vec<&str> = records.iter().map(String::as_str).collect();

    let mut input_file = NamedTempFile::new().unwrap();
    input_file
        .write_all(collection(&records).as_bytes())
        .unwrap();

    let mut sink = MemorySink::new();
    let summary = pipeline(config)
        .run(
            BufReader::new(File::open(input_file.path()).unwrap()),
            &mut sink,
        )
        .unwrap();

    assert_eq!(summary.emitted, 50);
    for (i, doc) in sink.documents.iter().enumerate() {
        assert_eq!(doc.primary_id(), Some(format!("(DE-588){i}-x").as_str()));
        assert!(!doc.contains("fullrecord"));
        assert_eq!(doc.multi(COORDINATES), &["52.5, 13.4"]);
        assert_eq!(doc.multi(SAME_AS), &["(DE-101)040054970"]);
    }
}

#[test]
fn test_earlier_output_feeds_lookup() {
    let mut first = JsonLinesSink::new(Vec::new());
    let geschichte = REFERRAL
        .replace("4123456-7", "4020517-4")
        .replace("Stadtgeschichte", "Geschichte")
        .replace(
            "<subfield code=\"0\">(DE-588)4020517-4</subfield>",
            "<subfield code=\"a\">Historie</subfield>",
        );
    pipeline(PipelineConfig::default())
        .run(Cursor::new(collection(&[&geschichte])), &mut first)
        .unwrap();
    let lookup = InMemoryLookup::from_json_lines(first.into_inner().unwrap().as_slice()).unwrap();
    assert_eq!(lookup.len(), 1);

    let mut sink = MemorySink::new();
    pipeline(PipelineConfig::default())
        .with_lookup(Arc::new(lookup))
        .run(Cursor::new(collection(&[REFERRAL])), &mut sink)
        .unwrap();
    assert_eq!(sink.documents[0].multi(RELATED), &["Geschichte"]);
}
