use std::path::PathBuf;

use serde_json::json;
use singer_tap::{
    process_reader, IngestConfig, IngestLimits, MessageType, ProcessorOptions, ProcessorState,
    StreamProcessor,
};

fn fixtures_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn read_fixture(name: &str) -> String {
    std::fs::read_to_string(fixtures_root().join(name)).expect("read fixture")
}

#[test]
fn end_to_end_counts_records_and_state() {
    let stdout = read_fixture("end_to_end.stdout.jsonl");
    let output = process_reader(
        stdout.as_bytes(),
        ProcessorOptions::default(),
        IngestConfig::default(),
    )
    .unwrap();

    assert_eq!(output.count(MessageType::Schema), 1);
    assert_eq!(output.count(MessageType::Record), 2);
    assert_eq!(output.count(MessageType::State), 1);
    assert_eq!(output.count(MessageType::ActivateVersion), 0);
    assert_eq!(output.counts.len(), 3);
    assert_eq!(output.streams["a"], vec![json!({"id": 1}), json!({"id": 2})]);
    assert_eq!(
        serde_json::Value::Object(output.state),
        json!({"bookmarks": {"a": {"id": 2}}})
    );
    assert_eq!(output.key_properties["a"], vec!["id".to_string()]);
    assert_eq!(output.skipped_lines, 0);
    assert!(output.record_files.is_empty());
}

#[test]
fn malformed_line_is_skipped_and_run_completes() {
    let stdout = read_fixture("malformed_between_records.stdout.jsonl");
    let mut processor = StreamProcessor::default();
    for (index, line) in stdout.lines().enumerate() {
        processor.process_line(index + 1, line).unwrap();
    }
    assert_eq!(processor.state(), ProcessorState::Running);
    assert_eq!(processor.skipped_lines(), 1);
    assert_eq!(processor.buffered_records("a"), 2);

    let output = processor.finish().unwrap();
    assert_eq!(output.streams["a"], vec![json!({"id": 1}), json!({"id": 2})]);
    assert_eq!(output.skipped_lines, 1);
    assert_eq!(output.skipped.len(), 1);
    assert_eq!(output.skipped[0].line_number, 3);
}

#[test]
fn ingested_failures_keep_their_line_numbers() {
    let stdout = concat!(
        "{\"type\":\"RECORD\",\"stream\":\"a\",\"record\":{\"id\":1}}\n",
        "\n",
        "{\"type\":\"RECORD\",\"stream\":\"a\",\"record\":{\"blob\":\"xxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxx\"}}\n",
        "{\"type\":\"BATCH\",\"stream\":\"a\"}\n",
        "{\"type\":\"RECORD\",\"stream\":\"a\",\"record\":{\"id\":2}}\r\n",
    );
    let config = IngestConfig::with_limits(IngestLimits::new(80));
    let output = process_reader(stdout.as_bytes(), ProcessorOptions::default(), config).unwrap();

    assert_eq!(output.count(MessageType::Record), 2);
    assert_eq!(output.skipped_lines, 2);
    let skipped: Vec<usize> = output.skipped.iter().map(|s| s.line_number).collect();
    assert_eq!(skipped, vec![3, 4]);
    assert!(output.skipped[0].reason.contains("line too long"));
}

#[test]
fn counts_sum_to_well_formed_lines() {
    let lines = [
        r#"{"type":"SCHEMA","stream":"a","schema":{}}"#,
        r#"{"type":"SCHEMA","stream":"b","schema":{}}"#,
        r#"{"type":"RECORD","stream":"a","record":{"n":1}}"#,
        r#"{"type":"RECORD","stream":"b","record":{"n":2}}"#,
        r#"{"type":"RECORD","stream":"b","record":{"n":3}}"#,
        r#"{"type":"STATE","value":{"a":1}}"#,
        r#"{"type":"ACTIVATE_VERSION","stream":"b","version":2}"#,
        r#"{"type":"STATE","value":{"b":2}}"#,
    ];
    let mut processor = StreamProcessor::default();
    for (index, line) in lines.iter().enumerate() {
        processor.process_line(index + 1, line).unwrap();
    }
    let output = processor.finish().unwrap();

    assert_eq!(output.total_messages(), lines.len() as u64);
    assert_eq!(output.counts.len(), 4);
    assert_eq!(output.streams["b"].len(), 2);
    assert_eq!(
        serde_json::Value::Object(output.state),
        json!({"a": 1, "b": 2})
    );
}

#[test]
fn each_run_starts_from_a_fresh_processor() {
    let mut processor = StreamProcessor::default();
    processor
        .process_line(1, r#"{"type":"STATE","value":{}}"#)
        .unwrap();
    let first = processor.finish().unwrap();

    let second = StreamProcessor::default().finish().unwrap();
    assert_eq!(first.count(MessageType::State), 1);
    assert_eq!(second.total_messages(), 0);
}
