use assert_matches::assert_matches;
use serde_json::{Value, json};

use pcawg_tracker::error::TrackerError;
use pcawg_tracker::normalize::{RawRecord, default_retain, normalize_record, normalize_records};

fn raw(fields: Vec<(&str, Value)>) -> RawRecord {
    fields.into_iter().collect()
}

#[test]
fn no_qualifiers_or_singletons_survive() {
    let records = vec![
        raw(vec![
            ("file.id", json!("syn1")),
            ("file.name", json!(["x.vcf.gz"])),
            ("file.sample_id", json!(["a", "b"])),
            ("entity.center", json!(["ucsc"])),
            ("file.eTag", json!("e")),
        ]),
        raw(vec![
            ("project.id", json!("syn2")),
            ("data.call_type", json!(["somatic"])),
        ]),
    ];
    let normalized = normalize_records(&records, &default_retain()).unwrap();
    for record in &normalized {
        for key in record.keys() {
            assert!(!key.starts_with("file.") && !key.starts_with("entity."));
        }
        for value in record.fields().values() {
            assert!(!matches!(value, Value::Array(items) if items.len() == 1));
        }
    }
    assert_eq!(normalized[0].get_str("name").as_deref(), Some("x.vcf.gz"));
    assert_eq!(normalized[0].get("sample_id"), Some(&json!(["a", "b"])));
    assert!(!normalized[0].contains("eTag"));
    assert_eq!(normalized[1].get_str("call_type").as_deref(), Some("somatic"));
}

#[test]
fn retain_set_keeps_bookkeeping_fields() {
    let record = raw(vec![("file.id", json!("syn1")), ("file.eTag", json!("e"))]);
    let retain = ["id", "eTag"].into_iter().map(str::to_string).collect();
    let normalized = normalize_record(&record, &retain).unwrap();
    assert_eq!(normalized.get_str("eTag").as_deref(), Some("e"));
}

#[test]
fn unqualified_field_is_fatal() {
    let record = raw(vec![("file.id", json!("syn1")), ("name", json!("x"))]);
    assert_matches!(
        normalize_record(&record, &default_retain()),
        Err(TrackerError::MalformedField(field)) if field == "name"
    );
}

#[test]
fn raw_record_deserializes_from_query_row() {
    let record: RawRecord =
        serde_json::from_str(r#"{ "file.id": "syn7", "file.versionNumber": [3] }"#).unwrap();
    let normalized = normalize_record(&record, &default_retain()).unwrap();
    assert_eq!(normalized.get_str("id").as_deref(), Some("syn7"));
}
