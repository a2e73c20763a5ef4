use std::io::Write;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use flate2::Compression;
use flate2::write::GzEncoder;

use pcawg_tracker::domain::IdSpace;
use pcawg_tracker::error::TrackerError;
use pcawg_tracker::sample_index::{DONOR_ID, NORMAL_ANALYSIS_ID, SampleIndex};

const TSV: &str = "Donor ID\tTumour Analysis ID\tNormal Analysis ID\n\
                   DO1\tTA1\tNA1\n\
                   DO2\tTA2\tNA2\n";

fn temp_path(dir: &tempfile::TempDir, name: &str) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(dir.path().join(name)).unwrap()
}

#[test]
fn reads_tab_separated_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_path(&dir, "index.tsv");
    std::fs::write(&path, TSV).unwrap();

    let index = SampleIndex::from_path(&path).unwrap();
    assert_eq!(index.len(), 2);
    index.require_id_columns().unwrap();
    let row = index.lookup(IdSpace::NormalAnalysis, "na2").unwrap();
    assert_eq!(row.donor_id(), Some("DO2"));
    assert_eq!(row.get(DONOR_ID), Some("DO2"));
}

#[test]
fn reads_gzipped_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_path(&dir, "index.tsv.gz");
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(TSV.as_bytes()).unwrap();
    std::fs::write(&path, encoder.finish().unwrap()).unwrap();

    let index = SampleIndex::from_path(&path).unwrap();
    assert_eq!(
        index.lookup(IdSpace::TumourAnalysis, "TA1").unwrap().normal_analysis_id(),
        Some("NA1")
    );
    assert_eq!(index.columns_containing("NA1"), vec![NORMAL_ANALYSIS_ID]);
}

#[test]
fn missing_identifier_column_is_reported() {
    let index = SampleIndex::from_reader("Donor ID,Tumour Analysis ID\nd1,t1\n".as_bytes(), b',')
        .unwrap();
    assert_matches!(
        index.require_id_columns(),
        Err(TrackerError::SampleIndex(message)) if message.contains("Normal Analysis ID")
    );
}

#[test]
fn missing_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_path(&dir, "absent.csv");
    assert_matches!(
        SampleIndex::from_path(&path),
        Err(TrackerError::SampleIndex(_))
    );
}

#[test]
fn table_rows_build_an_index() {
    let rows = vec![
        [
            ("Donor ID".to_string(), "d1".to_string()),
            ("Tumour Analysis ID".to_string(), "t1".to_string()),
        ]
        .into_iter()
        .collect(),
    ];
    let index = SampleIndex::from_rows(None, rows);
    assert_eq!(index.columns(), ["Donor ID", "Tumour Analysis ID"]);
    assert!(index.lookup(IdSpace::Donor, "d1").is_some());
}
