use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};

use camino::Utf8Path;
use flate2::read::GzDecoder;

use crate::domain::IdSpace;
use crate::error::TrackerError;

pub const DONOR_ID: &str = "Donor ID";
pub const TUMOUR_ANALYSIS_ID: &str = "Tumour Analysis ID";
pub const NORMAL_ANALYSIS_ID: &str = "Normal Analysis ID";

pub fn column_for(space: IdSpace) -> &'static str {
    match space {
        IdSpace::Donor => DONOR_ID,
        IdSpace::TumourAnalysis => TUMOUR_ANALYSIS_ID,
        IdSpace::NormalAnalysis => NORMAL_ANALYSIS_ID,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleRow(BTreeMap<String, String>);

impl SampleRow {
    pub fn get(&self, column: &str) -> Option<&str> {
        self.0
            .get(column)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    pub fn donor_id(&self) -> Option<&str> {
        self.get(DONOR_ID)
    }

    pub fn tumour_analysis_id(&self) -> Option<&str> {
        self.get(TUMOUR_ANALYSIS_ID)
    }

    pub fn normal_analysis_id(&self) -> Option<&str> {
        self.get(NORMAL_ANALYSIS_ID)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for SampleRow {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Cross reference between donor and analysis identifier schemes.
#[derive(Debug, Clone, Default)]
pub struct SampleIndex {
    columns: Vec<String>,
    rows: Vec<SampleRow>,
}

impl SampleIndex {
    pub fn new(columns: Vec<String>, rows: Vec<SampleRow>) -> Self {
        Self { columns, rows }
    }

    /// Builds an index from table rows, taking the column list from the first row
    /// unless one is given.
    pub fn from_rows(columns: Option<Vec<String>>, rows: Vec<BTreeMap<String, String>>) -> Self {
        let columns = columns.unwrap_or_else(|| {
            rows.first()
                .map(|row| row.keys().cloned().collect())
                .unwrap_or_default()
        });
        Self {
            columns,
            rows: rows.into_iter().map(SampleRow).collect(),
        }
    }

    /// Reads a comma or tab separated file, gzip-compressed when it ends in `.gz`.
    pub fn from_path(path: &Utf8Path) -> Result<Self, TrackerError> {
        let file = File::open(path.as_std_path())
            .map_err(|err| TrackerError::SampleIndex(format!("open {path}: {err}")))?;
        let plain = path.as_str().trim_end_matches(".gz");
        let delimiter = if plain.ends_with(".tsv") || plain.ends_with(".txt") {
            b'\t'
        } else {
            b','
        };
        let reader: Box<dyn Read> = if path.as_str().ends_with(".gz") {
            Box::new(GzDecoder::new(BufReader::new(file)))
        } else {
            Box::new(BufReader::new(file))
        };
        Self::from_reader(reader, delimiter)
    }

    pub fn from_reader<R: Read>(reader: R, delimiter: u8) -> Result<Self, TrackerError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .trim(csv::Trim::All)
            .from_reader(reader);
        let columns = csv_reader
            .headers()
            .map_err(|err| TrackerError::SampleIndex(err.to_string()))?
            .iter()
            .map(str::to_string)
            .collect::<Vec<_>>();

        let mut rows = Vec::new();
        for record in csv_reader.records() {
            let record = record.map_err(|err| TrackerError::SampleIndex(err.to_string()))?;
            rows.push(
                columns
                    .iter()
                    .cloned()
                    .zip(record.iter().map(str::to_string))
                    .collect(),
            );
        }
        Ok(Self { columns, rows })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Fails when one of the identifier columns the reconciler relies on is absent.
    pub fn require_id_columns(&self) -> Result<(), TrackerError> {
        for column in [DONOR_ID, TUMOUR_ANALYSIS_ID, NORMAL_ANALYSIS_ID] {
            if !self.columns.iter().any(|c| c == column) {
                return Err(TrackerError::SampleIndex(format!(
                    "missing column {column:?}"
                )));
            }
        }
        Ok(())
    }

    /// First row whose `space` column equals `id`, ignoring ASCII case.
    pub fn lookup(&self, space: IdSpace, id: &str) -> Option<&SampleRow> {
        let column = column_for(space);
        self.rows
            .iter()
            .find(|row| row.get(column).is_some_and(|value| value.eq_ignore_ascii_case(id)))
    }

    /// Columns in which `id` appears, in column order.
    pub fn columns_containing(&self, id: &str) -> Vec<String> {
        self.columns
            .iter()
            .filter(|column| {
                self.rows
                    .iter()
                    .any(|row| row.get(column).is_some_and(|value| value.eq_ignore_ascii_case(id)))
            })
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> SampleIndex {
        let data = "Donor ID,Tumour Analysis ID,Normal Analysis ID\n\
                    d1,t1,n1\n\
                    d2,t2,n2\n\
                    d1,t3,n1\n";
        SampleIndex::from_reader(data.as_bytes(), b',').unwrap()
    }

    #[test]
    fn lookup_takes_first_match() {
        let index = index();
        let row = index.lookup(IdSpace::Donor, "d1").unwrap();
        assert_eq!(row.tumour_analysis_id(), Some("t1"));
        assert_eq!(
            index.lookup(IdSpace::NormalAnalysis, "n2").unwrap().donor_id(),
            Some("d2")
        );
        assert!(index.lookup(IdSpace::TumourAnalysis, "d1").is_none());
    }

    #[test]
    fn columns_containing_lists_sources() {
        let index = index();
        assert_eq!(index.columns_containing("t2"), vec![TUMOUR_ANALYSIS_ID]);
        assert!(index.columns_containing("zzz").is_empty());
        index.require_id_columns().unwrap();
    }

    #[test]
    fn empty_cells_never_match() {
        let data = "Donor ID\tTumour Analysis ID\tNormal Analysis ID\nd1\t\tn1\n";
        let index = SampleIndex::from_reader(data.as_bytes(), b'\t').unwrap();
        assert!(index.lookup(IdSpace::TumourAnalysis, "").is_none());
    }
}
