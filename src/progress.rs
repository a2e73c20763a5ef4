use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::domain::VariantType;
use crate::error::TrackerError;
use crate::reconcile::CanonicalAnnotation;
use crate::synapse::MetadataStore;

/// Column order of the progress table.
pub const COLUMNS: [&str; 5] = ["sample_id", "synapse_id", "variant_type", "source", "workflow"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRow {
    pub sample_id: Option<String>,
    pub synapse_id: String,
    pub variant_type: VariantType,
    pub source: String,
    pub workflow: String,
}

impl ProgressRow {
    pub fn from_annotation(annotation: &CanonicalAnnotation) -> Self {
        Self {
            sample_id: annotation.analysis_id.clone(),
            synapse_id: annotation.file_id.clone(),
            variant_type: annotation.variant_type,
            source: annotation.source.clone(),
            workflow: annotation.workflow_name.clone(),
        }
    }

    /// Inverse of [`ProgressRow::values`] for a row keyed by column name.
    pub fn from_cells(cells: &BTreeMap<String, String>) -> Result<Self, TrackerError> {
        let cell = |name: &str| cells.get(name).cloned().unwrap_or_default();
        let sample_id = cell("sample_id");
        Ok(Self {
            sample_id: (!sample_id.is_empty()).then_some(sample_id),
            synapse_id: cell("synapse_id"),
            variant_type: cell("variant_type").parse()?,
            source: cell("source"),
            workflow: cell("workflow"),
        })
    }

    /// Cell values in [`COLUMNS`] order; a missing sample id is an empty cell.
    pub fn values(&self) -> [String; 5] {
        [
            self.sample_id.clone().unwrap_or_default(),
            self.synapse_id.clone(),
            self.variant_type.to_string(),
            self.source.clone(),
            self.workflow.clone(),
        ]
    }
}

/// VCF annotations with the requested call type, projected onto table rows.
pub fn progress_rows(
    annotations: &[CanonicalAnnotation],
    call_type: Option<&str>,
) -> Vec<ProgressRow> {
    annotations
        .iter()
        .filter(|annotation| annotation.file_type.as_deref() == Some("vcf"))
        .filter(|annotation| match call_type {
            Some(wanted) => annotation
                .call_type
                .as_deref()
                .is_some_and(|value| value.eq_ignore_ascii_case(wanted)),
            None => true,
        })
        .map(ProgressRow::from_annotation)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VariantCount {
    pub source: String,
    pub variant_type: VariantType,
    pub count: usize,
}

pub fn count_by_source(rows: &[ProgressRow]) -> Vec<VariantCount> {
    let mut counts = BTreeMap::<(String, VariantType), usize>::new();
    for row in rows {
        *counts
            .entry((row.source.clone(), row.variant_type))
            .or_default() += 1;
    }
    counts
        .into_iter()
        .map(|((source, variant_type), count)| VariantCount {
            source,
            variant_type,
            count,
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishOutcome {
    pub table_id: String,
    pub replaced: bool,
    pub cleared: usize,
    pub added: usize,
}

/// Appends rows whose `synapse_id` is not yet in the table, or rewrites the table when
/// `replace` is set. A rewrite whose append fails puts the previous rows back.
pub fn publish<S: MetadataStore + ?Sized>(
    store: &S,
    table_id: &str,
    rows: &[ProgressRow],
    replace: bool,
) -> Result<PublishOutcome, TrackerError> {
    let (previous, cleared, pending) = if replace {
        let previous = store.table_rows(table_id)?;
        let cleared = store.clear_table(table_id)?;
        (previous, cleared, rows.to_vec())
    } else {
        let existing = store.table_file_ids(table_id)?.into_iter().collect::<HashSet<_>>();
        let pending = rows
            .iter()
            .filter(|row| !existing.contains(&row.synapse_id))
            .cloned()
            .collect::<Vec<_>>();
        (Vec::new(), 0, pending)
    };

    if pending.is_empty() {
        tracing::info!(table = table_id, "no new rows for progress table");
        return Ok(PublishOutcome {
            table_id: table_id.to_string(),
            replaced: replace,
            cleared,
            added: 0,
        });
    }

    let added = match store.append_rows(table_id, &pending) {
        Ok(added) => added,
        Err(err) if replace => return Err(restore(store, table_id, &previous, err)),
        Err(err) => return Err(err),
    };
    tracing::info!(table = table_id, added, "added rows to progress table");
    Ok(PublishOutcome {
        table_id: table_id.to_string(),
        replaced: replace,
        cleared,
        added,
    })
}

fn restore<S: MetadataStore + ?Sized>(
    store: &S,
    table_id: &str,
    previous: &[ProgressRow],
    cause: TrackerError,
) -> TrackerError {
    tracing::warn!(
        table = table_id,
        rows = previous.len(),
        error = %cause,
        "append failed after clearing table, restoring previous rows"
    );
    if previous.is_empty() {
        return cause;
    }
    match store.append_rows(table_id, previous) {
        Ok(_) => cause,
        Err(err) => TrackerError::TableCleared {
            table_id: table_id.to_string(),
            rows: previous.len(),
            message: err.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn annotation(
        file_id: &str,
        call_type: Option<&str>,
        file_type: Option<&str>,
    ) -> CanonicalAnnotation {
        CanonicalAnnotation {
            donor_id: None,
            analysis_id: Some("a1".to_string()),
            workflow_name: "wf".to_string(),
            call_type: call_type.map(str::to_string),
            variant_type: VariantType::Indel,
            data_type: None,
            file_type: file_type.map(str::to_string),
            source: "BSC".to_string(),
            file_id: file_id.to_string(),
            file_name: format!("{file_id}.vcf.gz"),
        }
    }

    #[test]
    fn rows_keep_somatic_vcf_only() {
        let annotations = vec![
            annotation("syn1", Some("Somatic"), Some("vcf")),
            annotation("syn2", Some("germline"), Some("vcf")),
            annotation("syn3", Some("somatic"), Some("bam")),
            annotation("syn4", None, Some("vcf")),
        ];
        let rows = progress_rows(&annotations, Some("somatic"));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].synapse_id, "syn1");
        assert_eq!(progress_rows(&annotations, None).len(), 3);
    }

    #[test]
    fn values_follow_column_order() {
        let row = ProgressRow::from_annotation(&annotation("syn9", None, None));
        assert_eq!(row.values(), ["a1", "syn9", "indel", "BSC", "wf"].map(str::to_string));
    }
}
