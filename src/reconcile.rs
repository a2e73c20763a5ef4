//! Per-organization reconciliation of file annotations into canonical records.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;
use serde_json::Value;

use crate::config::{FieldOverrides, OrganizationRule};
use crate::domain::{CanonicalId, IdSpace, VariantType};
use crate::error::TrackerError;
use crate::normalize::NormalizedRecord;
use crate::sample_index::{SampleIndex, column_for};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CanonicalAnnotation {
    pub donor_id: Option<String>,
    pub analysis_id: Option<String>,
    pub workflow_name: String,
    pub call_type: Option<String>,
    pub variant_type: VariantType,
    pub data_type: Option<String>,
    pub file_type: Option<String>,
    pub source: String,
    pub file_id: String,
    pub file_name: String,
}

impl CanonicalAnnotation {
    /// Renders the record in the platform's annotation vocabulary, with the organization's
    /// fixed values merged in.
    pub fn to_annotations(&self, overrides: &FieldOverrides) -> BTreeMap<String, String> {
        let mut out = overrides.set.clone();
        let mut put = |key: &str, value: Option<&str>| {
            if let Some(value) = value {
                out.insert(key.to_string(), value.to_string());
            }
        };
        put("donor_id", self.donor_id.as_deref());
        put("analysis_id_tumor", self.analysis_id.as_deref());
        put("workflow_name", Some(&self.workflow_name));
        put("call_type", self.call_type.as_deref());
        put("dataSubType", Some(self.variant_type.as_str()));
        put("variant_type", Some(self.variant_type.as_str()));
        put("dataType", self.data_type.as_deref());
        put("fileType", self.file_type.as_deref());
        out.entry("center".to_string())
            .or_insert_with(|| self.source.to_ascii_lowercase());
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NoticeKind {
    /// Neither the file name nor a `sample_id` annotation carried an identifier.
    MissingIdentifier,
    /// The identifier has no row in the sample index.
    UnmappedIdentifier { id: String, column: String },
    /// The file name matched none of the organization's patterns.
    Unrecognized,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub organization: String,
    pub file_id: String,
    pub file_name: String,
    #[serde(flatten)]
    pub kind: NoticeKind,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchOutcome {
    pub organization: String,
    pub records: usize,
    pub annotations: Vec<CanonicalAnnotation>,
    pub skipped: Vec<String>,
    pub duplicates: usize,
    pub notices: Vec<Notice>,
}

impl BatchOutcome {
    pub fn unmapped(&self) -> usize {
        self.notices
            .iter()
            .filter(|notice| matches!(notice.kind, NoticeKind::UnmappedIdentifier { .. }))
            .count()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReconcileOptions {
    /// Treat an identifier without a sample-index row as fatal.
    pub strict_sample_index: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilenameMatch {
    pub variant_type: VariantType,
    pub workflow: Option<String>,
    /// Identifier captured by the pattern's `id` group, lowercased when canonical.
    pub id: Option<String>,
}

pub struct Reconciler<'a> {
    index: &'a SampleIndex,
    options: ReconcileOptions,
}

impl<'a> Reconciler<'a> {
    pub fn new(index: &'a SampleIndex, options: ReconcileOptions) -> Self {
        Self { index, options }
    }

    /// Reconciles one organization's records. Any fatal error discards the whole batch.
    pub fn reconcile_batch(
        &self,
        rule: &OrganizationRule,
        records: &[NormalizedRecord],
    ) -> Result<BatchOutcome, TrackerError> {
        let names = records
            .iter()
            .filter_map(|record| record.get_str("name"))
            .collect::<HashSet<_>>();

        let mut outcome = BatchOutcome {
            organization: rule.name().to_string(),
            records: records.len(),
            ..BatchOutcome::default()
        };

        for record in records {
            let name = record.get_str("name").unwrap_or_default();
            if is_duplicate(&name, &names) {
                tracing::debug!(
                    organization = rule.name(),
                    name = %name,
                    "dropping uncompressed duplicate"
                );
                outcome.duplicates += 1;
                continue;
            }
            if let Some(annotation) = self.reconcile_record(rule, record, &mut outcome)? {
                outcome.annotations.push(annotation);
            }
        }

        tracing::info!(
            organization = rule.name(),
            records = outcome.records,
            annotations = outcome.annotations.len(),
            skipped = outcome.skipped.len(),
            duplicates = outcome.duplicates,
            "reconciled batch"
        );
        Ok(outcome)
    }

    fn reconcile_record(
        &self,
        rule: &OrganizationRule,
        record: &NormalizedRecord,
        outcome: &mut BatchOutcome,
    ) -> Result<Option<CanonicalAnnotation>, TrackerError> {
        let file_id = record.get_str("id").unwrap_or_default();
        let name = record.get_str("name").unwrap_or_default();
        let fixed = apply_overrides(record, &rule.overrides);

        let Some(matched) = match_filename(rule, &name, &fixed) else {
            if rule.strict {
                return Err(TrackerError::UnparsedFilename {
                    organization: rule.name().to_string(),
                    name,
                });
            }
            tracing::debug!(
                organization = rule.name(),
                name = %name,
                "skipping unrecognized file"
            );
            outcome.notices.push(Notice {
                organization: rule.name().to_string(),
                file_id,
                file_name: name.clone(),
                kind: NoticeKind::Unrecognized,
            });
            outcome.skipped.push(name);
            return Ok(None);
        };

        for annotated in record.get_strs("variant_type") {
            if VariantType::from_token(&annotated) != Some(matched.variant_type) {
                return Err(TrackerError::VariantTypeConflict {
                    file_id,
                    name,
                    annotated,
                    derived: matched.variant_type.to_string(),
                });
            }
        }

        let raw_id = matched
            .id
            .clone()
            .or_else(|| CanonicalId::extract(&name).map(|id| id.as_str().to_string()))
            .or_else(|| fixed.get_str("sample_id"));
        let (donor_id, analysis_id) = match raw_id {
            Some(raw_id) => {
                self.cross_reference(rule, &fixed, raw_id, &file_id, &name, outcome)?
            }
            None => {
                tracing::warn!(
                    organization = rule.name(),
                    name = %name,
                    "no identifier for file"
                );
                outcome.notices.push(Notice {
                    organization: rule.name().to_string(),
                    file_id: file_id.clone(),
                    file_name: name.clone(),
                    kind: NoticeKind::MissingIdentifier,
                });
                (None, None)
            }
        };

        let workflow_name = rule
            .organization
            .workflow_name
            .clone()
            .or(matched.workflow)
            .or_else(|| fixed.get_str("workflow_name"))
            .unwrap_or_else(|| rule.name().to_string());

        let file_type = fixed
            .get_str("fileType")
            .unwrap_or_else(|| "vcf".to_string());

        Ok(Some(CanonicalAnnotation {
            donor_id,
            analysis_id,
            workflow_name,
            call_type: fixed.get_str("call_type"),
            variant_type: matched.variant_type,
            data_type: fixed.get_str("dataType"),
            file_type: Some(file_type),
            source: rule.name().to_string(),
            file_id,
            file_name: name,
        }))
    }

    fn cross_reference(
        &self,
        rule: &OrganizationRule,
        record: &NormalizedRecord,
        raw_id: String,
        file_id: &str,
        name: &str,
        outcome: &mut BatchOutcome,
    ) -> Result<(Option<String>, Option<String>), TrackerError> {
        let row = self.index.lookup(rule.id_space, &raw_id);
        let mapped = row.is_some();
        let (donor_id, analysis_id) = match rule.id_space {
            IdSpace::Donor => (
                Some(raw_id.clone()),
                row.and_then(|row| row.tumour_analysis_id().map(str::to_string)),
            ),
            IdSpace::TumourAnalysis => (
                row.and_then(|row| row.donor_id().map(str::to_string)),
                Some(raw_id.clone()),
            ),
            // An existing donor annotation wins; the index fills gaps.
            IdSpace::NormalAnalysis => (
                record
                    .get_str("donor_id")
                    .or_else(|| row.and_then(|row| row.donor_id().map(str::to_string))),
                Some(raw_id.clone()),
            ),
        };

        if !mapped {
            if self.options.strict_sample_index {
                return Err(TrackerError::UnmappedIdentifier {
                    organization: rule.name().to_string(),
                    id: raw_id,
                });
            }
            tracing::warn!(
                organization = rule.name(),
                id = %raw_id,
                "no sample index entry for identifier"
            );
            outcome.notices.push(Notice {
                organization: rule.name().to_string(),
                file_id: file_id.to_string(),
                file_name: name.to_string(),
                kind: NoticeKind::UnmappedIdentifier {
                    id: raw_id,
                    column: column_for(rule.id_space).to_string(),
                },
            });
        }
        Ok((donor_id, analysis_id))
    }
}

/// `X.vcf` is a duplicate when `X.vcf.gz` is in the same batch.
pub fn is_duplicate(name: &str, names: &HashSet<String>) -> bool {
    name.ends_with(".vcf") && names.contains(&format!("{name}.gz"))
}

pub fn apply_overrides(record: &NormalizedRecord, overrides: &FieldOverrides) -> NormalizedRecord {
    let mut fixed = record.clone();
    if overrides.is_empty() {
        return fixed;
    }
    for (target, source) in &overrides.copy {
        match record.get(source) {
            Some(value) => fixed.set(target.clone(), value.clone()),
            None => fixed.set(target.clone(), Value::Null),
        }
    }
    for (field, value) in &overrides.set {
        fixed.set(field.clone(), value.clone());
    }
    for (field, value) in &overrides.defaults {
        if fixed.get_str(field).is_none() {
            fixed.set(field.clone(), value.clone());
        }
    }
    fixed
}

/// First pattern, in rule order, that matches `name` and yields a variant type.
pub fn match_filename(
    rule: &OrganizationRule,
    name: &str,
    record: &NormalizedRecord,
) -> Option<FilenameMatch> {
    rule.patterns.iter().find_map(|pattern| {
        let caps = pattern.regex.captures(name)?;
        let variant_type = caps
            .name("variant")
            .and_then(|m| VariantType::from_token(m.as_str()))
            .or(pattern.variant_type)
            .or_else(|| {
                record
                    .get_str("dataSubType")
                    .and_then(|token| VariantType::from_token(&token))
            })?;
        let id = caps
            .name("id")
            .map(|m| m.as_str())
            .filter(|id| !id.is_empty())
            .map(|id| {
                id.parse::<CanonicalId>()
                    .map(|canonical| canonical.to_string())
                    .unwrap_or_else(|_| id.to_string())
            });
        Some(FilenameMatch {
            variant_type,
            workflow: caps.name("workflow").map(|m| m.as_str().to_string()),
            id,
        })
    })
}

/// Concatenates batch results in organization order.
pub fn aggregate(outcomes: &[BatchOutcome]) -> Vec<CanonicalAnnotation> {
    outcomes
        .iter()
        .flat_map(|outcome| outcome.annotations.iter().cloned())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SurveyEntry {
    pub organization: String,
    pub columns: Vec<String>,
    pub count: usize,
}

/// Counts, per organization, which sample-index columns its `sample_id` values appear in.
pub fn survey(
    index: &SampleIndex,
    batches: &[(&OrganizationRule, Vec<NormalizedRecord>)],
) -> Vec<SurveyEntry> {
    let mut counts = BTreeMap::<(String, Vec<String>), usize>::new();
    for (rule, records) in batches {
        for record in records {
            let Some(sample_id) = record.get_str("sample_id") else {
                continue;
            };
            let columns = index.columns_containing(&sample_id);
            *counts.entry((rule.name().to_string(), columns)).or_default() += 1;
        }
    }
    counts
        .into_iter()
        .map(|((organization, columns), count)| SurveyEntry {
            organization,
            columns,
            count,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::config::FilenamePattern;
    use crate::domain::Organization;

    fn record(fields: &[(&str, &str)]) -> NormalizedRecord {
        fields.iter().map(|(k, v)| (*k, json!(v))).collect()
    }

    #[test]
    fn overrides_apply_copy_then_set_then_defaults() {
        let overrides = FieldOverrides {
            set: [("workflow_name".to_string(), "wustl".to_string())].into(),
            copy: [("dataSubType".to_string(), "dataType".to_string())].into(),
            defaults: [
                ("call_type".to_string(), "somatic".to_string()),
                ("dataType".to_string(), "DNA".to_string()),
            ]
            .into(),
        };
        let fixed = apply_overrides(
            &record(&[("dataType", "snv"), ("workflow_name", "other")]),
            &overrides,
        );
        assert_eq!(fixed.get_str("dataSubType").as_deref(), Some("snv"));
        assert_eq!(fixed.get_str("workflow_name").as_deref(), Some("wustl"));
        assert_eq!(fixed.get_str("call_type").as_deref(), Some("somatic"));
        assert_eq!(fixed.get_str("dataType").as_deref(), Some("snv"));
    }

    #[test]
    fn first_matching_pattern_wins() {
        let mut rule = OrganizationRule::new(Organization::new("X", "syn1")).unwrap();
        rule.patterns = vec![
            FilenamePattern::new(r"\.sv\.vcf\.gz$", Some(VariantType::Sv)).unwrap(),
            FilenamePattern::new(r"\.vcf\.gz$", Some(VariantType::Snv)).unwrap(),
        ];
        let empty = NormalizedRecord::default();
        let matched = match_filename(&rule, "a.sv.vcf.gz", &empty).unwrap();
        assert_eq!(matched.variant_type, VariantType::Sv);
        let matched = match_filename(&rule, "a.indel.vcf.gz", &empty).unwrap();
        assert_eq!(matched.variant_type, VariantType::Snv);
        assert!(match_filename(&rule, "a.bam", &empty).is_none());
    }

    #[test]
    fn annotation_supplies_variant_when_pattern_does_not() {
        let mut rule = OrganizationRule::new(Organization::new("EMBL", "syn1")).unwrap();
        rule.patterns = vec![FilenamePattern::new(r"\.vcf\.gz$", None).unwrap()];
        let with = record(&[("dataSubType", "SV")]);
        assert_eq!(
            match_filename(&rule, "x.vcf.gz", &with).unwrap().variant_type,
            VariantType::Sv
        );
        let without = record(&[("dataSubType", "cnv")]);
        assert!(match_filename(&rule, "x.vcf.gz", &without).is_none());
    }

    #[test]
    fn duplicate_requires_gz_sibling() {
        let names: HashSet<String> = ["a.vcf", "a.vcf.gz", "b.vcf"]
            .into_iter()
            .map(str::to_string)
            .collect();
        assert!(is_duplicate("a.vcf", &names));
        assert!(!is_duplicate("a.vcf.gz", &names));
        assert!(!is_duplicate("b.vcf", &names));
    }

    #[test]
    fn write_back_uses_platform_vocabulary() {
        let annotation = CanonicalAnnotation {
            donor_id: Some("d1".to_string()),
            analysis_id: None,
            workflow_name: "gatk_mutect".to_string(),
            call_type: Some("somatic".to_string()),
            variant_type: VariantType::Snv,
            data_type: None,
            file_type: Some("vcf".to_string()),
            source: "UCSC".to_string(),
            file_id: "syn1".to_string(),
            file_name: "x.vcf.gz".to_string(),
        };
        let overrides = FieldOverrides {
            set: [("disease".to_string(), "Cancer".to_string())].into(),
            ..FieldOverrides::default()
        };
        let out = annotation.to_annotations(&overrides);
        assert_eq!(out["donor_id"], "d1");
        assert_eq!(out["dataSubType"], "snv");
        assert_eq!(out["disease"], "Cancer");
        assert_eq!(out["center"], "ucsc");
        assert!(!out.contains_key("analysis_id_tumor"));
    }
}
