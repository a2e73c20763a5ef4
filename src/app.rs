use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::chart::{self, ChartBar};
use crate::config::{FieldOverrides, OrganizationRule, ResolvedConfig};
use crate::domain::IdSpace;
use crate::error::TrackerError;
use crate::fs_util;
use crate::normalize::{NormalizedRecord, normalize_records};
use crate::progress::{self, PublishOutcome, VariantCount};
use crate::reconcile::{self, BatchOutcome, Notice, ReconcileOptions, Reconciler, SurveyEntry};
use crate::sample_index::SampleIndex;
use crate::synapse::MetadataStore;

#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    pub replace_table: bool,
    pub force_update: bool,
    pub dry_run: bool,
    pub chart_path: Option<Utf8PathBuf>,
    pub strict_sample_index: bool,
    pub sample_index_path: Option<Utf8PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct AnnotateOptions {
    pub dry_run: bool,
    pub strict_sample_index: bool,
    pub sample_index_path: Option<Utf8PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrganizationStats {
    pub organization: String,
    pub records: usize,
    pub annotations: usize,
    pub skipped: usize,
    pub duplicates: usize,
    pub unmapped: usize,
}

impl From<&BatchOutcome> for OrganizationStats {
    fn from(outcome: &BatchOutcome) -> Self {
        Self {
            organization: outcome.organization.clone(),
            records: outcome.records,
            annotations: outcome.annotations.len(),
            skipped: outcome.skipped.len(),
            duplicates: outcome.duplicates,
            unmapped: outcome.unmapped(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateReport {
    pub generated_at: DateTime<Utc>,
    pub dry_run: bool,
    pub organizations: Vec<OrganizationStats>,
    pub rows: usize,
    pub counts: Vec<VariantCount>,
    pub publish: Option<PublishOutcome>,
    pub bars: Vec<ChartBar>,
    pub chart_path: Option<String>,
    pub skipped: usize,
    pub notices: Vec<Notice>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnnotateItem {
    pub organization: String,
    pub file_id: String,
    pub file_name: String,
    pub changed: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnnotateReport {
    pub generated_at: DateTime<Utc>,
    pub dry_run: bool,
    pub organizations: Vec<OrganizationStats>,
    pub items: Vec<AnnotateItem>,
    pub updated: usize,
    pub notices: Vec<Notice>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SurveyReport {
    pub generated_at: DateTime<Utc>,
    pub entries: Vec<SurveyEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RulesReport {
    pub schema_version: u32,
    pub sample_index_table: Option<String>,
    pub progress_table: Option<String>,
    pub progress_call_type: Option<String>,
    pub retain_fields: Vec<String>,
    pub strict_sample_index: bool,
    pub organizations: Vec<RuleSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RuleSummary {
    pub name: String,
    pub container_id: String,
    pub workflow_name: Option<String>,
    pub filename_prefix: Option<String>,
    pub strict: bool,
    pub id_space: IdSpace,
    pub patterns: Vec<String>,
    #[serde(skip_serializing_if = "FieldOverrides::is_empty")]
    pub overrides: FieldOverrides,
}

impl From<&OrganizationRule> for RuleSummary {
    fn from(rule: &OrganizationRule) -> Self {
        Self {
            name: rule.organization.name.clone(),
            container_id: rule.organization.container_id.clone(),
            workflow_name: rule.organization.workflow_name.clone(),
            filename_prefix: rule.organization.filename_prefix.clone(),
            strict: rule.strict,
            id_space: rule.id_space,
            patterns: rule
                .patterns
                .iter()
                .map(|pattern| match pattern.variant_type {
                    Some(variant) => format!("{} => {variant}", pattern.regex.as_str()),
                    None => pattern.regex.as_str().to_string(),
                })
                .collect(),
            overrides: rule.overrides.clone(),
        }
    }
}

pub fn describe_rules(config: &ResolvedConfig) -> RulesReport {
    RulesReport {
        schema_version: config.schema_version,
        sample_index_table: config.sample_index_table.clone(),
        progress_table: config.progress_table.clone(),
        progress_call_type: config.progress_call_type.clone(),
        retain_fields: config.retain.iter().cloned().collect(),
        strict_sample_index: config.strict_sample_index,
        organizations: config.organizations.iter().map(RuleSummary::from).collect(),
    }
}

#[derive(Debug, Clone, Copy)]
pub enum ProgressSinkKind {
    Update,
    Annotate,
    Survey,
}

impl ProgressSinkKind {
    pub fn title(self) -> &'static str {
        match self {
            ProgressSinkKind::Update => "update",
            ProgressSinkKind::Annotate => "annotate",
            ProgressSinkKind::Survey => "survey",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);

    /// Checked before every remote write; a cancelled run stops there.
    fn cancelled(&self) -> bool {
        false
    }
}

fn emit(sink: &dyn ProgressSink, message: String) {
    sink.event(ProgressEvent {
        message,
        elapsed: None,
    });
}

pub struct App<S: MetadataStore> {
    store: S,
    config: ResolvedConfig,
}

impl<S: MetadataStore> App<S> {
    pub fn new(store: S, config: ResolvedConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Reconciles every organization, then publishes the progress table and chart.
    /// Nothing is written unless every batch reconciles.
    pub fn update(
        &self,
        options: UpdateOptions,
        sink: &dyn ProgressSink,
    ) -> Result<UpdateReport, TrackerError> {
        let start = Instant::now();
        let index = self.load_index(options.sample_index_path.as_ref(), sink)?;
        let outcomes = self.reconcile_all(
            &self.config.organizations,
            &index,
            options.strict_sample_index,
            sink,
        )?;

        let annotations = reconcile::aggregate(&outcomes);
        let rows = progress::progress_rows(&annotations, self.config.progress_call_type.as_deref());
        let counts = progress::count_by_source(&rows);
        emit(
            sink,
            format!(
                "phase=Publish; {} rows from {} annotations",
                rows.len(),
                annotations.len()
            ),
        );

        let publish = match (&self.config.progress_table, options.dry_run) {
            (Some(_), false) if sink.cancelled() => {
                return Err(TrackerError::Cancelled("publishing".to_string()));
            }
            (Some(table_id), false) => Some(progress::publish(
                &self.store,
                table_id,
                &rows,
                options.replace_table,
            )?),
            (Some(table_id), true) => {
                tracing::info!(table = %table_id, rows = rows.len(), "dry run, not publishing");
                None
            }
            (None, _) => {
                tracing::warn!("no progress table configured, not publishing");
                None
            }
        };

        let sources = self
            .config
            .organizations
            .iter()
            .map(OrganizationRule::name)
            .collect::<Vec<_>>();
        let bars = chart::build_bars(&rows, &sources);
        let added = publish.as_ref().map(|outcome| outcome.added).unwrap_or(0);
        let chart_path = match &options.chart_path {
            Some(path) if added > 0 || options.force_update => {
                emit(sink, format!("phase=Chart; rendering {} bars", bars.len()));
                fs_util::write_atomic(path, chart::render_svg(&bars).as_bytes())?;
                tracing::info!(path = %path, "wrote chart");
                Some(path.to_string())
            }
            _ => None,
        };

        let organizations = outcomes.iter().map(OrganizationStats::from).collect();
        let skipped = outcomes.iter().map(|outcome| outcome.skipped.len()).sum();
        let notices = outcomes
            .into_iter()
            .flat_map(|outcome| outcome.notices)
            .collect();
        sink.event(ProgressEvent {
            message: "phase=Done; update finished".to_string(),
            elapsed: Some(start.elapsed()),
        });

        Ok(UpdateReport {
            generated_at: Utc::now(),
            dry_run: options.dry_run,
            organizations,
            rows: rows.len(),
            counts,
            publish,
            bars,
            chart_path,
            skipped,
            notices,
        })
    }

    /// Writes reconciled values back onto each file's annotations. Only entities whose
    /// values change are updated.
    pub fn annotate(
        &self,
        organizations: &[String],
        options: AnnotateOptions,
        sink: &dyn ProgressSink,
    ) -> Result<AnnotateReport, TrackerError> {
        let start = Instant::now();
        let rules = organizations
            .iter()
            .map(|name| self.config.organization(name).cloned())
            .collect::<Result<Vec<_>, _>>()?;
        let index = self.load_index(options.sample_index_path.as_ref(), sink)?;
        let outcomes = self.reconcile_all(&rules, &index, options.strict_sample_index, sink)?;

        let mut items = Vec::new();
        for (rule, outcome) in rules.iter().zip(&outcomes) {
            emit(
                sink,
                format!(
                    "phase=Annotate; {}: {} files",
                    rule.name(),
                    outcome.annotations.len()
                ),
            );
            for annotation in &outcome.annotations {
                let updates = annotation.to_annotations(&rule.overrides);
                let mut current = self.store.get_annotations(&annotation.file_id)?;
                let changed = changed_keys(&current.values, &updates);
                if changed.is_empty() {
                    continue;
                }
                if !options.dry_run {
                    if sink.cancelled() {
                        return Err(TrackerError::Cancelled(format!(
                            "annotating {}",
                            annotation.file_id
                        )));
                    }
                    current.merge(&updates);
                    self.store.set_annotations(&current)?;
                    tracing::debug!(
                        file_id = %annotation.file_id,
                        changed = changed.len(),
                        "updated annotations"
                    );
                }
                items.push(AnnotateItem {
                    organization: rule.name().to_string(),
                    file_id: annotation.file_id.clone(),
                    file_name: annotation.file_name.clone(),
                    changed,
                });
            }
        }

        sink.event(ProgressEvent {
            message: "phase=Done; annotate finished".to_string(),
            elapsed: Some(start.elapsed()),
        });
        let updated = if options.dry_run { 0 } else { items.len() };
        Ok(AnnotateReport {
            generated_at: Utc::now(),
            dry_run: options.dry_run,
            organizations: outcomes.iter().map(OrganizationStats::from).collect(),
            items,
            updated,
            notices: outcomes
                .into_iter()
                .flat_map(|outcome| outcome.notices)
                .collect(),
        })
    }

    /// Reports which sample-index columns each organization's `sample_id` values come from.
    pub fn survey(
        &self,
        sample_index_path: Option<&Utf8PathBuf>,
        sink: &dyn ProgressSink,
    ) -> Result<SurveyReport, TrackerError> {
        let index = self.load_index(sample_index_path, sink)?;
        let mut batches: Vec<(&OrganizationRule, Vec<NormalizedRecord>)> = Vec::new();
        for rule in &self.config.organizations {
            batches.push((rule, self.fetch_records(rule, sink)?));
        }
        let entries = reconcile::survey(&index, &batches);
        emit(sink, format!("phase=Done; {} survey rows", entries.len()));
        Ok(SurveyReport {
            generated_at: Utc::now(),
            entries,
        })
    }

    fn load_index(
        &self,
        path: Option<&Utf8PathBuf>,
        sink: &dyn ProgressSink,
    ) -> Result<SampleIndex, TrackerError> {
        let index = match (path, &self.config.sample_index_table) {
            (Some(path), _) => {
                emit(sink, format!("phase=Index; reading {path}"));
                SampleIndex::from_path(path)?
            }
            (None, Some(table_id)) => {
                emit(sink, format!("phase=Index; querying {table_id}"));
                let result = self
                    .store
                    .query_table(table_id, &format!("select * from {table_id}"))?;
                let columns = result.columns.clone();
                SampleIndex::from_rows(Some(columns), result.into_maps())
            }
            (None, None) => {
                return Err(TrackerError::SampleIndex(
                    "no sample index table configured".to_string(),
                ));
            }
        };
        index.require_id_columns()?;
        tracing::info!(rows = index.len(), "loaded sample index");
        Ok(index)
    }

    fn fetch_records(
        &self,
        rule: &OrganizationRule,
        sink: &dyn ProgressSink,
    ) -> Result<Vec<NormalizedRecord>, TrackerError> {
        emit(
            sink,
            format!(
                "phase=Query; {} ({})",
                rule.name(),
                rule.organization.container_id
            ),
        );
        let started = Instant::now();
        let raw = self.store.query_container(&rule.organization.container_id)?;
        emit(
            sink,
            format!(
                "synapse.response latency_ms={} records={}",
                started.elapsed().as_millis(),
                raw.len()
            ),
        );
        normalize_records(&raw, &self.config.retain)
    }

    fn reconcile_all(
        &self,
        rules: &[OrganizationRule],
        index: &SampleIndex,
        strict_sample_index: bool,
        sink: &dyn ProgressSink,
    ) -> Result<Vec<BatchOutcome>, TrackerError> {
        let reconciler = Reconciler::new(
            index,
            ReconcileOptions {
                strict_sample_index: strict_sample_index || self.config.strict_sample_index,
            },
        );
        let mut outcomes = Vec::with_capacity(rules.len());
        for rule in rules {
            let records = self.fetch_records(rule, sink)?;
            emit(
                sink,
                format!("phase=Reconcile; {}: {} records", rule.name(), records.len()),
            );
            outcomes.push(reconciler.reconcile_batch(rule, &records)?);
        }
        Ok(outcomes)
    }
}

fn changed_keys(
    current: &BTreeMap<String, Vec<String>>,
    updates: &BTreeMap<String, String>,
) -> Vec<String> {
    updates
        .iter()
        .filter(|(key, value)| match current.get(key.as_str()) {
            Some(values) => values.len() != 1 || values[0] != **value,
            None => true,
        })
        .map(|(key, _)| key.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unchanged_values_are_not_reported() {
        let current = BTreeMap::from([
            ("center".to_string(), vec!["ucsc".to_string()]),
            ("donor_id".to_string(), vec!["a".to_string(), "b".to_string()]),
        ]);
        let updates = BTreeMap::from([
            ("center".to_string(), "ucsc".to_string()),
            ("donor_id".to_string(), "a".to_string()),
            ("fileType".to_string(), "vcf".to_string()),
        ]);
        assert_eq!(changed_keys(&current, &updates), vec!["donor_id", "fileType"]);
    }
}
