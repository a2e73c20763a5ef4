use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::PathBuf;

use directories::ProjectDirs;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::{IdSpace, Organization, VariantType};
use crate::error::TrackerError;
use crate::normalize::default_retain;

pub const CONFIG_FILE: &str = "pcawg-tracker.json";

const DEFAULT_RULES: &str = include_str!("../rules/default.json");

/// File names of the form `<id>.<workflow>[.somatic].<snv_mnv|indel|sv>.vcf[.gz]`.
pub const DEFAULT_PATTERN: &str = r"^[A-Za-z0-9_\-]+\.(?P<workflow>[A-Za-z0-9_\-.]+?)(?:\.somatic)?\.(?P<variant>snv_mnv|indel|sv)\.vcf(?:\.gz)?$";

#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub sample_index_table: Option<String>,
    #[serde(default)]
    pub progress_table: Option<ProgressTableEntry>,
    #[serde(default)]
    pub retain_fields: Option<Vec<String>>,
    #[serde(default)]
    pub strict_sample_index: Option<bool>,
    #[serde(default)]
    pub organizations: Vec<OrganizationEntry>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ProgressTableEntry {
    pub table_id: String,
    #[serde(default)]
    pub call_type: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum OrganizationEntry {
    Shorthand(String),
    Detailed(OrganizationEntryObject),
}

#[derive(Debug, Deserialize, Serialize)]
pub struct OrganizationEntryObject {
    pub name: String,
    pub container_id: String,
    #[serde(default)]
    pub workflow_name: Option<String>,
    #[serde(default)]
    pub filename_prefix: Option<String>,
    #[serde(default)]
    pub strict: Option<bool>,
    #[serde(default)]
    pub id_space: Option<String>,
    #[serde(default)]
    pub patterns: Vec<PatternEntry>,
    #[serde(default)]
    pub overrides: FieldOverrides,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum PatternEntry {
    Shorthand(String),
    Detailed(PatternEntryObject),
}

#[derive(Debug, Deserialize, Serialize)]
pub struct PatternEntryObject {
    pub regex: String,
    #[serde(default)]
    pub variant_type: Option<String>,
}

/// Systematic annotation corrections for one organization.
///
/// Applied in field order: `copy` (target from source), then `set`, then `defaults`
/// for fields still missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct FieldOverrides {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub set: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub copy: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub defaults: BTreeMap<String, String>,
}

impl FieldOverrides {
    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.copy.is_empty() && self.defaults.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct FilenamePattern {
    pub regex: Regex,
    pub variant_type: Option<VariantType>,
}

impl FilenamePattern {
    pub fn new(regex: &str, variant_type: Option<VariantType>) -> Result<Self, TrackerError> {
        let regex = Regex::new(regex)
            .map_err(|err| TrackerError::InvalidRule(format!("pattern {regex:?}: {err}")))?;
        Ok(Self {
            regex,
            variant_type,
        })
    }
}

#[derive(Debug, Clone)]
pub struct OrganizationRule {
    pub organization: Organization,
    pub strict: bool,
    pub id_space: IdSpace,
    pub patterns: Vec<FilenamePattern>,
    pub overrides: FieldOverrides,
}

impl OrganizationRule {
    /// Lenient rule with the default pattern set.
    pub fn new(organization: Organization) -> Result<Self, TrackerError> {
        let patterns = default_patterns(organization.filename_prefix.as_deref())?;
        Ok(Self {
            organization,
            strict: false,
            id_space: IdSpace::default(),
            patterns,
            overrides: FieldOverrides::default(),
        })
    }

    pub fn name(&self) -> &str {
        &self.organization.name
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub sample_index_table: Option<String>,
    pub progress_table: Option<String>,
    pub progress_call_type: Option<String>,
    pub retain: BTreeSet<String>,
    pub strict_sample_index: bool,
    pub organizations: Vec<OrganizationRule>,
}

impl ResolvedConfig {
    pub fn organization(&self, name: &str) -> Result<&OrganizationRule, TrackerError> {
        self.organizations
            .iter()
            .find(|rule| rule.name().eq_ignore_ascii_case(name))
            .ok_or_else(|| TrackerError::UnknownOrganization(name.to_string()))
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Resolves `path`, else `pcawg-tracker.json` in the current directory, else the user
    /// config directory, else the built-in rule table.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, TrackerError> {
        let config_path = match path {
            Some(path) => Some(PathBuf::from(path)),
            None => Self::discover(),
        };

        let config: Config = match config_path {
            Some(config_path) => {
                tracing::debug!(path = %config_path.display(), "loading rule table");
                let content = fs::read_to_string(&config_path)
                    .map_err(|_| TrackerError::ConfigRead(config_path.clone()))?;
                serde_json::from_str(&content)
                    .map_err(|err| TrackerError::ConfigParse(err.to_string()))?
            }
            None => Self::default_config()?,
        };

        Self::resolve_config(config)
    }

    pub fn default_config() -> Result<Config, TrackerError> {
        serde_json::from_str(DEFAULT_RULES)
            .map_err(|err| TrackerError::ConfigParse(err.to_string()))
    }

    fn discover() -> Option<PathBuf> {
        let local = PathBuf::from(CONFIG_FILE);
        if local.exists() {
            return Some(local);
        }
        ProjectDirs::from("org", "pcawg", "pcawg-tracker")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE))
            .filter(|path| path.exists())
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, TrackerError> {
        let schema_version = config.schema_version.unwrap_or(1);

        let organizations = config
            .organizations
            .into_iter()
            .map(|entry| match entry {
                OrganizationEntry::Shorthand(value) => OrganizationRule::new(value.parse()?),
                OrganizationEntry::Detailed(obj) => resolve_organization(obj),
            })
            .collect::<Result<Vec<_>, TrackerError>>()?;

        let mut seen = BTreeSet::new();
        for rule in &organizations {
            if !seen.insert(rule.name().to_ascii_lowercase()) {
                return Err(TrackerError::InvalidRule(format!(
                    "duplicate organization {}",
                    rule.name()
                )));
            }
        }

        let (progress_table, progress_call_type) = match config.progress_table {
            Some(entry) => (Some(entry.table_id), entry.call_type),
            None => (None, Some("somatic".to_string())),
        };

        Ok(ResolvedConfig {
            schema_version,
            sample_index_table: config.sample_index_table,
            progress_table,
            progress_call_type,
            retain: config
                .retain_fields
                .map(|fields| fields.into_iter().collect())
                .unwrap_or_else(default_retain),
            strict_sample_index: config.strict_sample_index.unwrap_or(false),
            organizations,
        })
    }
}

fn resolve_organization(obj: OrganizationEntryObject) -> Result<OrganizationRule, TrackerError> {
    let organization = Organization {
        name: obj.name,
        container_id: obj.container_id,
        workflow_name: obj.workflow_name,
        filename_prefix: obj.filename_prefix,
    };
    let patterns = if obj.patterns.is_empty() {
        default_patterns(organization.filename_prefix.as_deref())?
    } else {
        obj.patterns
            .into_iter()
            .map(|entry| match entry {
                PatternEntry::Shorthand(regex) => FilenamePattern::new(&regex, None),
                PatternEntry::Detailed(p) => {
                    let variant_type: Option<VariantType> =
                        p.variant_type.as_deref().map(str::parse).transpose()?;
                    FilenamePattern::new(&p.regex, variant_type)
                }
            })
            .collect::<Result<Vec<_>, TrackerError>>()?
    };
    let id_space = match obj.id_space {
        Some(value) => value.parse()?,
        None => IdSpace::default(),
    };
    Ok(OrganizationRule {
        organization,
        strict: obj.strict.unwrap_or(false),
        id_space,
        patterns,
        overrides: obj.overrides,
    })
}

/// Suffix patterns for a file-name prefix, otherwise the generic pattern family.
pub fn default_patterns(prefix: Option<&str>) -> Result<Vec<FilenamePattern>, TrackerError> {
    match prefix {
        Some(prefix) => {
            let prefix = regex::escape(prefix);
            [
                ("indel", VariantType::Indel),
                ("snv_mnv", VariantType::Snv),
                ("sv", VariantType::Sv),
            ]
            .into_iter()
            .map(|(token, variant)| {
                FilenamePattern::new(&format!(r"{prefix}\.{token}\.vcf\.gz$"), Some(variant))
            })
            .collect()
        }
        None => Ok(vec![FilenamePattern::new(DEFAULT_PATTERN, None)?]),
    }
}
