use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::TrackerError;

static CANONICAL_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^([0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12})")
        .expect("canonical id pattern")
});

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum VariantType {
    Snv,
    Indel,
    Sv,
}

impl VariantType {
    /// Order used for charts and legends.
    pub const CHART_ORDER: [VariantType; 3] =
        [VariantType::Snv, VariantType::Sv, VariantType::Indel];

    pub fn as_str(self) -> &'static str {
        match self {
            VariantType::Snv => "snv",
            VariantType::Indel => "indel",
            VariantType::Sv => "sv",
        }
    }

    /// Parses the tokens centers use in file names and annotations.
    pub fn from_token(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "snv" | "snv_mnv" => Some(VariantType::Snv),
            "indel" | "indels" => Some(VariantType::Indel),
            "sv" => Some(VariantType::Sv),
            _ => None,
        }
    }
}

impl fmt::Display for VariantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for VariantType {
    type Err = TrackerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::from_token(value).ok_or_else(|| TrackerError::InvalidVariantType(value.to_string()))
    }
}

/// 8-4-4-4-12 hexadecimal identifier, stored lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CanonicalId(String);

impl CanonicalId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Extracts an identifier anchored at the start of a file name.
    pub fn extract(name: &str) -> Option<Self> {
        CANONICAL_ID_RE
            .captures(name)
            .and_then(|caps| caps.get(1))
            .map(|m| Self(m.as_str().to_ascii_lowercase()))
    }
}

impl fmt::Display for CanonicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CanonicalId {
    type Err = TrackerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        match Self::extract(trimmed) {
            Some(id) if id.0.len() == trimmed.len() => Ok(id),
            _ => Err(TrackerError::InvalidIdentifier(value.to_string())),
        }
    }
}

/// Sample-index column an organization's raw identifiers are drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdSpace {
    Donor,
    #[default]
    TumourAnalysis,
    NormalAnalysis,
}

impl fmt::Display for IdSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdSpace::Donor => write!(f, "donor"),
            IdSpace::TumourAnalysis => write!(f, "tumour_analysis"),
            IdSpace::NormalAnalysis => write!(f, "normal_analysis"),
        }
    }
}

impl FromStr for IdSpace {
    type Err = TrackerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "donor" => Ok(IdSpace::Donor),
            "tumour_analysis" | "tumor_analysis" => Ok(IdSpace::TumourAnalysis),
            "normal_analysis" => Ok(IdSpace::NormalAnalysis),
            _ => Err(TrackerError::InvalidIdSpace(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Organization {
    pub name: String,
    pub container_id: String,
    pub workflow_name: Option<String>,
    pub filename_prefix: Option<String>,
}

impl Organization {
    pub fn new(name: impl Into<String>, container_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            container_id: container_id.into(),
            workflow_name: None,
            filename_prefix: None,
        }
    }
}

impl FromStr for Organization {
    type Err = TrackerError;

    /// Parses the `Name@container` shorthand.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (name, container) = value
            .trim()
            .split_once('@')
            .ok_or_else(|| TrackerError::InvalidRule(value.to_string()))?;
        if name.is_empty() || container.is_empty() {
            return Err(TrackerError::InvalidRule(value.to_string()));
        }
        Ok(Self::new(name, container))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn variant_aliases() {
        assert_eq!(VariantType::from_token("SNV_MNV"), Some(VariantType::Snv));
        assert_eq!(VariantType::from_token("indels"), Some(VariantType::Indel));
        assert_eq!(VariantType::from_token("cnv"), None);
    }

    #[test]
    fn extract_is_anchored() {
        let id = CanonicalId::extract("0E90FB64-00b2-4b53-bbc7-df8182b84060.somatic.sv.vcf.gz");
        assert_eq!(
            id.unwrap().as_str(),
            "0e90fb64-00b2-4b53-bbc7-df8182b84060"
        );
        assert!(CanonicalId::extract("x0e90fb64-00b2-4b53-bbc7-df8182b84060").is_none());
    }

    #[test]
    fn parse_id_rejects_trailing_text() {
        let err = "0e90fb64-00b2-4b53-bbc7-df8182b84060.vcf"
            .parse::<CanonicalId>()
            .unwrap_err();
        assert_matches!(err, TrackerError::InvalidIdentifier(_));
    }

    #[test]
    fn organization_shorthand() {
        let org: Organization = "Broad@syn3165121".parse().unwrap();
        assert_eq!(org.name, "Broad");
        assert_eq!(org.container_id, "syn3165121");
        assert_matches!(
            "Broad".parse::<Organization>(),
            Err(TrackerError::InvalidRule(_))
        );
    }
}
