use assert_matches::assert_matches;

use pcawg_tracker::config::{Config, ConfigLoader, DEFAULT_PATTERN};
use pcawg_tracker::domain::{IdSpace, VariantType};
use pcawg_tracker::error::TrackerError;

fn parse(json: &str) -> Config {
    serde_json::from_str(json).unwrap()
}

#[test]
fn parse_config_shorthand() {
    let config = parse(r#"{ "organizations": ["Broad@syn3165121", "SFU@syn3165152"] }"#);
    let resolved = ConfigLoader::resolve_config(config).unwrap();
    assert_eq!(resolved.schema_version, 1);
    assert_eq!(resolved.organizations.len(), 2);
    assert_eq!(resolved.progress_call_type.as_deref(), Some("somatic"));
    assert!(resolved.retain.contains("id"));

    let broad = resolved.organization("broad").unwrap();
    assert!(!broad.strict);
    assert_eq!(broad.id_space, IdSpace::TumourAnalysis);
    assert_eq!(broad.patterns.len(), 1);
    assert_eq!(broad.patterns[0].regex.as_str(), DEFAULT_PATTERN);
}

#[test]
fn parse_detailed_entry() {
    let config = parse(
        r#"{
            "progress_table": { "table_id": "syn1" },
            "organizations": [{
                "name": "Yale",
                "container_id": "syn9",
                "id_space": "normal_analysis",
                "patterns": [{ "regex": "\\.vcf\\.gz$", "variant_type": "indels" }],
                "overrides": { "defaults": { "call_type": "somatic" } }
            }]
        }"#,
    );
    let resolved = ConfigLoader::resolve_config(config).unwrap();
    assert_eq!(resolved.progress_table.as_deref(), Some("syn1"));
    assert_eq!(resolved.progress_call_type, None);
    let yale = &resolved.organizations[0];
    assert_eq!(yale.id_space, IdSpace::NormalAnalysis);
    assert_eq!(yale.patterns[0].variant_type, Some(VariantType::Indel));
    assert_eq!(yale.overrides.defaults["call_type"], "somatic");
}

#[test]
fn duplicate_organizations_rejected() {
    let config = parse(r#"{ "organizations": ["OICR@syn1", "oicr@syn2"] }"#);
    assert_matches!(
        ConfigLoader::resolve_config(config),
        Err(TrackerError::InvalidRule(_))
    );
}

#[test]
fn invalid_pattern_rejected() {
    let config = parse(
        r#"{ "organizations": [{ "name": "X", "container_id": "syn1", "patterns": ["(unclosed"] }] }"#,
    );
    assert_matches!(
        ConfigLoader::resolve_config(config),
        Err(TrackerError::InvalidRule(_))
    );
}

#[test]
fn unknown_organization_lookup() {
    let resolved = ConfigLoader::resolve_config(ConfigLoader::default_config().unwrap()).unwrap();
    assert_matches!(
        resolved.organization("Yale"),
        Err(TrackerError::UnknownOrganization(_))
    );
}

#[test]
fn resolve_reads_explicit_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rules.json");
    std::fs::write(&path, r#"{ "organizations": ["McGill@syn3165151"] }"#).unwrap();
    let resolved = ConfigLoader::resolve(path.to_str()).unwrap();
    assert_eq!(resolved.organizations[0].name(), "McGill");

    let missing = dir.path().join("missing.json");
    assert_matches!(
        ConfigLoader::resolve(missing.to_str()),
        Err(TrackerError::ConfigRead(_))
    );
}
