use assert_matches::assert_matches;

use pcawg_tracker::domain::{CanonicalId, IdSpace, Organization, VariantType};
use pcawg_tracker::error::TrackerError;

#[test]
fn parse_canonical_id_lowercases() {
    let id: CanonicalId = "A1B2C3D4-0000-1111-2222-333344445555".parse().unwrap();
    assert_eq!(id.as_str(), "a1b2c3d4-0000-1111-2222-333344445555");
}

#[test]
fn parse_canonical_id_invalid() {
    let err = "a1b2c3d4-0000-1111-2222".parse::<CanonicalId>().unwrap_err();
    assert_matches!(err, TrackerError::InvalidIdentifier(_));
}

#[test]
fn extract_reads_prefix_only() {
    assert!(CanonicalId::extract("sample.vcf.gz").is_none());
    let id = CanonicalId::extract("deadbeef-dead-beef-dead-beefdeadbeef.broad.sv.vcf.gz").unwrap();
    assert_eq!(id.to_string(), "deadbeef-dead-beef-dead-beefdeadbeef");
}

#[test]
fn variant_type_vocabulary_is_closed() {
    assert_eq!("snv_mnv".parse::<VariantType>().unwrap(), VariantType::Snv);
    assert_eq!(" Indel ".parse::<VariantType>().unwrap(), VariantType::Indel);
    assert_eq!("sv".parse::<VariantType>().unwrap().to_string(), "sv");
    assert_matches!(
        "cnv".parse::<VariantType>(),
        Err(TrackerError::InvalidVariantType(_))
    );
}

#[test]
fn variant_type_serializes_lowercase() {
    let json = serde_json::to_string(&VariantType::Indel).unwrap();
    assert_eq!(json, "\"indel\"");
}

#[test]
fn id_space_accepts_both_spellings() {
    assert_eq!(
        "tumor_analysis".parse::<IdSpace>().unwrap(),
        IdSpace::TumourAnalysis
    );
    assert_eq!("donor".parse::<IdSpace>().unwrap(), IdSpace::Donor);
    assert_matches!(
        "sample".parse::<IdSpace>(),
        Err(TrackerError::InvalidIdSpace(_))
    );
}

#[test]
fn organization_shorthand_requires_container() {
    let org: Organization = "SFU@syn3165152".parse().unwrap();
    assert_eq!(org.container_id, "syn3165152");
    assert!(org.workflow_name.is_none());
    assert_matches!(
        "SFU@".parse::<Organization>(),
        Err(TrackerError::InvalidRule(_))
    );
}
