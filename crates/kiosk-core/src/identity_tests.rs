use crate::identity::{
    canonical_country, canonicalize, clean_field, identity_key, normalize_device_id, Identity,
    RawIdentity,
};

fn raw(name: &str, country: &str, code: &str, address: &str) -> RawIdentity {
    RawIdentity {
        name: Some(name.to_string()),
        country: Some(country.to_string()),
        code: Some(code.to_string()),
        address: Some(address.to_string()),
    }
}

#[test]
fn uk_spellings_share_one_country_code() {
    // Arrange
    let spellings = ["uk", "UK", "United Kingdom", " uk ", "united   kingdom"];

    // Act
    let codes: Vec<_> = spellings.iter().map(|s| canonical_country(s)).collect();

    // Assert
    assert!(codes.iter().all(|c| c.as_deref() == Some("GBP")), "{codes:?}");
}

#[test]
fn kiosks_mapped_from_country_aliases_compare_identical() {
    // Arrange
    let a = canonicalize(&raw("Kings Cross", "uk", "kc01", "1 Euston Rd"));
    let b = canonicalize(&raw(" kings  cross ", "United Kingdom", "KC01", "1 euston rd"));

    // Act / Assert
    assert_eq!(a.fingerprint(), b.fingerprint());
}

#[test]
fn other_aliases_and_unknown_countries() {
    assert_eq!(canonical_country("USA").as_deref(), Some("USD"));
    assert_eq!(canonical_country("europe").as_deref(), Some("EUR"));
    assert_eq!(canonical_country(" pl ").as_deref(), Some("PL"));
    assert_eq!(canonical_country("n/a"), None);
}

#[test]
fn placeholder_field_values_collapse_to_absent() {
    for value in ["", "  ", "None", "N/A", "-", "null"] {
        assert_eq!(clean_field(Some(value)), None, "{value:?} should be absent");
    }
    assert_eq!(clean_field(Some("  Main \t Hall ")).as_deref(), Some("Main Hall"));
}

#[test]
fn canonical_identity_uppercases_code_and_drops_placeholders() {
    // Arrange
    let incoming = RawIdentity {
        name: Some("  Gatwick  South ".to_string()),
        country: Some("gb".to_string()),
        code: Some(" gw-02 ".to_string()),
        address: Some("none".to_string()),
    };

    // Act
    let identity = canonicalize(&incoming);

    // Assert
    assert_eq!(
        identity,
        Identity {
            name: Some("Gatwick South".to_string()),
            country: Some("GBP".to_string()),
            code: Some("GW-02".to_string()),
            address: None,
        }
    );
}

#[test]
fn placeholder_device_ids_derive_from_kiosk_code() {
    assert_eq!(
        normalize_device_id(Some("localhost"), Some("KC01")).as_deref(),
        Some("kiosk-kc01")
    );
    assert_eq!(
        normalize_device_id(Some(" 127.0.0.1 "), Some(" kc01 ")).as_deref(),
        Some("kiosk-kc01")
    );
    assert_eq!(normalize_device_id(None, Some("KC01")).as_deref(), Some("kiosk-kc01"));
    assert_eq!(normalize_device_id(Some(""), Some("n/a")), None);
    assert_eq!(normalize_device_id(None, None), None);
}

#[test]
fn placeholder_without_code_is_kept_as_sent() {
    assert_eq!(
        normalize_device_id(Some(" raspberrypi "), None).as_deref(),
        Some("raspberrypi")
    );
    assert_eq!(
        normalize_device_id(Some("unknown"), Some("n/a")).as_deref(),
        Some("unknown")
    );
}

#[test]
fn device_id_normalization_is_idempotent() {
    // Arrange
    let first = normalize_device_id(Some("Unknown"), Some("kc01")).expect("derived id");

    // Act
    let second = normalize_device_id(Some(&first), Some("kc01")).expect("kept id");

    // Assert
    assert_eq!(first, second);
    assert_eq!(
        normalize_device_id(Some(" 123 456 789 "), Some("kc01")).as_deref(),
        Some("123 456 789")
    );
}

#[test]
fn merge_keeps_existing_fields_when_incoming_is_absent() {
    // Arrange
    let stored = canonicalize(&raw("Kings Cross", "uk", "kc01", "1 Euston Rd"));
    let incoming = canonicalize(&RawIdentity {
        name: Some("Kings Cross West".to_string()),
        ..RawIdentity::default()
    });

    // Act
    let merged = stored.merged_with(&incoming);

    // Assert
    assert_eq!(merged.name.as_deref(), Some("Kings Cross West"));
    assert_eq!(merged.code.as_deref(), Some("KC01"));
    assert_eq!(merged.address.as_deref(), Some("1 Euston Rd"));
}

#[test]
fn identity_key_prefers_code_then_country_and_name() {
    let with_code = canonicalize(&raw("Kings Cross", "uk", "kc01", ""));
    let without_code = Identity {
        code: None,
        ..with_code.clone()
    };

    assert_eq!(identity_key(Some(&with_code), "dev-1"), "KC01");
    assert_eq!(identity_key(Some(&without_code), "dev-1"), "GBP::kings cross");
    assert_eq!(identity_key(None, "dev-1"), "dev-1");
    assert_eq!(identity_key(Some(&Identity::default()), "dev-1"), "dev-1");
}
