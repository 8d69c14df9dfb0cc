//! Registration scenarios for the person subjects
//!
//! Drives the registry through the protocol client the way a producer
//! would: reset the subject, pick a mode, register schema after schema and
//! assert on the verdicts.

use std::path::PathBuf;

use json_schema_registry::{
    CompatibilityMode, Direction, ErrorKind, ErrorResponse, RegistryService, ReasonCode, SchemaError, SchemaId,
    SchemaRegistryClient, VersionSpec,
};
use rstest::{fixture, rstest};
use serde_json::json;

const BACKWARDS_SUBJECT: &str = "persons-backwards-value";
const FORWARDS_SUBJECT: &str = "persons-forwards-value";

fn load_fixture(name: &str) -> String {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name);
    std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("Failed to read {}: {}", path.display(), e))
}

fn firstname() -> String {
    load_fixture("person_firstname.json")
}

fn firstname_lastname() -> String {
    load_fixture("person_firstname_lastname.json")
}

fn lastname() -> String {
    load_fixture("person_lastname.json")
}

#[fixture]
fn service() -> RegistryService {
    RegistryService::default()
}

/// Start from a clean subject; a missing subject counts as already clean
fn reset(client: &RegistryService, subject: &str) {
    match client.delete_subject(subject, false) {
        Ok(_) => {}
        Err(e) if e.is_not_found() => {}
        Err(e) => panic!("unexpected error resetting {}: {}", subject, e),
    }
}

#[rstest]
fn test_backward_subject_rejects_removed_property(service: RegistryService) {
    reset(&service, BACKWARDS_SUBJECT);
    assert_eq!(service.get_mode(BACKWARDS_SUBJECT).unwrap(), CompatibilityMode::Backward);

    let v1 = service.register(BACKWARDS_SUBJECT, &firstname()).unwrap();
    let v2 = service.register(BACKWARDS_SUBJECT, &firstname_lastname()).unwrap();
    assert_ne!(v1, v2);

    let err = service.register(BACKWARDS_SUBJECT, &lastname()).unwrap_err();
    let response = ErrorResponse::from(&err);
    assert_eq!(response.error_code, 409);
    assert_eq!(response.kind(), ErrorKind::Conflict);
    assert!(response.message.contains("PROPERTY_REMOVED_FROM_CLOSED_CONTENT_MODEL"));

    let incompatibility = err.incompatibility().unwrap();
    assert_eq!(incompatibility.field.as_deref(), Some("firstname"));
    assert_eq!(incompatibility.version, Some(2));
    assert_eq!(service.list_versions(BACKWARDS_SUBJECT).unwrap(), vec![1, 2]);
}

#[rstest]
fn test_forward_subject_accepts_narrowing_then_rejects(service: RegistryService) {
    reset(&service, FORWARDS_SUBJECT);
    service.set_mode(FORWARDS_SUBJECT, CompatibilityMode::Forward).unwrap();

    service.register(FORWARDS_SUBJECT, &firstname_lastname()).unwrap();
    service.register(FORWARDS_SUBJECT, &firstname()).unwrap();

    let err = service.register(FORWARDS_SUBJECT, &lastname()).unwrap_err();
    assert!(err.to_string().contains("PROPERTY_REMOVED_FROM_CLOSED_CONTENT_MODEL"));
    assert_eq!(err.incompatibility().map(|i| i.field.as_deref()), Some(Some("lastname")));
}

#[rstest]
fn test_forward_rejects_property_added_under_closed_model(service: RegistryService) {
    service.set_mode(FORWARDS_SUBJECT, CompatibilityMode::Forward).unwrap();
    service.register(FORWARDS_SUBJECT, &firstname()).unwrap();

    let verdict = service.test_compatibility(FORWARDS_SUBJECT, &firstname_lastname()).unwrap();
    assert_eq!(
        verdict.incompatibility().map(|i| i.reason),
        Some(ReasonCode::PropertyRemovedFromClosedContentModel)
    );
}

#[rstest]
fn test_first_registration_always_accepted(
    service: RegistryService,
    #[values(
        CompatibilityMode::None,
        CompatibilityMode::Backward,
        CompatibilityMode::BackwardTransitive,
        CompatibilityMode::Forward,
        CompatibilityMode::ForwardTransitive,
        CompatibilityMode::Full,
        CompatibilityMode::FullTransitive
    )]
    mode: CompatibilityMode,
    #[values("person_firstname.json", "person_lastname.json", "person_open.json")] schema: &str,
) {
    service.set_mode("fresh-value", mode).unwrap();
    assert!(service.test_compatibility("fresh-value", &load_fixture(schema)).unwrap().is_accept());
    service.register("fresh-value", &load_fixture(schema)).unwrap();
    assert_eq!(service.list_versions("fresh-value").unwrap(), vec![1]);
}

#[rstest]
fn test_identical_content_is_idempotent(service: RegistryService) {
    let first = service.register(BACKWARDS_SUBJECT, &firstname()).unwrap();

    // Same content, different key order and whitespace
    let reordered = json!({
        "properties": {"firstname": {"type": "string"}},
        "additionalProperties": false,
        "type": "object",
        "title": "Person V 1",
        "$schema": "http://json-schema.org/draft-07/schema#"
    });
    let second = service.register(BACKWARDS_SUBJECT, &reordered.to_string()).unwrap();

    assert_eq!(first, second);
    assert_eq!(service.list_versions(BACKWARDS_SUBJECT).unwrap(), vec![1]);
}

#[rstest]
fn test_schema_ids_shared_across_subjects(service: RegistryService) {
    let a = service.register(BACKWARDS_SUBJECT, &firstname()).unwrap();
    let b = service.register(FORWARDS_SUBJECT, &firstname()).unwrap();
    assert_eq!(a, b);
}

#[rstest]
#[case(CompatibilityMode::Backward, true)]
#[case(CompatibilityMode::BackwardTransitive, false)]
fn test_transitive_mode_checks_every_version(
    service: RegistryService,
    #[case] mode: CompatibilityMode,
    #[case] accepted: bool,
) {
    let subject = "ages-value";
    let closed = |props: serde_json::Value| {
        json!({"type": "object", "additionalProperties": false, "properties": props}).to_string()
    };

    service.register(subject, &closed(json!({"age": {"type": "string"}}))).unwrap();
    service.set_mode(subject, CompatibilityMode::None).unwrap();
    service.register(subject, &closed(json!({"age": {"type": "integer"}}))).unwrap();
    service.set_mode(subject, mode).unwrap();

    let candidate = closed(json!({"age": {"type": "integer"}, "name": {"type": "string"}}));
    match service.register(subject, &candidate) {
        Ok(_) => assert!(accepted, "{} should reject", mode),
        Err(SchemaError::IncompatibleSchema(inc)) => {
            assert!(!accepted, "{} should accept, got {}", mode, inc);
            assert_eq!(inc.reason, ReasonCode::TypeChanged);
            assert_eq!(inc.version, Some(1));
        }
        Err(other) => panic!("unexpected error: {}", other),
    }
}

#[rstest]
fn test_widening_accepted_narrowing_rejected(service: RegistryService) {
    let subject = "scores-value";
    let schema = |title: &str, ty: &str| {
        json!({"title": title, "type": "object", "additionalProperties": false,
               "properties": {"score": {"type": ty}}})
        .to_string()
    };

    let v1 = service.register(subject, &schema("scores", "integer")).unwrap();
    assert_eq!(v1, SchemaId(1));
    service.register(subject, &schema("scores", "number")).unwrap();

    // Identical to v1, so it resolves to v1 instead of being checked
    assert_eq!(service.register(subject, &schema("scores", "integer")).unwrap(), SchemaId(1));
    assert_eq!(service.list_versions(subject).unwrap(), vec![1, 2]);

    let err = service.register(subject, &schema("narrowed", "integer")).unwrap_err();
    let inc = err.incompatibility().unwrap();
    assert_eq!(inc.reason, ReasonCode::TypeNarrowed);
    assert_eq!(inc.field.as_deref(), Some("score"));
    assert_eq!(inc.version, Some(2));
}

#[rstest]
fn test_reregistered_content_resolves_to_its_own_version(service: RegistryService) {
    service.register(BACKWARDS_SUBJECT, &firstname()).unwrap();
    service.register(BACKWARDS_SUBJECT, &firstname_lastname()).unwrap();

    let id = service.register(BACKWARDS_SUBJECT, &firstname()).unwrap();
    let entry = service.lookup(BACKWARDS_SUBJECT, &firstname()).unwrap();
    assert_eq!(entry.id, id);
    assert_eq!(entry.version, 1);
    assert_eq!(entry.key(), format!("{}/v1", BACKWARDS_SUBJECT));

    let latest = service.get_version(BACKWARDS_SUBJECT, VersionSpec::Latest).unwrap();
    assert_eq!(latest.version, 2);
    assert_ne!(latest.id, id);
}

#[rstest]
#[case(CompatibilityMode::Forward, None)]
#[case(CompatibilityMode::ForwardTransitive, Some(ReasonCode::TypeNarrowed))]
#[case(CompatibilityMode::Full, None)]
#[case(CompatibilityMode::FullTransitive, Some(ReasonCode::TypeNarrowed))]
fn test_forward_transitive_modes_check_every_version(
    service: RegistryService,
    #[case] mode: CompatibilityMode,
    #[case] expected: Option<ReasonCode>,
) {
    let subject = "ages-value";
    let closed = |title: &str, ty: &str| {
        json!({"title": title, "type": "object", "additionalProperties": false,
               "properties": {"age": {"type": ty}}})
        .to_string()
    };

    service.register(subject, &closed("v1", "integer")).unwrap();
    service.set_mode(subject, CompatibilityMode::None).unwrap();
    service.register(subject, &closed("v2", "number")).unwrap();
    service.set_mode(subject, mode).unwrap();

    // Readable by v2 but not by v1, which only takes integers
    match (service.register(subject, &closed("v3", "number")), expected) {
        (Ok(_), None) => assert_eq!(service.list_versions(subject).unwrap(), vec![1, 2, 3]),
        (Err(SchemaError::IncompatibleSchema(inc)), Some(reason)) => {
            assert_eq!(inc.reason, reason);
            assert_eq!(inc.direction, Direction::Forward);
            assert_eq!(inc.version, Some(1));
        }
        (result, _) => panic!("{}: unexpected outcome {:?}", mode, result.map_err(|e| e.to_string())),
    }
}

#[rstest]
fn test_full_transitive_reports_oldest_failure_first(service: RegistryService) {
    let subject = "ages-value";
    let closed = |ty: &str| {
        json!({"type": "object", "additionalProperties": false, "properties": {"age": {"type": ty}}}).to_string()
    };

    service.register(subject, &closed("string")).unwrap();
    service.set_mode(subject, CompatibilityMode::None).unwrap();
    service.register(subject, &closed("integer")).unwrap();
    service.set_mode(subject, CompatibilityMode::FullTransitive).unwrap();

    // Fails against both versions in both directions; v1 backward is scanned first
    let verdict = service.test_compatibility(subject, &closed("boolean")).unwrap();
    let inc = verdict.incompatibility().unwrap();
    assert_eq!(inc.reason, ReasonCode::TypeChanged);
    assert_eq!(inc.direction, Direction::Backward);
    assert_eq!(inc.version, Some(1));
    assert_eq!(service.list_versions(subject).unwrap(), vec![1, 2]);
}

#[rstest]
fn test_soft_delete_keeps_numbering_and_hides_history(service: RegistryService) {
    let id = service.register(BACKWARDS_SUBJECT, &firstname()).unwrap();
    service.register(BACKWARDS_SUBJECT, &firstname_lastname()).unwrap();

    assert_eq!(service.delete_subject(BACKWARDS_SUBJECT, false).unwrap(), vec![1, 2]);
    let err = service.delete_subject(BACKWARDS_SUBJECT, false).unwrap_err();
    assert_eq!(err.error_code(), 40404);
    assert!(service.list_versions(BACKWARDS_SUBJECT).unwrap_err().is_not_found());

    // Deleted versions no longer constrain the subject
    service.register(BACKWARDS_SUBJECT, &lastname()).unwrap();
    assert_eq!(service.list_versions(BACKWARDS_SUBJECT).unwrap(), vec![3]);

    // Old ids keep resolving for records already written
    assert!(service.get_by_id(id).is_ok());
}

#[rstest]
fn test_permanent_delete_resets_subject(service: RegistryService) {
    service.set_mode(FORWARDS_SUBJECT, CompatibilityMode::Forward).unwrap();
    service.register(FORWARDS_SUBJECT, &firstname()).unwrap();

    let err = service.delete_subject(FORWARDS_SUBJECT, true).unwrap_err();
    assert_eq!(err.error_code(), 40405);

    service.delete_subject(FORWARDS_SUBJECT, false).unwrap();
    assert_eq!(service.delete_subject(FORWARDS_SUBJECT, true).unwrap(), vec![1]);
    assert_eq!(service.get_mode(FORWARDS_SUBJECT).unwrap(), CompatibilityMode::Backward);

    service.register(FORWARDS_SUBJECT, &lastname()).unwrap();
    let latest = service.get_version(FORWARDS_SUBJECT, VersionSpec::Latest).unwrap();
    assert_eq!(latest.version, 1);
}

#[rstest]
fn test_invalid_requests(service: RegistryService) {
    assert_eq!(service.register("persons-value", "{").unwrap_err().error_code(), 42201);
    assert_eq!(service.register("", &firstname()).unwrap_err().error_code(), 42208);
    assert_eq!("0".parse::<VersionSpec>().unwrap_err().error_code(), 42202);

    service.register("persons-value", &firstname()).unwrap();
    let err = service.get_version("persons-value", VersionSpec::Number(9)).unwrap_err();
    assert_eq!(err.error_code(), 40402);
}
