//! Library integration tests.

use funnel::FunnelError;

#[test]
fn error_types_are_public() {
    let err = FunnelError::MissingDependency {
        variable: "wind_speed".into(),
        missing: vec!["ua".into(), "va".into()],
    };
    assert!(err.to_string().contains("ua, va"));
    assert!(FunnelError::not_found("key", "foo").is_not_found());
}

#[test]
fn result_type_alias_is_public() {
    fn test_fn() -> funnel::Result<()> {
        Ok(())
    }
    assert!(test_fn().is_ok());
}

#[test]
fn modules_are_public() {
    use funnel::logging::DEFAULT_FILTER;
    use funnel::serializers::SerializerRegistry;

    assert_eq!(DEFAULT_FILTER, "funnel=info");
    let names = SerializerRegistry::global().names();
    assert!(names.contains(&"object".to_string()));
    assert!(names.contains(&"dataset.container".to_string()));
    assert!(names.contains(&"dataset.chunked".to_string()));
}
