use std::io;

use crate::config::error::ConfigError;
use crate::kernel::error::Error;
use crate::provider::ApiError;
use crate::provider::error::codes;
use crate::workflows::WorkflowError;

#[test]
fn test_provider_error_names_operation_and_target() {
    let err = Error::provider("DeleteStack", "mu-vpc-dev", ApiError::validation("Stack is protected"));

    assert_eq!(
        err.to_string(),
        "DeleteStack failed for 'mu-vpc-dev': ValidationError: Stack is protected"
    );
    assert_eq!(err.api_code(), Some(codes::VALIDATION_ERROR));
}

#[test]
fn test_io_error_names_path() {
    let err = Error::io(io::Error::new(io::ErrorKind::NotFound, "gone"), "read", "/tmp/mu.yml");

    assert!(err.to_string().contains("'read' on '/tmp/mu.yml'"), "{err}");
    assert_eq!(err.api_code(), None);
}

#[test]
fn test_subsystem_errors_convert() {
    let err: Error = WorkflowError::ServiceNameRequired.into();
    assert!(matches!(err, Error::Workflow(_)));

    let err: Error = ConfigError::EnvironmentNotFound { name: "qa".to_string() }.into();
    assert!(matches!(err, Error::Config(_)));
    assert!(err.to_string().contains("qa"), "{err}");

    let err: Error = "plain message".into();
    assert_eq!(err.to_string(), "plain message");
}

#[test]
fn test_serialization_error_keeps_format() {
    let source = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
    let err = Error::serialization("json", source);
    assert!(err.to_string().starts_with("Unable to serialize json:"), "{err}");
}
