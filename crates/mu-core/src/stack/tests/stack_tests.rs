use std::collections::BTreeMap;

use crate::kernel::error::Error;
use crate::stack::{
    Stack, StackSystemError, StackType, StackUpsert, build_tags, check_deleted, check_upserted, stack_name, status,
};

fn stack(status: &str) -> Stack {
    Stack {
        name: "mu-vpc-dev".to_string(),
        status: status.to_string(),
        status_reason: "reason".to_string(),
        ..Default::default()
    }
}

#[test]
fn test_stack_name() {
    assert_eq!(stack_name("mu", StackType::Environment, &["dev"]), "mu-environment-dev");
    assert_eq!(stack_name("acme", StackType::Service, &["web", "prod"]), "acme-service-web-prod");
    assert_eq!(stack_name("mu", StackType::LoadBalancer, &["dev"]), "mu-loadbalancer-dev");
    assert_eq!(stack_name("mu", StackType::Iam, &[]), "mu-iam");
}

#[test]
fn test_build_tags_prefixes_keys() {
    let tags = build_tags(StackType::Service, &[("environment", "dev"), ("service", "web")]);
    let expected: BTreeMap<String, String> = [("mu:type", "service"), ("mu:environment", "dev"), ("mu:service", "web")]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    assert_eq!(tags, expected);
}

#[test]
fn test_stack_type_parsing() {
    for stack_type in StackType::ALL {
        assert_eq!(stack_type.as_str().parse::<StackType>().unwrap(), stack_type);
    }
    assert_eq!("cluster".parse::<StackType>().unwrap(), StackType::Environment);
    assert_eq!("VPC".parse::<StackType>().unwrap(), StackType::Vpc);
    assert!(matches!("widget".parse::<StackType>(), Err(Error::Parse { .. })));
}

#[test]
fn test_upsert_type_comes_from_tags() {
    let upsert = StackUpsert::new("mu-database-web-dev", "database")
        .tags(build_tags(StackType::Database, &[]))
        .role_arn("");
    assert_eq!(upsert.stack_type(), Some(StackType::Database));
    assert_eq!(upsert.role_arn, None);
    assert_eq!(StackUpsert::new("x", "y").stack_type(), None);
}

#[test]
fn test_status_helpers() {
    assert!(status::is_final(status::CREATE_COMPLETE));
    assert!(status::is_final(status::ROLLBACK_COMPLETE));
    assert!(!status::is_final(status::UPDATE_IN_PROGRESS));
    assert!(status::is_successful(status::UPDATE_COMPLETE));
    assert!(!status::is_successful(status::ROLLBACK_COMPLETE));
    assert!(!status::is_successful(status::CREATE_FAILED));
}

#[test]
fn test_check_upserted() {
    assert!(check_upserted("mu-vpc-dev", Some(stack(status::CREATE_COMPLETE))).is_ok());

    let err = check_upserted("mu-vpc-dev", None).unwrap_err();
    assert!(matches!(err, Error::StackSystem(StackSystemError::StackNotCreated { .. })));

    let err = check_upserted("mu-vpc-dev", Some(stack(status::ROLLBACK_COMPLETE))).unwrap_err();
    assert_eq!(err.to_string(), "Ended in failed status ROLLBACK_COMPLETE reason");
}

#[test]
fn test_check_deleted() {
    assert!(check_deleted(None).is_ok());
    assert!(check_deleted(Some(stack(status::DELETE_COMPLETE))).is_ok());
    assert!(check_deleted(Some(stack(status::DELETE_FAILED))).is_err());
}
