use crate::provider::elb::{ListenerRule, max_priority};
use crate::provider::kubernetes::parse_manifest;

#[test]
fn test_max_priority_ignores_default_rule() {
    let rule = |priority| ListenerRule {
        arn: "arn".to_string(),
        priority,
    };
    assert_eq!(max_priority(&[]), 0);
    assert_eq!(max_priority(&[rule(None)]), 0);
    assert_eq!(max_priority(&[rule(Some(3)), rule(None), rule(Some(12))]), 12);
}

#[test]
fn test_parse_manifest_splits_documents() {
    let manifest = r#"
apiVersion: v1
kind: Namespace
metadata:
  name: mu-service-web
---
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
  namespace: mu-service-web
spec:
  replicas: 2
"#;

    let resources = parse_manifest(manifest).unwrap();

    assert_eq!(resources.len(), 2);
    assert_eq!(resources[0].kind, "Namespace");
    assert_eq!(resources[0].namespace, None);
    assert_eq!(resources[1].api_version, "apps/v1");
    assert_eq!(resources[1].name, "web");
    assert_eq!(resources[1].namespace.as_deref(), Some("mu-service-web"));
    assert_eq!(resources[1].body["spec"]["replicas"].as_u64(), Some(2));
}

#[test]
fn test_parse_manifest_requires_metadata() {
    assert!(parse_manifest("apiVersion: v1\nkind: Pod\n").is_err());
}
