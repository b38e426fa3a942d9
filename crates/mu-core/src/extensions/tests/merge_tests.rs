use serde_yaml::Value;

use crate::extensions::merge::apply;

fn yaml(body: &str) -> Value {
    serde_yaml::from_str(body).unwrap()
}

#[test]
fn test_mappings_merge_recursively() {
    let mut target = yaml("Resources:\n  Bucket:\n    Type: AWS::S3::Bucket\n    Properties:\n      Name: a\n");
    apply(
        &mut target,
        yaml("Resources:\n  Bucket:\n    Properties:\n      Versioning: true\n  Queue:\n    Type: AWS::SQS::Queue\n"),
    );
    assert_eq!(
        target,
        yaml(
            "Resources:\n  Bucket:\n    Type: AWS::S3::Bucket\n    Properties:\n      Name: a\n      Versioning: true\n  Queue:\n    Type: AWS::SQS::Queue\n"
        )
    );
}

#[test]
fn test_sequences_append_and_scalars_replace() {
    let mut target = yaml("list: [a, b]\nname: old\n");
    apply(&mut target, yaml("list: [c]\nname: new\n"));
    assert_eq!(target, yaml("list: [a, b, c]\nname: new\n"));
}

#[test]
fn test_replace_operator() {
    let mut target = yaml("list: [a, b]\nmap: {x: 1}\n");
    apply(&mut target, yaml("list:\n  Fn::Replace: [z]\nmap:\n  Fn::Replace: {y: 2}\n"));
    assert_eq!(target, yaml("list: [z]\nmap: {y: 2}\n"));
}

#[test]
fn test_splice_inserts_and_merges() {
    let mut target = yaml("list: [a, b, c]\n");
    apply(&mut target, yaml("list:\n  Fn::Splice: [1, 0, [x, y]]\n"));
    assert_eq!(target, yaml("list: [a, x, y, b, c]\n"));

    let mut target = yaml("rules:\n  - {name: one, ports: [80]}\n  - {name: two}\n");
    apply(&mut target, yaml("rules:\n  Fn::Splice: [0, 1, [{ports: [443]}]]\n"));
    assert_eq!(target, yaml("rules:\n  - {name: one, ports: [80, 443]}\n  - {name: two}\n"));
}

#[test]
fn test_splice_past_end_appends() {
    let mut target = yaml("list: [a]\n");
    apply(&mut target, yaml("list:\n  Fn::Splice: [9, 2, [b]]\n"));
    assert_eq!(target, yaml("list: [a, b]\n"));

    let mut target = yaml("other: 1\n");
    apply(&mut target, yaml("list:\n  Fn::Splice: [0, 0, [b]]\n"));
    assert_eq!(target, yaml("other: 1\nlist: [b]\n"));
}

#[test]
fn test_tagged_values_replace() {
    let mut target = yaml("Value: !Ref Old\n");
    apply(&mut target, yaml("Value: !Sub '${New}'\n"));
    assert_eq!(target, yaml("Value: !Sub '${New}'\n"));
}
