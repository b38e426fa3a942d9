//! Evaluation of the intrinsic functions used by the embedded templates.
//!
//! Only what the provisioning simulation needs: parameter resolution, physical
//! ids, conditions, and outputs with their exports.
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};

use serde_yaml::{Mapping, Value};
use sha1::{Digest, Sha1};

use crate::provider::error::{ApiError, ApiResult};
use crate::stack::api::StackParameter;

pub const REGION: &str = "local-1";
pub const ACCOUNT_ID: &str = "000000000000";

/// Resource types whose physical id comes from a naming property.
const NAMING_PROPERTIES: &[(&str, &str)] = &[
    ("AWS::S3::Bucket", "BucketName"),
    ("AWS::ECR::Repository", "RepositoryName"),
    ("AWS::ECS::Cluster", "ClusterName"),
    ("AWS::IAM::Role", "RoleName"),
    ("AWS::CodePipeline::Pipeline", "Name"),
    ("AWS::CodeBuild::Project", "Name"),
];

#[derive(Debug, Clone)]
pub struct TemplateResource {
    pub logical_id: String,
    pub resource_type: String,
    pub condition: Option<String>,
    pub properties: Value,
}

#[derive(Debug, Clone)]
pub struct TemplateOutput {
    pub name: String,
    pub condition: Option<String>,
    pub value: Value,
    pub export: Option<Value>,
}

/// A parsed template body.
#[derive(Debug, Clone, Default)]
pub struct Template {
    /// Declared parameters and their defaults.
    pub parameters: BTreeMap<String, Option<String>>,
    pub conditions: Mapping,
    pub resources: Vec<TemplateResource>,
    pub outputs: Vec<TemplateOutput>,
}

fn format_error(reason: impl std::fmt::Display) -> ApiError {
    ApiError::validation(format!("Template format error: {reason}"))
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

impl Template {
    pub fn parse(body: &str) -> ApiResult<Self> {
        let document: Value = serde_yaml::from_str(body).map_err(format_error)?;
        let Value::Mapping(document) = document else {
            return Err(format_error("template is not a mapping"));
        };

        let mut template = Template::default();
        if let Some(Value::Mapping(parameters)) = document.get("Parameters") {
            for (name, declaration) in parameters {
                let name = scalar(name).ok_or_else(|| format_error("parameter name"))?;
                let default = declaration.get("Default").and_then(scalar);
                template.parameters.insert(name, default);
            }
        }
        if let Some(Value::Mapping(conditions)) = document.get("Conditions") {
            template.conditions = conditions.clone();
        }
        match document.get("Resources") {
            Some(Value::Mapping(resources)) => {
                for (logical_id, resource) in resources {
                    let logical_id = scalar(logical_id).ok_or_else(|| format_error("resource name"))?;
                    let resource_type = resource
                        .get("Type")
                        .and_then(scalar)
                        .ok_or_else(|| format_error(format!("resource {logical_id} has no Type")))?;
                    template.resources.push(TemplateResource {
                        logical_id,
                        resource_type,
                        condition: resource.get("Condition").and_then(scalar),
                        properties: resource.get("Properties").cloned().unwrap_or(Value::Null),
                    });
                }
            }
            _ => return Err(format_error("At least one Resources member must be defined.")),
        }
        if let Some(Value::Mapping(outputs)) = document.get("Outputs") {
            for (name, output) in outputs {
                let name = scalar(name).ok_or_else(|| format_error("output name"))?;
                let value = output
                    .get("Value")
                    .cloned()
                    .ok_or_else(|| format_error(format!("output {name} has no Value")))?;
                template.outputs.push(TemplateOutput {
                    name,
                    condition: output.get("Condition").and_then(scalar),
                    value,
                    export: output.get("Export").and_then(|e| e.get("Name")).cloned(),
                });
            }
        }
        Ok(template)
    }

    /// Parameter values for a create or update. Explicit values win, then the
    /// previous value when asked for, then the template default.
    pub fn resolve_parameters(
        &self,
        given: &[StackParameter],
        previous: &BTreeMap<String, String>,
    ) -> BTreeMap<String, String> {
        let mut resolved = BTreeMap::new();
        for (name, default) in &self.parameters {
            let value = match given.iter().find(|p| &p.key == name) {
                Some(StackParameter { value: Some(value), .. }) => value.clone(),
                Some(StackParameter {
                    use_previous_value: true,
                    ..
                }) => previous.get(name).cloned().or_else(|| default.clone()).unwrap_or_default(),
                _ => default.clone().unwrap_or_default(),
            };
            resolved.insert(name.clone(), value);
        }
        resolved
    }
}

/// Physical id generated for a resource without a naming property.
pub fn generated_id(stack_name: &str, logical_id: &str) -> String {
    let digest = hex::encode(Sha1::digest(format!("{stack_name}/{logical_id}")));
    format!("{stack_name}-{logical_id}-{}", digest[..12].to_uppercase())
}

/// Everything intrinsic functions may refer to while one stack is evaluated.
pub struct Scope<'a> {
    pub stack_name: &'a str,
    pub stack_id: &'a str,
    pub parameters: &'a BTreeMap<String, String>,
    pub conditions: &'a Mapping,
    pub exports: &'a BTreeMap<String, String>,
    pub zones: &'a [String],
    pub physical_ids: BTreeMap<String, String>,
    /// Exports read through `Fn::ImportValue`.
    pub imported: RefCell<BTreeSet<String>>,
}

impl<'a> Scope<'a> {
    /// Resolve any value: intrinsic functions are evaluated, collections are
    /// resolved element-wise and scalars are returned as they are.
    pub fn resolve(&self, value: &Value) -> ApiResult<Value> {
        match value {
            Value::Tagged(tagged) => {
                let tag = tagged.tag.to_string();
                let name = tag.trim_start_matches('!');
                let function = if name == "Ref" {
                    "Ref".to_string()
                } else {
                    format!("Fn::{name}")
                };
                self.call(&function, &tagged.value)
            }
            Value::Mapping(mapping) => {
                if mapping.len() == 1 {
                    if let Some((Value::String(key), argument)) = mapping.iter().next() {
                        if key == "Ref" || key.starts_with("Fn::") || key == "Condition" {
                            let function = if key == "Condition" { "Fn::Condition" } else { key };
                            return self.call(function, argument);
                        }
                    }
                }
                let mut resolved = Mapping::new();
                for (key, item) in mapping {
                    resolved.insert(key.clone(), self.resolve(item)?);
                }
                Ok(Value::Mapping(resolved))
            }
            Value::Sequence(items) => items
                .iter()
                .map(|item| self.resolve(item))
                .collect::<ApiResult<Vec<_>>>()
                .map(Value::Sequence),
            other => Ok(other.clone()),
        }
    }

    /// Resolve to a string; lists are joined with commas.
    pub fn resolve_string(&self, value: &Value) -> ApiResult<String> {
        Ok(to_string(&self.resolve(value)?))
    }

    pub fn condition(&self, name: &str) -> ApiResult<bool> {
        let expression = self
            .conditions
            .get(name)
            .ok_or_else(|| format_error(format!("Unresolved condition dependency {name}")))?;
        truthy(&self.resolve(expression)?)
    }

    /// Whether an optional `Condition` attribute holds.
    pub fn holds(&self, condition: Option<&str>) -> ApiResult<bool> {
        condition.map_or(Ok(true), |name| self.condition(name))
    }

    fn reference(&self, name: &str) -> ApiResult<Value> {
        let value = match name {
            "AWS::StackName" => self.stack_name.to_string(),
            "AWS::StackId" => self.stack_id.to_string(),
            "AWS::Region" => REGION.to_string(),
            "AWS::AccountId" => ACCOUNT_ID.to_string(),
            "AWS::Partition" => "aws".to_string(),
            "AWS::URLSuffix" => "amazonaws.com".to_string(),
            "AWS::NoValue" => return Ok(Value::Null),
            _ => match self.parameters.get(name).or_else(|| self.physical_ids.get(name)) {
                Some(value) => value.clone(),
                None => return Err(format_error(format!("Unresolved resource dependencies [{name}]"))),
            },
        };
        Ok(Value::String(value))
    }

    fn attribute(&self, resource: &str, attribute: &str) -> ApiResult<Value> {
        let physical_id = self
            .physical_ids
            .get(resource)
            .ok_or_else(|| format_error(format!("Unresolved resource dependencies [{resource}]")))?;
        let value = match attribute {
            "Arn" => format!("arn:aws:local:{REGION}:{ACCOUNT_ID}:{physical_id}"),
            _ => format!("{physical_id}.{attribute}"),
        };
        Ok(Value::String(value))
    }

    fn substitute(&self, template: &str, variables: &Mapping) -> ApiResult<String> {
        let mut output = String::new();
        let mut rest = template;
        while let Some(start) = rest.find("${") {
            output.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = after
                .find('}')
                .ok_or_else(|| format_error(format!("unterminated variable in '{template}'")))?;
            let variable = &after[..end];
            if let Some(literal) = variable.strip_prefix('!') {
                output.push_str("${");
                output.push_str(literal);
                output.push('}');
            } else if let Some(value) = variables.get(variable) {
                output.push_str(&self.resolve_string(value)?);
            } else if let Some((resource, attribute)) = variable.split_once('.') {
                output.push_str(&to_string(&self.attribute(resource, attribute)?));
            } else {
                output.push_str(&to_string(&self.reference(variable)?));
            }
            rest = &after[end + 1..];
        }
        output.push_str(rest);
        Ok(output)
    }

    fn call(&self, function: &str, argument: &Value) -> ApiResult<Value> {
        let arguments = |count: usize| -> ApiResult<Vec<Value>> {
            match argument {
                Value::Sequence(items) if items.len() == count => Ok(items.clone()),
                _ => Err(format_error(format!("{function} expects {count} arguments"))),
            }
        };

        match function {
            "Ref" => {
                let name = self.resolve_string(argument)?;
                self.reference(&name)
            }
            "Fn::Sub" => match argument {
                Value::Sequence(items) if items.len() == 2 => {
                    let template = self.resolve_string(&items[0])?;
                    let variables = match &items[1] {
                        Value::Mapping(mapping) => mapping.clone(),
                        _ => Mapping::new(),
                    };
                    self.substitute(&template, &variables).map(Value::String)
                }
                other => {
                    let template = scalar(other).ok_or_else(|| format_error("Fn::Sub expects a string"))?;
                    self.substitute(&template, &Mapping::new()).map(Value::String)
                }
            },
            "Fn::GetAtt" => {
                let (resource, attribute) = match argument {
                    Value::Sequence(items) if items.len() == 2 => {
                        (self.resolve_string(&items[0])?, self.resolve_string(&items[1])?)
                    }
                    other => {
                        let path = scalar(other).unwrap_or_default();
                        let (resource, attribute) = path
                            .split_once('.')
                            .ok_or_else(|| format_error(format!("invalid Fn::GetAtt '{path}'")))?;
                        (resource.to_string(), attribute.to_string())
                    }
                };
                self.attribute(&resource, &attribute)
            }
            "Fn::ImportValue" => {
                let name = self.resolve_string(argument)?;
                self.imported.borrow_mut().insert(name.clone());
                // missing exports resolve empty so unrelated properties still evaluate
                Ok(Value::String(self.exports.get(&name).cloned().unwrap_or_default()))
            }
            "Fn::Join" => {
                let args = arguments(2)?;
                let delimiter = self.resolve_string(&args[0])?;
                let items = match self.resolve(&args[1])? {
                    Value::Sequence(items) => items.iter().map(to_string).collect::<Vec<_>>(),
                    other => vec![to_string(&other)],
                };
                Ok(Value::String(items.join(&delimiter)))
            }
            "Fn::Split" => {
                let args = arguments(2)?;
                let delimiter = self.resolve_string(&args[0])?;
                let source = self.resolve_string(&args[1])?;
                Ok(Value::Sequence(
                    source
                        .split(delimiter.as_str())
                        .map(|part| Value::String(part.to_string()))
                        .collect(),
                ))
            }
            "Fn::Select" => {
                let args = arguments(2)?;
                let index: usize = self
                    .resolve_string(&args[0])?
                    .parse()
                    .map_err(|e| format_error(format!("Fn::Select index: {e}")))?;
                match self.resolve(&args[1])? {
                    Value::Sequence(items) => items
                        .get(index)
                        .cloned()
                        .ok_or_else(|| format_error(format!("Fn::Select index {index} out of bounds"))),
                    _ => Err(format_error("Fn::Select expects a list")),
                }
            }
            "Fn::If" => {
                let args = arguments(3)?;
                let condition = self.resolve_string(&args[0])?;
                if self.condition(&condition)? {
                    self.resolve(&args[1])
                } else {
                    self.resolve(&args[2])
                }
            }
            "Fn::Equals" => {
                let args = arguments(2)?;
                Ok(Value::Bool(self.resolve_string(&args[0])? == self.resolve_string(&args[1])?))
            }
            "Fn::Not" => {
                let args = arguments(1)?;
                Ok(Value::Bool(!truthy(&self.resolve(&args[0])?)?))
            }
            "Fn::And" | "Fn::Or" => {
                let Value::Sequence(items) = argument else {
                    return Err(format_error(format!("{function} expects a list")));
                };
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(truthy(&self.resolve(item)?)?);
                }
                Ok(Value::Bool(if function == "Fn::And" {
                    values.iter().all(|v| *v)
                } else {
                    values.iter().any(|v| *v)
                }))
            }
            "Fn::Condition" => {
                let name = self.resolve_string(argument)?;
                self.condition(&name).map(Value::Bool)
            }
            "Fn::GetAZs" => Ok(Value::Sequence(
                self.zones.iter().map(|zone| Value::String(zone.clone())).collect(),
            )),
            "Fn::Base64" => self.resolve(argument),
            other => Err(format_error(format!("Unsupported intrinsic function {other}"))),
        }
    }
}

fn truthy(value: &Value) -> ApiResult<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(true),
        Value::String(s) if s.eq_ignore_ascii_case("false") => Ok(false),
        other => Err(format_error(format!("expected a condition, got {other:?}"))),
    }
}

fn to_string(value: &Value) -> String {
    match value {
        Value::Sequence(items) => items.iter().map(to_string).collect::<Vec<_>>().join(","),
        Value::Null => String::new(),
        other => scalar(other).unwrap_or_default(),
    }
}

/// Result of evaluating a template for one stack.
#[derive(Debug, Clone, Default)]
pub struct Evaluation {
    /// Logical id, type and physical id of each resource whose condition holds.
    pub resources: Vec<(String, String, String)>,
    /// Resolved properties by logical id; resources whose properties failed to resolve are absent.
    pub properties: BTreeMap<String, Value>,
    pub outputs: BTreeMap<String, String>,
    pub exports: BTreeMap<String, String>,
    pub imports: BTreeSet<String>,
}

/// Evaluate `template` for a stack with the given resolved parameters.
pub fn evaluate(
    template: &Template,
    stack_name: &str,
    stack_id: &str,
    parameters: &BTreeMap<String, String>,
    exports: &BTreeMap<String, String>,
    zones: &[String],
) -> ApiResult<Evaluation> {
    let mut scope = Scope {
        stack_name,
        stack_id,
        parameters,
        conditions: &template.conditions,
        exports,
        zones,
        physical_ids: BTreeMap::new(),
        imported: RefCell::new(BTreeSet::new()),
    };

    let mut active = Vec::new();
    for resource in &template.resources {
        if scope.holds(resource.condition.as_deref())? {
            scope
                .physical_ids
                .insert(resource.logical_id.clone(), generated_id(stack_name, &resource.logical_id));
            active.push(resource);
        }
    }

    let mut named = Vec::new();
    for resource in &active {
        let property = NAMING_PROPERTIES
            .iter()
            .find(|(resource_type, _)| *resource_type == resource.resource_type)
            .and_then(|(_, property)| resource.properties.get(*property));
        if let Some(property) = property {
            if let Ok(name) = scope.resolve_string(property) {
                if !name.is_empty() {
                    named.push((resource.logical_id.clone(), name));
                }
            }
        }
    }
    scope.physical_ids.extend(named);

    let mut evaluation = Evaluation::default();
    for resource in &active {
        let physical_id = scope.physical_ids.get(&resource.logical_id).cloned().unwrap_or_default();
        evaluation
            .resources
            .push((resource.logical_id.clone(), resource.resource_type.clone(), physical_id));
        if let Ok(properties) = scope.resolve(&resource.properties) {
            evaluation.properties.insert(resource.logical_id.clone(), properties);
        }
    }

    for output in &template.outputs {
        if !scope.holds(output.condition.as_deref())? {
            continue;
        }
        let value = scope.resolve_string(&output.value)?;
        if let Some(export) = &output.export {
            evaluation.exports.insert(scope.resolve_string(export)?, value.clone());
        }
        evaluation.outputs.insert(output.name.clone(), value);
    }

    evaluation.imports = scope.imported.into_inner();
    Ok(evaluation)
}
