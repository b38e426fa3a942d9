//! Stack lifecycle of the local cloud.
use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use log::debug;
use serde_yaml::Value;
use sha1::{Digest, Sha1};

use crate::local::template::{ACCOUNT_ID, Evaluation, REGION, Template, evaluate};
use crate::local::{
    CloudState, LocalCloud, LocalPipeline, LocalProduct, LocalService, LocalStack, OperationKind, PendingOperation,
    PreviousInputs,
};
use crate::kernel::constants::IMAGE_OWNER;
use crate::provider::catalog::ProvisioningArtifact;
use crate::provider::cluster::ContainerInstance;
use crate::provider::elb::ListenerRule;
use crate::provider::error::{ApiError, ApiResult, NO_UPDATES_MESSAGE};
use crate::provider::pipeline::{ActionState, StageState};
use crate::stack::api::{
    ImageDescription, ProvisioningApi, RESOURCE_TYPE_BUCKET, RESOURCE_TYPE_REPOSITORY, StackDescription, StackEvent,
    StackInput, StackResource, StacksPage,
};
use crate::stack::status;

const STACKS_PAGE_SIZE: usize = 50;

pub(crate) const RESOURCE_TYPE_CLUSTER: &str = "AWS::ECS::Cluster";
const RESOURCE_TYPE_SERVICE: &str = "AWS::ECS::Service";
const RESOURCE_TYPE_TASK_DEFINITION: &str = "AWS::ECS::TaskDefinition";
const RESOURCE_TYPE_LISTENER_RULE: &str = "AWS::ElasticLoadBalancingV2::ListenerRule";
const RESOURCE_TYPE_LAUNCH_CONFIGURATION: &str = "AWS::AutoScaling::LaunchConfiguration";
const RESOURCE_TYPE_PIPELINE: &str = "AWS::CodePipeline::Pipeline";
const RESOURCE_TYPE_PRODUCT: &str = "AWS::ServiceCatalog::CloudFormationProduct";

fn missing_stack(name: &str) -> ApiError {
    ApiError::validation(format!("Stack with id {name} does not exist"))
}

fn property<'a>(properties: Option<&'a Value>, key: &str) -> Option<&'a Value> {
    properties.and_then(|p| p.get(key))
}

fn property_string(properties: Option<&Value>, key: &str) -> String {
    match property(properties, key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

/// `*` matches any run of characters, `?` any single character.
pub(crate) fn glob_match(pattern: &str, text: &str) -> bool {
    fn matches(pattern: &[char], text: &[char]) -> bool {
        match pattern.split_first() {
            None => text.is_empty(),
            Some(('*', rest)) => (0..=text.len()).any(|skip| matches(rest, &text[skip..])),
            Some(('?', rest)) => !text.is_empty() && matches(rest, &text[1..]),
            Some((c, rest)) => text.first() == Some(c) && matches(rest, &text[1..]),
        }
    }
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    matches(&pattern, &text)
}

fn push_event(
    stack: &mut LocalStack,
    sequence: u64,
    logical_id: &str,
    resource_type: &str,
    status: &str,
    reason: Option<String>,
) {
    let mut timestamp = Utc::now();
    if let Some(newest) = stack.events.first() {
        if newest.timestamp >= timestamp {
            timestamp = newest.timestamp + Duration::milliseconds(1);
        }
    }
    stack.events.insert(
        0,
        StackEvent {
            event_id: format!("{}-{sequence}-{}", stack.description.stack_name, stack.events.len()),
            stack_name: stack.description.stack_name.clone(),
            logical_resource_id: logical_id.to_string(),
            resource_type: resource_type.to_string(),
            resource_status: status.to_string(),
            resource_status_reason: reason,
            timestamp,
        },
    );
}

fn stack_event(state: &mut CloudState, name: &str, status: &str, reason: Option<String>) {
    let sequence = state.next_id();
    if let Some(stack) = state.stacks.get_mut(name) {
        push_event(stack, sequence, name, "AWS::CloudFormation::Stack", status, reason);
    }
}

impl LocalCloud {
    /// Move a pending operation one poll closer to its outcome. Returns whether anything changed.
    fn advance(&self, state: &mut CloudState, name: &str) -> bool {
        let Some(stack) = state.stacks.get_mut(name) else {
            return false;
        };
        let Some(pending) = stack.pending.as_mut() else {
            return false;
        };
        if pending.polls_left > 0 {
            pending.polls_left -= 1;
            return true;
        }
        let kind = pending.kind;
        match kind {
            OperationKind::Create | OperationKind::Update => settle_upsert(state, name, kind),
            OperationKind::Delete => settle_delete(state, name),
        }
        true
    }

    fn pending(&self, kind: OperationKind) -> Option<PendingOperation> {
        Some(PendingOperation {
            kind,
            polls_left: self.settle_polls,
        })
    }
}

fn settle_upsert(state: &mut CloudState, name: &str, kind: OperationKind) {
    let Some(stack) = state.stacks.get(name).cloned() else {
        return;
    };
    let evaluation = Template::parse(&stack.template_body).and_then(|template| {
        evaluate(
            &template,
            name,
            &stack.description.stack_id,
            &stack.description.parameters,
            &state.exports,
            &state.availability_zones,
        )
    });
    let evaluation = evaluation.and_then(|evaluation| {
        let conflict = evaluation
            .exports
            .keys()
            .find(|export| state.exports.contains_key(*export) && !stack.exports.contains(*export))
            .cloned();
        match conflict {
            Some(export) => Err(ApiError::validation(format!(
                "Export with name {export} is already exported by another stack"
            ))),
            None => Ok(evaluation),
        }
    });

    let (in_progress_status, complete_status, rollback_status) = match kind {
        OperationKind::Create => (status::CREATE_IN_PROGRESS, status::CREATE_COMPLETE, status::ROLLBACK_COMPLETE),
        _ => (status::UPDATE_IN_PROGRESS, status::UPDATE_COMPLETE, "UPDATE_ROLLBACK_COMPLETE"),
    };

    match evaluation {
        Ok(evaluation) => {
            let new_ids: BTreeSet<&str> = evaluation.resources.iter().map(|(id, _, _)| id.as_str()).collect();
            let removed: Vec<StackResource> = stack
                .resources
                .iter()
                .filter(|r| !new_ids.contains(r.logical_resource_id.as_str()))
                .cloned()
                .collect();
            release_resources(state, name, &removed);
            apply_resources(state, name, &stack.description, &evaluation);

            for export in &stack.exports {
                state.exports.remove(export);
            }
            state.exports.extend(evaluation.exports.clone());

            let sequence = state.next_id();
            let Some(local) = state.stacks.get_mut(name) else {
                return;
            };
            for (logical_id, resource_type, _) in &evaluation.resources {
                push_event(local, sequence, logical_id, resource_type, in_progress_status, None);
                push_event(local, sequence, logical_id, resource_type, complete_status, None);
            }
            local.resources = evaluation
                .resources
                .iter()
                .map(|(logical_id, resource_type, physical_id)| StackResource {
                    logical_resource_id: logical_id.clone(),
                    physical_resource_id: physical_id.clone(),
                    resource_type: resource_type.clone(),
                })
                .collect();
            local.description.outputs = evaluation.outputs;
            local.description.status = complete_status.to_string();
            local.description.status_reason = None;
            local.exports = evaluation.exports.into_keys().collect();
            local.imports = evaluation.imports;
            local.pending = None;
            local.previous = None;
            push_event(local, sequence, name, "AWS::CloudFormation::Stack", complete_status, None);
        }
        Err(err) => {
            debug!("Stack '{name}' failed: {err}");
            let sequence = state.next_id();
            let Some(local) = state.stacks.get_mut(name) else {
                return;
            };
            if let Some(previous) = local.previous.take() {
                local.template_body = previous.template_body;
                local.description.parameters = previous.parameters;
                local.description.tags = previous.tags;
            }
            let failed = if kind == OperationKind::Create {
                status::CREATE_FAILED
            } else {
                "UPDATE_FAILED"
            };
            push_event(local, sequence, name, "AWS::CloudFormation::Stack", failed, Some(err.message.clone()));
            local.description.status = rollback_status.to_string();
            local.description.status_reason = Some(err.message);
            local.pending = None;
            push_event(local, sequence, name, "AWS::CloudFormation::Stack", rollback_status, None);
        }
    }
}

fn settle_delete(state: &mut CloudState, name: &str) {
    let Some(stack) = state.stacks.get(name).cloned() else {
        return;
    };

    let mut blocker = None;
    for resource in &stack.resources {
        let id = &resource.physical_resource_id;
        match resource.resource_type.as_str() {
            RESOURCE_TYPE_BUCKET if state.buckets.get(id).is_some_and(|objects| !objects.is_empty()) => {
                blocker = Some(format!("The bucket you tried to delete is not empty: {id}"));
            }
            RESOURCE_TYPE_REPOSITORY if state.repositories.get(id).is_some_and(|images| !images.is_empty()) => {
                blocker = Some(format!(
                    "The repository with name '{id}' cannot be deleted because it still contains images"
                ));
            }
            _ => {}
        }
    }
    if blocker.is_none() {
        blocker = stack.exports.iter().find_map(|export| {
            state
                .stacks
                .iter()
                .find(|(other, s)| other.as_str() != name && s.imports.contains(export))
                .map(|(other, _)| format!("Export {export} cannot be deleted as it is in use by {other}"))
        });
    }

    if let Some(reason) = blocker {
        stack_event(state, name, status::DELETE_FAILED, Some(reason.clone()));
        if let Some(local) = state.stacks.get_mut(name) {
            local.description.status = status::DELETE_FAILED.to_string();
            local.description.status_reason = Some(reason);
            local.pending = None;
        }
        return;
    }

    release_resources(state, name, &stack.resources);
    for export in &stack.exports {
        state.exports.remove(export);
    }
    state.stacks.remove(name);
}

/// Container names declared by the task definitions of a stack.
fn container_names(evaluation: &Evaluation) -> Vec<String> {
    evaluation
        .resources
        .iter()
        .filter(|(_, resource_type, _)| resource_type == RESOURCE_TYPE_TASK_DEFINITION)
        .filter_map(|(logical_id, _, _)| evaluation.properties.get(logical_id))
        .filter_map(|properties| properties.get("ContainerDefinitions").and_then(Value::as_sequence))
        .flatten()
        .filter_map(|definition| definition.get("Name").and_then(Value::as_str).map(str::to_string))
        .collect()
}

pub(crate) fn task_arn(state: &mut CloudState) -> String {
    let id = state.next_id();
    format!("arn:aws:ecs:{REGION}:{ACCOUNT_ID}:task/{id:032x}")
}

fn source_stage(description: &StackDescription) -> ActionState {
    let parameter = |key: &str| description.parameters.get(key).cloned().unwrap_or_default();
    let repo = parameter("SourceRepo");
    let branch = match parameter("SourceBranch") {
        branch if branch.is_empty() => "master".to_string(),
        branch => branch,
    };
    let entity_url = match parameter("SourceProvider").as_str() {
        "GitHub" => format!("https://github.com/{repo}/tree/{branch}"),
        "S3" => format!("https://s3.console.aws.amazon.com/s3/buckets/{}", parameter("SourceBucket")),
        _ => format!("https://{REGION}.console.aws.amazon.com/codecommit/home#/repository/{repo}/browse/{branch}/--/"),
    };
    ActionState {
        name: "Source".to_string(),
        status: Some("Succeeded".to_string()),
        error_details: None,
        revision_id: Some(hex::encode(Sha1::digest(description.stack_id.as_bytes()))),
        entity_url: Some(entity_url),
        last_status_change: Some(Utc::now()),
    }
}

fn pipeline_stages(description: &StackDescription) -> Vec<StageState> {
    let succeeded = |name: &str| ActionState {
        name: name.to_string(),
        status: Some("Succeeded".to_string()),
        last_status_change: Some(Utc::now()),
        ..Default::default()
    };
    let enabled = |env_key: &str, flag_key: &str| {
        description.parameters.get(env_key).is_some_and(|env| !env.is_empty())
            && description.parameters.get(flag_key).is_none_or(|flag| flag != "false")
    };

    let mut stages = vec![
        StageState {
            name: "Source".to_string(),
            actions: vec![source_stage(description)],
        },
        StageState {
            name: "Build".to_string(),
            actions: vec![succeeded("Artifact"), succeeded("Image")],
        },
    ];
    if enabled("AcptEnv", "EnableAcptStage") {
        stages.push(StageState {
            name: "Acceptance".to_string(),
            actions: vec![succeeded("Deploy"), succeeded("Test")],
        });
    }
    if enabled("ProdEnv", "EnableProdStage") {
        stages.push(StageState {
            name: "Production".to_string(),
            actions: vec![succeeded("Approve"), succeeded("Deploy"), succeeded("Test")],
        });
    }
    stages
}

/// Create the runtime objects behind the resources of a settled stack.
fn apply_resources(state: &mut CloudState, stack_name: &str, description: &StackDescription, evaluation: &Evaluation) {
    let owner = stack_name.to_string();
    let cluster_of_stack = evaluation
        .resources
        .iter()
        .find(|(_, resource_type, _)| resource_type == RESOURCE_TYPE_CLUSTER)
        .map(|(_, _, physical_id)| physical_id.clone());

    state.listener_rules.values_mut().for_each(|rules| rules.retain(|(_, o)| o != &owner));

    for (logical_id, resource_type, physical_id) in &evaluation.resources {
        let properties = evaluation.properties.get(logical_id);
        match resource_type.as_str() {
            RESOURCE_TYPE_BUCKET => {
                state.buckets.entry(physical_id.clone()).or_default();
                state.bucket_owners.insert(physical_id.clone(), owner.clone());
            }
            RESOURCE_TYPE_REPOSITORY => {
                state.repositories.entry(physical_id.clone()).or_default();
                state.repository_owners.insert(physical_id.clone(), owner.clone());
            }
            RESOURCE_TYPE_SERVICE => {
                let cluster = property_string(properties, "Cluster");
                let desired_count = property_string(properties, "DesiredCount").parse().unwrap_or(1);
                let names = container_names(evaluation);
                let mut service = state
                    .services
                    .iter()
                    .position(|s| &s.name == physical_id)
                    .map(|index| state.services.remove(index))
                    .unwrap_or(LocalService {
                        cluster: cluster.clone(),
                        name: physical_id.clone(),
                        container_names: Vec::new(),
                        desired_count,
                        tasks: Vec::new(),
                        stack: owner.clone(),
                    });
                service.cluster = cluster.clone();
                service.container_names = names;
                service.desired_count = desired_count;
                service.tasks.truncate(desired_count as usize);
                while service.tasks.len() < desired_count as usize {
                    let arn = task_arn(state);
                    service.tasks.push(arn);
                }
                state.services.push(service);
            }
            RESOURCE_TYPE_LISTENER_RULE => {
                let listener = property_string(properties, "ListenerArn");
                if listener.is_empty() {
                    continue;
                }
                let rule = ListenerRule {
                    arn: physical_id.clone(),
                    priority: property_string(properties, "Priority").parse().ok(),
                };
                state.listener_rules.entry(listener).or_default().push((rule, owner.clone()));
            }
            RESOURCE_TYPE_LAUNCH_CONFIGURATION => {
                let Some(cluster) = &cluster_of_stack else {
                    continue;
                };
                let count: usize = description
                    .parameters
                    .get("DesiredCapacity")
                    .and_then(|c| c.parse().ok())
                    .unwrap_or(1);
                let instance_type = property_string(properties, "InstanceType");
                let instances = (0..count)
                    .map(|index| ContainerInstance {
                        instance_id: format!("i-{:017x}", index + 1),
                        instance_type: instance_type.clone(),
                        availability_zone: state
                            .availability_zones
                            .get(index % state.availability_zones.len().max(1))
                            .cloned()
                            .unwrap_or_default(),
                        private_ip: format!("10.0.{}.{}", index / 250, index % 250 + 4),
                        status: "ACTIVE".to_string(),
                        agent_connected: true,
                        running_tasks: 0,
                        pending_tasks: 0,
                        remaining_cpu: 1024,
                        remaining_memory: 995,
                    })
                    .collect();
                state.instances.insert(cluster.clone(), (instances, owner.clone()));
            }
            RESOURCE_TYPE_PIPELINE => {
                state.pipelines.insert(
                    physical_id.clone(),
                    LocalPipeline {
                        stack: owner.clone(),
                        stages: pipeline_stages(description),
                    },
                );
            }
            RESOURCE_TYPE_PRODUCT => {
                if state.products.contains_key(physical_id) {
                    continue;
                }
                let initial = property(properties, "ProvisioningArtifactParameters")
                    .and_then(Value::as_sequence)
                    .and_then(|artifacts| artifacts.first())
                    .and_then(|artifact| artifact.get("Name"))
                    .and_then(Value::as_str)
                    .filter(|name| !name.is_empty())
                    .map(str::to_string);
                let mut artifacts = Vec::new();
                if let Some(name) = initial {
                    let id = state.next_id();
                    artifacts.push(ProvisioningArtifact {
                        id: format!("pa-{id:012}"),
                        name,
                        active: true,
                    });
                }
                state.products.insert(
                    physical_id.clone(),
                    LocalProduct {
                        stack: owner.clone(),
                        artifacts,
                        provisioned: Vec::new(),
                    },
                );
            }
            _ => {}
        }
    }
}

/// Remove the runtime objects behind `resources` of `stack_name`.
fn release_resources(state: &mut CloudState, stack_name: &str, resources: &[StackResource]) {
    for resource in resources {
        let id = &resource.physical_resource_id;
        match resource.resource_type.as_str() {
            RESOURCE_TYPE_BUCKET => {
                state.buckets.remove(id);
                state.bucket_owners.remove(id);
            }
            RESOURCE_TYPE_REPOSITORY => {
                state.repositories.remove(id);
                state.repository_owners.remove(id);
            }
            RESOURCE_TYPE_SERVICE => state.services.retain(|service| &service.name != id),
            RESOURCE_TYPE_LISTENER_RULE => state
                .listener_rules
                .values_mut()
                .for_each(|rules| rules.retain(|(rule, _)| &rule.arn != id)),
            RESOURCE_TYPE_LAUNCH_CONFIGURATION => state.instances.retain(|_, (_, owner)| owner != stack_name),
            RESOURCE_TYPE_PIPELINE => {
                state.pipelines.remove(id);
            }
            RESOURCE_TYPE_PRODUCT => {
                state.products.remove(id);
            }
            _ => {}
        }
    }
}

#[async_trait]
impl ProvisioningApi for LocalCloud {
    async fn describe_stack(&self, name: &str) -> ApiResult<Option<StackDescription>> {
        let mut state = self.lock();
        if self.advance(&mut state, name) {
            self.persist(&state);
        }
        Ok(state.stacks.get(name).map(|stack| stack.description.clone()))
    }

    async fn describe_stacks_page(&self, next_token: Option<String>) -> ApiResult<StacksPage> {
        let state = self.lock();
        let start: usize = match next_token {
            Some(token) => token
                .parse()
                .map_err(|_| ApiError::validation(format!("Invalid NextToken {token}")))?,
            None => 0,
        };
        let stacks: Vec<StackDescription> = state
            .stacks
            .values()
            .skip(start)
            .take(STACKS_PAGE_SIZE)
            .map(|stack| stack.description.clone())
            .collect();
        let end = start + stacks.len();
        Ok(StacksPage {
            stacks,
            next_token: (end < state.stacks.len()).then(|| end.to_string()),
        })
    }

    async fn describe_stack_events(&self, name: &str) -> ApiResult<Vec<StackEvent>> {
        let state = self.lock();
        state
            .stacks
            .get(name)
            .map(|stack| stack.events.clone())
            .ok_or_else(|| missing_stack(name))
    }

    async fn describe_stack_resources(&self, name: &str) -> ApiResult<Vec<StackResource>> {
        let state = self.lock();
        state
            .stacks
            .get(name)
            .map(|stack| stack.resources.clone())
            .ok_or_else(|| missing_stack(name))
    }

    async fn create_stack(&self, input: StackInput) -> ApiResult<String> {
        let mut state = self.lock();
        let name = input.stack_name.clone();
        if state.stacks.contains_key(&name) {
            return Err(ApiError::new("AlreadyExistsException", format!("Stack [{name}] already exists")));
        }
        let template = Template::parse(&input.template_body)?;
        let parameters = template.resolve_parameters(&input.parameters, &BTreeMap::new());

        let sequence = state.next_id();
        let stack_id = format!("arn:aws:cloudformation:{REGION}:{ACCOUNT_ID}:stack/{name}/{sequence:08x}-0000-4000-8000-{sequence:012x}");
        let mut stack = LocalStack {
            description: StackDescription {
                stack_id: stack_id.clone(),
                stack_name: name.clone(),
                status: status::CREATE_IN_PROGRESS.to_string(),
                status_reason: Some("User Initiated".to_string()),
                creation_time: Utc::now(),
                last_updated_time: None,
                tags: input.tags,
                outputs: BTreeMap::new(),
                parameters,
                termination_protection: false,
            },
            template_body: input.template_body,
            policy_body: input.policy_body,
            role_arn: input.role_arn,
            resources: Vec::new(),
            events: Vec::new(),
            exports: BTreeSet::new(),
            imports: BTreeSet::new(),
            pending: self.pending(OperationKind::Create),
            previous: None,
        };
        push_event(
            &mut stack,
            sequence,
            &name,
            "AWS::CloudFormation::Stack",
            status::CREATE_IN_PROGRESS,
            Some("User Initiated".to_string()),
        );
        state.stacks.insert(name.clone(), stack);
        state.record_write(format!("CreateStack {name}"));
        self.persist(&state);
        Ok(stack_id)
    }

    async fn update_stack(&self, input: StackInput) -> ApiResult<()> {
        let mut state = self.lock();
        let name = input.stack_name.clone();
        let Some(stack) = state.stacks.get(&name) else {
            return Err(missing_stack(&name));
        };
        if !status::is_final(&stack.description.status) {
            return Err(ApiError::validation(format!(
                "Stack:{} is in {} state and can not be updated.",
                stack.description.stack_id, stack.description.status
            )));
        }
        let template = Template::parse(&input.template_body)?;
        let parameters = template.resolve_parameters(&input.parameters, &stack.description.parameters);
        if stack.template_body == input.template_body
            && stack.description.parameters == parameters
            && stack.description.tags == input.tags
        {
            return Err(ApiError::validation(NO_UPDATES_MESSAGE));
        }

        let sequence = state.next_id();
        let Some(stack) = state.stacks.get_mut(&name) else {
            return Err(missing_stack(&name));
        };
        stack.previous = Some(PreviousInputs {
            template_body: std::mem::replace(&mut stack.template_body, input.template_body),
            parameters: std::mem::replace(&mut stack.description.parameters, parameters),
            tags: std::mem::replace(&mut stack.description.tags, input.tags),
        });
        if input.policy_body.is_some() {
            stack.policy_body = input.policy_body;
        }
        if input.role_arn.is_some() {
            stack.role_arn = input.role_arn;
        }
        stack.description.status = status::UPDATE_IN_PROGRESS.to_string();
        stack.description.status_reason = None;
        stack.description.last_updated_time = Some(Utc::now());
        stack.pending = self.pending(OperationKind::Update);
        push_event(stack, sequence, &name, "AWS::CloudFormation::Stack", status::UPDATE_IN_PROGRESS, None);
        state.record_write(format!("UpdateStack {name}"));
        self.persist(&state);
        Ok(())
    }

    async fn delete_stack(&self, name: &str) -> ApiResult<()> {
        let mut state = self.lock();
        let pending = self.pending(OperationKind::Delete);
        let sequence = state.next_id();
        let Some(stack) = state.stacks.get_mut(name) else {
            return Ok(());
        };
        if stack.description.termination_protection {
            return Err(ApiError::validation(format!(
                "Stack [{name}] cannot be deleted while TerminationProtection is enabled"
            )));
        }
        if stack.description.status == status::DELETE_IN_PROGRESS {
            return Ok(());
        }
        stack.description.status = status::DELETE_IN_PROGRESS.to_string();
        stack.description.status_reason = Some("User Initiated".to_string());
        stack.pending = pending;
        push_event(stack, sequence, name, "AWS::CloudFormation::Stack", status::DELETE_IN_PROGRESS, None);
        state.record_write(format!("DeleteStack {name}"));
        self.persist(&state);
        Ok(())
    }

    async fn wait_until_stack_exists(&self, name: &str) -> ApiResult<()> {
        let state = self.lock();
        if state.stacks.contains_key(name) {
            Ok(())
        } else {
            Err(ApiError::new("ResourceNotReady", format!("stack {name} never appeared")))
        }
    }

    async fn update_termination_protection(&self, name: &str, enabled: bool) -> ApiResult<()> {
        let mut state = self.lock();
        let stack = state.stacks.get_mut(name).ok_or_else(|| missing_stack(name))?;
        if stack.description.termination_protection == enabled {
            return Ok(());
        }
        stack.description.termination_protection = enabled;
        state.record_write(format!("UpdateTerminationProtection {name} {enabled}"));
        self.persist(&state);
        Ok(())
    }

    async fn set_stack_policy(&self, name: &str, policy_body: &str) -> ApiResult<()> {
        let mut state = self.lock();
        let stack = state.stacks.get_mut(name).ok_or_else(|| missing_stack(name))?;
        stack.policy_body = Some(policy_body.to_string());
        state.record_write(format!("SetStackPolicy {name}"));
        self.persist(&state);
        Ok(())
    }

    async fn describe_images(&self, owner: &str, name_pattern: &str) -> ApiResult<Vec<ImageDescription>> {
        if owner != IMAGE_OWNER {
            return Ok(Vec::new());
        }
        let state = self.lock();
        Ok(state
            .images
            .iter()
            .filter(|image| glob_match(name_pattern, &image.name))
            .cloned()
            .collect())
    }

    async fn describe_availability_zones(&self) -> ApiResult<Vec<String>> {
        Ok(self.lock().availability_zones.clone())
    }
}
