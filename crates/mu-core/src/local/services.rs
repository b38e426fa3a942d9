//! Everything of the local cloud that is not a stack.
use std::collections::BTreeMap;
use std::io;
use std::path::Path;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use md5::{Digest, Md5};

use crate::artifact::{ObjectPage, ObjectStoreApi, StoredObject};
use crate::kernel::error::{Error, Result};
use crate::local::provisioning::{RESOURCE_TYPE_CLUSTER, task_arn};
use crate::local::template::{ACCOUNT_ID, REGION};
use crate::local::{CloudState, LocalCloud, LocalTask};
use crate::param::{Parameter, ParameterStoreApi};
use crate::provider::catalog::{CatalogApi, ProvisionedProduct, ProvisioningArtifact};
use crate::provider::cluster::{ClusterInstanceLister, ContainerInstance};
use crate::provider::elb::{ElbRuleLister, ListenerRule};
use crate::provider::error::{ApiError, ApiResult, codes};
use crate::provider::image::ImageBuilder;
use crate::provider::kubernetes::{KubernetesResourceManager, parse_manifest};
use crate::provider::logs::{LogEventsPage, LogsApi};
use crate::provider::pipeline::{PipelineStateApi, StageState};
use crate::provider::repository::{RegistryApi, RegistryAuth};
use crate::provider::tasks::{ContainerTaskApi, RunTaskRequest, RunTaskResult, TaskDescription};

const LOG_EVENTS_PAGE_SIZE: usize = 100;
const AUTHORIZATION: &str = "AWS:local-token";

fn cluster_exists(state: &CloudState, cluster: &str) -> bool {
    state.stacks.values().any(|stack| {
        stack
            .resources
            .iter()
            .any(|r| r.resource_type == RESOURCE_TYPE_CLUSTER && r.physical_resource_id == cluster)
    })
}

fn cluster_not_found(cluster: &str) -> ApiError {
    ApiError::new("ClusterNotFoundException", format!("Cluster not found: {cluster}"))
}

fn container_instance_arn(instance_id: &str) -> String {
    format!("arn:aws:ecs:{REGION}:{ACCOUNT_ID}:container-instance/{instance_id}")
}

/// Instance a task lands on, spread across the cluster's hosts.
fn place_task(state: &CloudState, cluster: &str, slot: usize) -> String {
    state
        .instances
        .get(cluster)
        .and_then(|(instances, _)| instances.get(slot % instances.len().max(1)))
        .map(|instance| container_instance_arn(&instance.instance_id))
        .unwrap_or_default()
}

fn object_etag(body: &[u8]) -> String {
    hex::encode(Md5::digest(body))
}

#[async_trait]
impl ParameterStoreApi for LocalCloud {
    async fn put_parameter(&self, name: &str, value: &str, _key_id: &str) -> ApiResult<i64> {
        let mut state = self.lock();
        let version = state.parameters.get(name).map_or(1, |p| p.version + 1);
        state.parameters.insert(
            name.to_string(),
            Parameter {
                name: name.to_string(),
                value: value.to_string(),
                version,
            },
        );
        state.record_write(format!("PutParameter {name}"));
        self.persist(&state);
        Ok(version)
    }

    async fn get_parameter(&self, name: &str) -> ApiResult<Parameter> {
        self.lock()
            .parameters
            .get(name)
            .cloned()
            .ok_or_else(|| ApiError::new(codes::PARAMETER_NOT_FOUND, format!("Parameter {name} not found.")))
    }

    async fn delete_parameter(&self, name: &str) -> ApiResult<()> {
        let mut state = self.lock();
        if state.parameters.remove(name).is_none() {
            return Err(ApiError::new(codes::PARAMETER_NOT_FOUND, format!("Parameter {name} not found.")));
        }
        state.record_write(format!("DeleteParameter {name}"));
        self.persist(&state);
        Ok(())
    }
}

#[async_trait]
impl ObjectStoreApi for LocalCloud {
    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>, _key_id: Option<&str>) -> ApiResult<String> {
        let mut state = self.lock();
        let objects = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| ApiError::new(codes::NO_SUCH_BUCKET, format!("The specified bucket does not exist: {bucket}")))?;
        let etag = object_etag(&body);
        objects.insert(
            key.to_string(),
            StoredObject {
                body,
                etag: etag.clone(),
            },
        );
        state.record_write(format!("PutObject s3://{bucket}/{key}"));
        self.persist(&state);
        Ok(etag)
    }

    async fn get_object(&self, bucket: &str, key: &str, if_none_match: Option<&str>) -> ApiResult<StoredObject> {
        let state = self.lock();
        let objects = state
            .buckets
            .get(bucket)
            .ok_or_else(|| ApiError::new(codes::NO_SUCH_BUCKET, format!("The specified bucket does not exist: {bucket}")))?;
        let object = objects
            .get(key)
            .ok_or_else(|| ApiError::new(codes::NO_SUCH_KEY, format!("The specified key does not exist: {key}")))?;
        if if_none_match.is_some_and(|etag| etag == object.etag) {
            return Err(ApiError::new(codes::NOT_MODIFIED, "Not Modified"));
        }
        Ok(object.clone())
    }

    async fn list_objects(&self, bucket: &str, next_token: Option<String>, max_keys: usize) -> ApiResult<ObjectPage> {
        let state = self.lock();
        let objects = state
            .buckets
            .get(bucket)
            .ok_or_else(|| ApiError::new(codes::NO_SUCH_BUCKET, format!("The specified bucket does not exist: {bucket}")))?;
        let after = next_token.unwrap_or_default();
        let keys: Vec<String> = objects
            .keys()
            .filter(|key| after.is_empty() || key.as_str() > after.as_str())
            .take(max_keys.max(1))
            .cloned()
            .collect();
        let next_token = keys
            .last()
            .filter(|last| objects.keys().any(|key| key > *last))
            .cloned();
        Ok(ObjectPage { keys, next_token })
    }

    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> ApiResult<()> {
        let mut state = self.lock();
        let objects = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| ApiError::new(codes::NO_SUCH_BUCKET, format!("The specified bucket does not exist: {bucket}")))?;
        for key in keys {
            objects.remove(key);
        }
        state.record_write(format!("DeleteObjects {bucket} {}", keys.len()));
        self.persist(&state);
        Ok(())
    }
}

#[async_trait]
impl RegistryApi for LocalCloud {
    async fn list_image_ids(&self, repository: &str) -> ApiResult<Vec<String>> {
        self.lock()
            .repositories
            .get(repository)
            .map(|images| images.iter().cloned().collect())
            .ok_or_else(|| {
                ApiError::new(
                    codes::REPOSITORY_NOT_FOUND,
                    format!("The repository with name '{repository}' does not exist"),
                )
            })
    }

    async fn batch_delete_images(&self, repository: &str, image_ids: &[String]) -> ApiResult<()> {
        let mut state = self.lock();
        let images = state.repositories.get_mut(repository).ok_or_else(|| {
            ApiError::new(
                codes::REPOSITORY_NOT_FOUND,
                format!("The repository with name '{repository}' does not exist"),
            )
        })?;
        for id in image_ids {
            images.remove(id);
        }
        state.record_write(format!("BatchDeleteImage {repository} {}", image_ids.len()));
        self.persist(&state);
        Ok(())
    }

    async fn get_authorization_token(&self) -> ApiResult<String> {
        Ok(STANDARD.encode(AUTHORIZATION))
    }
}

#[async_trait]
impl ContainerTaskApi for LocalCloud {
    async fn run_task(&self, request: RunTaskRequest) -> ApiResult<RunTaskResult> {
        let mut state = self.lock();
        if !cluster_exists(&state, &request.cluster) {
            return Err(cluster_not_found(&request.cluster));
        }
        if request.task_definition.is_empty() {
            return Err(ApiError::new("InvalidParameterException", "TaskDefinition can not be blank."));
        }

        let mut result = RunTaskResult::default();
        for slot in 0..request.count.max(1) as usize {
            let arn = task_arn(&mut state);
            let container_instance_arn = place_task(&state, &request.cluster, slot);
            state.tasks.push(LocalTask {
                arn: arn.clone(),
                cluster: request.cluster.clone(),
                container_names: vec![request.container_name.clone()],
                container_instance_arn,
                command: request.command.clone(),
            });
            result.task_arns.push(arn);
        }
        state.record_write(format!("RunTask {} {}", request.cluster, request.task_definition));
        self.persist(&state);
        Ok(result)
    }

    async fn list_services(&self, cluster: &str) -> ApiResult<Vec<String>> {
        let state = self.lock();
        if !cluster_exists(&state, cluster) {
            return Err(cluster_not_found(cluster));
        }
        Ok(state
            .services
            .iter()
            .filter(|service| service.cluster == cluster)
            .map(|service| service.name.clone())
            .collect())
    }

    /// Running tasks of a service. Stopped service tasks are replaced, as the scheduler would.
    async fn list_tasks(&self, cluster: &str, service: &str) -> ApiResult<Vec<String>> {
        let mut state = self.lock();
        let Some(index) = state
            .services
            .iter()
            .position(|s| s.cluster == cluster && s.name == service)
        else {
            return Err(ApiError::new("ServiceNotFoundException", format!("Service not found: {service}")));
        };

        let mut replaced = false;
        while state.services[index].tasks.len() < state.services[index].desired_count as usize {
            let arn = task_arn(&mut state);
            state.services[index].tasks.push(arn);
            replaced = true;
        }
        if replaced {
            self.persist(&state);
        }
        Ok(state.services[index].tasks.clone())
    }

    async fn describe_tasks(&self, cluster: &str, task_arns: &[String]) -> ApiResult<Vec<TaskDescription>> {
        let state = self.lock();
        let mut descriptions = Vec::new();
        for arn in task_arns {
            let service_task = state
                .services
                .iter()
                .filter(|service| service.cluster == cluster)
                .find_map(|service| {
                    service
                        .tasks
                        .iter()
                        .position(|task| task == arn)
                        .map(|slot| (service.container_names.clone(), place_task(&state, cluster, slot)))
                });
            let adhoc_task = || {
                state
                    .tasks
                    .iter()
                    .find(|task| task.cluster == cluster && &task.arn == arn)
                    .map(|task| (task.container_names.clone(), task.container_instance_arn.clone()))
            };
            if let Some((container_names, container_instance_arn)) = service_task.or_else(adhoc_task) {
                descriptions.push(TaskDescription {
                    task_arn: arn.clone(),
                    container_instance_arn,
                    container_names,
                    last_status: "RUNNING".to_string(),
                });
            }
        }
        Ok(descriptions)
    }

    async fn describe_container_instance(&self, cluster: &str, container_instance_arn: &str) -> ApiResult<String> {
        let state = self.lock();
        let instance_id = container_instance_arn.rsplit('/').next().unwrap_or_default();
        state
            .instances
            .get(cluster)
            .and_then(|(instances, _)| instances.iter().find(|i| i.instance_id == instance_id))
            .map(|instance| instance.instance_id.clone())
            .ok_or_else(|| {
                ApiError::new(
                    codes::RESOURCE_NOT_FOUND,
                    format!("Container instance {container_instance_arn} not found"),
                )
            })
    }

    async fn stop_task(&self, cluster: &str, task: &str) -> ApiResult<()> {
        let mut state = self.lock();
        let matches = |arn: &str| arn == task || arn.rsplit('/').next() == Some(task);
        let before = state.tasks.len()
            + state
                .services
                .iter()
                .map(|service| service.tasks.len())
                .sum::<usize>();
        state.tasks.retain(|t| !(t.cluster == cluster && matches(&t.arn)));
        for service in state.services.iter_mut().filter(|service| service.cluster == cluster) {
            service.tasks.retain(|arn| !matches(arn));
        }
        let after = state.tasks.len()
            + state
                .services
                .iter()
                .map(|service| service.tasks.len())
                .sum::<usize>();
        if before == after {
            return Err(ApiError::new("InvalidParameterException", "The referenced task was not found."));
        }
        state.record_write(format!("StopTask {cluster} {task}"));
        self.persist(&state);
        Ok(())
    }
}

#[async_trait]
impl LogsApi for LocalCloud {
    async fn filter_log_events(
        &self,
        group: &str,
        start_time: i64,
        filter: &str,
        next_token: Option<String>,
    ) -> ApiResult<LogEventsPage> {
        let state = self.lock();
        let events = state.log_groups.get(group).ok_or_else(|| {
            ApiError::new(codes::RESOURCE_NOT_FOUND, format!("The specified log group does not exist: {group}"))
        })?;
        let start: usize = next_token.and_then(|token| token.parse().ok()).unwrap_or(0);

        let mut matching: Vec<_> = events
            .iter()
            .filter(|event| event.timestamp >= start_time)
            .filter(|event| filter.is_empty() || event.message.contains(filter))
            .cloned()
            .collect();
        matching.sort_by_key(|event| event.timestamp);

        let page: Vec<_> = matching.iter().skip(start).take(LOG_EVENTS_PAGE_SIZE).cloned().collect();
        let end = start + page.len();
        Ok(LogEventsPage {
            events: page,
            next_token: (end < matching.len()).then(|| end.to_string()),
        })
    }
}

#[async_trait]
impl PipelineStateApi for LocalCloud {
    async fn get_pipeline_state(&self, pipeline_name: &str) -> ApiResult<Vec<StageState>> {
        self.lock()
            .pipelines
            .get(pipeline_name)
            .map(|pipeline| pipeline.stages.clone())
            .ok_or_else(|| {
                ApiError::new(
                    "PipelineNotFoundException",
                    format!("Account '{ACCOUNT_ID}' does not have a pipeline with name '{pipeline_name}'"),
                )
            })
    }
}

#[async_trait]
impl ElbRuleLister for LocalCloud {
    async fn list_rules(&self, listener_arn: &str) -> Result<Vec<ListenerRule>> {
        Ok(self.listener_rules(listener_arn))
    }
}

#[async_trait]
impl ClusterInstanceLister for LocalCloud {
    async fn list_instances(&self, cluster: &str) -> Result<Vec<ContainerInstance>> {
        let state = self.lock();
        if !cluster_exists(&state, cluster) {
            return Err(Error::provider("ListContainerInstances", cluster, cluster_not_found(cluster)));
        }
        Ok(state
            .instances
            .get(cluster)
            .map(|(instances, _)| instances.clone())
            .unwrap_or_default())
    }
}

/// Key of a resource in a cluster; namespaces key under themselves so deleting one removes it too.
fn kubernetes_key(namespace: Option<&str>, kind: &str, name: &str) -> String {
    let namespace = match (kind, namespace) {
        ("Namespace", _) => name,
        (_, Some(namespace)) => namespace,
        (_, None) => "default",
    };
    format!("{namespace}/{kind}/{name}")
}

#[async_trait]
impl KubernetesResourceManager for LocalCloud {
    async fn upsert_resources(&self, cluster: &str, manifest: &str) -> Result<()> {
        let resources = parse_manifest(manifest)?;
        let mut state = self.lock();
        let mut applied = BTreeMap::new();
        for resource in resources {
            let key = kubernetes_key(resource.namespace.as_deref(), &resource.kind, &resource.name);
            let body =
                serde_yaml::to_string(&resource.body).map_err(|e| Error::serialization("kubernetes resource", e))?;
            applied.insert(key, body);
        }
        let count = applied.len();
        state.kubernetes.entry(cluster.to_string()).or_default().extend(applied);
        state.record_write(format!("ApplyManifest {cluster} {count}"));
        self.persist(&state);
        Ok(())
    }

    async fn delete_namespace(&self, cluster: &str, namespace: &str) -> Result<()> {
        let mut state = self.lock();
        let prefix = format!("{namespace}/");
        if let Some(resources) = state.kubernetes.get_mut(cluster) {
            resources.retain(|key, _| !key.starts_with(&prefix));
        }
        state.record_write(format!("DeleteNamespace {cluster} {namespace}"));
        self.persist(&state);
        Ok(())
    }
}

fn product_not_found(product_id: &str) -> ApiError {
    ApiError::new(codes::RESOURCE_NOT_FOUND, format!("Product {product_id} not found"))
}

#[async_trait]
impl CatalogApi for LocalCloud {
    async fn list_provisioning_artifacts(&self, product_id: &str) -> ApiResult<Vec<ProvisioningArtifact>> {
        self.lock()
            .products
            .get(product_id)
            .map(|product| product.artifacts.clone())
            .ok_or_else(|| product_not_found(product_id))
    }

    async fn create_provisioning_artifact(&self, product_id: &str, name: &str, template_url: &str) -> ApiResult<()> {
        if template_url.is_empty() {
            return Err(ApiError::validation("LoadTemplateFromURL must not be empty"));
        }
        let mut state = self.lock();
        let id = state.next_id();
        let product = state
            .products
            .get_mut(product_id)
            .ok_or_else(|| product_not_found(product_id))?;
        product.artifacts.push(ProvisioningArtifact {
            id: format!("pa-{id:012}"),
            name: name.to_string(),
            active: true,
        });
        state.record_write(format!("CreateProvisioningArtifact {product_id} {name}"));
        self.persist(&state);
        Ok(())
    }

    async fn update_provisioning_artifact(&self, product_id: &str, artifact_id: &str, active: bool) -> ApiResult<()> {
        let mut state = self.lock();
        let product = state
            .products
            .get_mut(product_id)
            .ok_or_else(|| product_not_found(product_id))?;
        let artifact = product
            .artifacts
            .iter_mut()
            .find(|artifact| artifact.id == artifact_id)
            .ok_or_else(|| ApiError::new(codes::RESOURCE_NOT_FOUND, format!("Artifact {artifact_id} not found")))?;
        artifact.active = active;
        state.record_write(format!("UpdateProvisioningArtifact {product_id} {artifact_id} {active}"));
        self.persist(&state);
        Ok(())
    }

    async fn search_provisioned_products(&self, product_id: &str) -> ApiResult<Vec<ProvisionedProduct>> {
        self.lock()
            .products
            .get(product_id)
            .map(|product| product.provisioned.clone())
            .ok_or_else(|| product_not_found(product_id))
    }

    async fn terminate_provisioned_product(&self, provisioned_product_id: &str) -> ApiResult<()> {
        let mut state = self.lock();
        let mut found = false;
        for product in state.products.values_mut() {
            let before = product.provisioned.len();
            product.provisioned.retain(|p| p.id != provisioned_product_id);
            found |= product.provisioned.len() != before;
        }
        if !found {
            return Err(ApiError::new(
                codes::RESOURCE_NOT_FOUND,
                format!("Provisioned product {provisioned_product_id} not found"),
            ));
        }
        state.record_write(format!("TerminateProvisionedProduct {provisioned_product_id}"));
        self.persist(&state);
        Ok(())
    }
}

/// Split `registry/repository:tag`; the tag defaults to `latest`.
fn split_image(image: &str) -> Option<(&str, &str, &str)> {
    let (registry, rest) = image.split_once('/')?;
    let (repository, tag) = match rest.rsplit_once(':') {
        Some((repository, tag)) => (repository, tag),
        None => (rest, "latest"),
    };
    Some((registry, repository, tag))
}

#[async_trait]
impl ImageBuilder for LocalCloud {
    async fn build_image(&self, context_dir: &Path, dockerfile: &str, tags: &[String]) -> Result<()> {
        let path = context_dir.join(dockerfile);
        if !path.is_file() {
            let err = io::Error::new(io::ErrorKind::NotFound, "Dockerfile not found");
            return Err(Error::io(err, "read", &path));
        }
        let mut state = self.lock();
        state.built_images.extend(tags.iter().cloned());
        state.record_write(format!("BuildImage {}", tags.join(",")));
        self.persist(&state);
        Ok(())
    }

    async fn push_image(&self, image: &str, auth: &RegistryAuth) -> Result<()> {
        let (registry, repository, tag) =
            split_image(image).ok_or_else(|| Error::parse("image", image, "expected registry/repository:tag"))?;
        if format!("{}:{}", auth.username, auth.password) != AUTHORIZATION || auth.server_address != registry {
            return Err(Error::provider(
                "PushImage",
                image,
                ApiError::new(codes::ACCESS_DENIED, format!("no basic auth credentials for {registry}")),
            ));
        }

        let mut state = self.lock();
        if !state.built_images.iter().any(|built| built == image) {
            return Err(Error::Other(format!("An image does not exist locally with the tag: {image}")));
        }
        let images = state.repositories.get_mut(repository).ok_or_else(|| {
            Error::provider(
                "PushImage",
                image,
                ApiError::new(
                    codes::REPOSITORY_NOT_FOUND,
                    format!("The repository with name '{repository}' does not exist"),
                ),
            )
        })?;
        images.insert(tag.to_string());
        state.pushed_images.push(image.to_string());
        state.record_write(format!("PushImage {image}"));
        self.persist(&state);
        Ok(())
    }
}
