//! Ad-hoc and running container tasks of a service.
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::kernel::error::{Error, Result};
use crate::provider::error::ApiResult;
use crate::stack::{StackManager, StackType, stack_name};

const TASK_DEFINITION_OUTPUT: &str = "MicroserviceTaskDefinitionArn";
const CLUSTER_OUTPUT: &str = "EcsCluster";
const SERVICE_NAME_PARAMETER: &str = "ServiceName";

/// A command to run in, or a task running for, a service in an environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub name: String,
    pub environment: String,
    pub service: String,
    /// Overrides the task definition of the deployed service when non-empty.
    pub task_definition: String,
    /// Overrides the cluster of the deployed service when non-empty.
    pub cluster: String,
    pub command: Vec<String>,
    pub containers: Vec<Container>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub name: String,
    pub instance: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTaskRequest {
    pub cluster: String,
    pub task_definition: String,
    pub container_name: String,
    pub command: Vec<String>,
    pub count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTaskResult {
    pub task_arns: Vec<String>,
    pub failures: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDescription {
    pub task_arn: String,
    pub container_instance_arn: String,
    pub container_names: Vec<String>,
    pub last_status: String,
}

/// Raw container orchestration API.
#[async_trait]
pub trait ContainerTaskApi: Send + Sync {
    async fn run_task(&self, request: RunTaskRequest) -> ApiResult<RunTaskResult>;

    async fn list_services(&self, cluster: &str) -> ApiResult<Vec<String>>;

    async fn list_tasks(&self, cluster: &str, service: &str) -> ApiResult<Vec<String>>;

    async fn describe_tasks(&self, cluster: &str, task_arns: &[String]) -> ApiResult<Vec<TaskDescription>>;

    /// Host instance id behind a container instance.
    async fn describe_container_instance(&self, cluster: &str, container_instance_arn: &str) -> ApiResult<String>;

    async fn stop_task(&self, cluster: &str, task: &str) -> ApiResult<()>;
}

#[async_trait]
pub trait TaskManager: Send + Sync {
    async fn execute_command(&self, namespace: &str, task: Task) -> Result<RunTaskResult>;

    async fn list_tasks(&self, namespace: &str, environment: &str, service: &str) -> Result<Vec<Task>>;

    async fn stop_task(&self, namespace: &str, environment: &str, task: &str) -> Result<()>;
}

/// Task manager that resolves clusters and task definitions from the service stack.
pub struct ClusterTaskManager {
    api: Arc<dyn ContainerTaskApi>,
    stacks: Arc<dyn StackManager>,
}

impl ClusterTaskManager {
    pub fn new(api: Arc<dyn ContainerTaskApi>, stacks: Arc<dyn StackManager>) -> Self {
        Self { api, stacks }
    }

    async fn run_task_request(&self, namespace: &str, task: &Task) -> Result<RunTaskRequest> {
        let service_stack_name = stack_name(namespace, StackType::Service, &[&task.service, &task.environment]);
        info!("Getting stack '{service_stack_name}'...");
        let service_stack = self.stacks.get_stack(&service_stack_name).await?;

        let task_definition = or_else(&task.task_definition, service_stack.output(TASK_DEFINITION_OUTPUT));
        let cluster = or_else(&task.cluster, service_stack.output(CLUSTER_OUTPUT));
        let container_name = service_stack
            .parameters
            .get(SERVICE_NAME_PARAMETER)
            .cloned()
            .unwrap_or_else(|| task.service.clone());
        debug!(
            "Environment: {}, Service: {container_name}, Cluster: {cluster}, Task: {task_definition}",
            task.environment
        );

        Ok(RunTaskRequest {
            cluster,
            task_definition,
            container_name,
            command: task.command.iter().map(|part| part.trim().to_string()).collect(),
            count: 1,
        })
    }

    async fn task_detail(
        &self,
        cluster: &str,
        environment: &str,
        service: &str,
        description: TaskDescription,
    ) -> Option<Task> {
        debug!("Getting task info for task: {}", description.task_arn);
        let mut containers = Vec::new();
        for container_name in description.container_names {
            if !service.is_empty() && container_name != service {
                return None;
            }
            let instance = self
                .api
                .describe_container_instance(cluster, &description.container_instance_arn)
                .await
                .unwrap_or_default();
            containers.push(Container {
                name: container_name,
                instance,
            });
        }

        let name = description.task_arn.split('/').nth(1).unwrap_or(&description.task_arn).to_string();
        Some(Task {
            name,
            environment: environment.to_string(),
            service: service.to_string(),
            containers,
            ..Default::default()
        })
    }
}

fn or_else(flag: &str, value: &str) -> String {
    if flag.is_empty() { value.to_string() } else { flag.to_string() }
}

#[async_trait]
impl TaskManager for ClusterTaskManager {
    async fn execute_command(&self, namespace: &str, task: Task) -> Result<RunTaskResult> {
        info!(
            "Executing command '{:?}' on environment '{}' for service '{}'",
            task.command, task.environment, task.service
        );
        let request = self.run_task_request(namespace, &task).await?;
        let target = request.cluster.clone();
        let result = self
            .api
            .run_task(request)
            .await
            .map_err(|e| Error::provider("RunTask", target, e))?;
        debug!("Run task result: {result:?}");
        info!("Command execution complete");
        Ok(result)
    }

    async fn list_tasks(&self, namespace: &str, environment: &str, service: &str) -> Result<Vec<Task>> {
        let cluster = stack_name(namespace, StackType::Environment, &[environment]);
        let services = self
            .api
            .list_services(&cluster)
            .await
            .map_err(|e| Error::provider("ListServices", &cluster, e))?;

        let mut tasks = Vec::new();
        for service_arn in services {
            debug!("Listing tasks for Environment: {environment}, Cluster: {cluster}, Service: {service}");
            let task_arns = self
                .api
                .list_tasks(&cluster, &service_arn)
                .await
                .map_err(|e| Error::provider("ListTasks", &cluster, e))?;

            for task_arn in task_arns {
                let Ok(descriptions) = self.api.describe_tasks(&cluster, std::slice::from_ref(&task_arn)).await else {
                    continue;
                };
                for description in descriptions {
                    if let Some(task) = self.task_detail(&cluster, environment, service, description).await {
                        debug!("Task Detail: {task:?}");
                        tasks.push(task);
                    }
                }
            }
        }
        Ok(tasks)
    }

    async fn stop_task(&self, namespace: &str, environment: &str, task: &str) -> Result<()> {
        let cluster = stack_name(namespace, StackType::Environment, &[environment]);
        self.api
            .stop_task(&cluster, task)
            .await
            .map_err(|e| Error::provider("StopTask", task, e))
    }
}

