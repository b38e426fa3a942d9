use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{Level, debug, info, log, warn};

use crate::artifact::ArtifactManager;
use crate::extensions::ExtensionsManager;
use crate::kernel::constants::{IMAGE_OWNER, POLL_INTERVAL, TAG_PREFIX, tool_version};
use crate::kernel::error::{Error, Result};
use crate::provider::RepositoryManager;
use crate::stack::api::{
    CAPABILITY_IAM, CAPABILITY_NAMED_IAM, ProvisioningApi, RESOURCE_TYPE_BUCKET, RESOURCE_TYPE_REPOSITORY,
    StackDescription, StackEvent, StackInput, StackParameter,
};
use crate::stack::error::StackSystemError;
use crate::stack::version::check_compatible;
use crate::stack::{Stack, StackManager, StackType, StackUpsert, status};
use crate::templates;

/// Construction options for [`ProvisioningStackManager`].
#[derive(Debug, Clone)]
pub struct StackManagerOptions {
    /// When set, templates and parameters are written here instead of calling the provider.
    pub dryrun_path: Option<PathBuf>,
    pub skip_version_check: bool,
    pub allow_data_loss: bool,
    pub tool_version: String,
    pub poll_interval: Duration,
}

impl Default for StackManagerOptions {
    fn default() -> Self {
        Self {
            dryrun_path: None,
            skip_version_check: false,
            allow_data_loss: false,
            tool_version: tool_version().to_string(),
            poll_interval: POLL_INTERVAL,
        }
    }
}

impl StackManagerOptions {
    pub fn dryrun(mut self, path: impl Into<PathBuf>) -> Self {
        self.dryrun_path = Some(path.into());
        self
    }

    pub fn skip_version_check(mut self, skip: bool) -> Self {
        self.skip_version_check = skip;
        self
    }

    pub fn tool_version(mut self, version: impl Into<String>) -> Self {
        self.tool_version = version.into();
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Stack manager backed by a declarative provisioning service.
pub struct ProvisioningStackManager {
    api: Arc<dyn ProvisioningApi>,
    extensions: Arc<dyn ExtensionsManager>,
    artifacts: Arc<ArtifactManager>,
    repositories: Arc<dyn RepositoryManager>,
    options: StackManagerOptions,
    allow_data_loss: AtomicBool,
}

impl ProvisioningStackManager {
    pub fn new(
        api: Arc<dyn ProvisioningApi>,
        extensions: Arc<dyn ExtensionsManager>,
        artifacts: Arc<ArtifactManager>,
        repositories: Arc<dyn RepositoryManager>,
        options: StackManagerOptions,
    ) -> Self {
        if let Some(path) = &options.dryrun_path {
            debug!("Running in DRYRUN mode with path '{}'", path.display());
        }
        let allow_data_loss = AtomicBool::new(options.allow_data_loss);
        Self {
            api,
            extensions,
            artifacts,
            repositories,
            options,
            allow_data_loss,
        }
    }

    fn data_loss_allowed(&self) -> bool {
        self.allow_data_loss.load(Ordering::SeqCst)
    }

    fn build_stack_parameters(parameters: &BTreeMap<String, String>) -> Vec<StackParameter> {
        parameters
            .iter()
            .map(|(key, value)| StackParameter {
                key: key.clone(),
                value: (!value.is_empty()).then(|| value.clone()),
                use_previous_value: value.is_empty(),
            })
            .collect()
    }

    fn build_stack_tags(&self, tags: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        let mut stack_tags: BTreeMap<String, String> = tags
            .iter()
            .filter(|(_, value)| !value.is_empty())
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        stack_tags.insert(format!("{TAG_PREFIX}version"), self.options.tool_version.clone());
        stack_tags
    }

    /// Stack policy for the upsert: explicit policy first, then the data-protection
    /// policy for database stacks.
    fn resolve_policy(&self, upsert: &StackUpsert) -> Result<Option<String>> {
        if let Some(policy) = &upsert.policy {
            return Ok(Some(policy.clone()));
        }
        if upsert.stack_type() == Some(StackType::Database) {
            let name = if self.data_loss_allowed() {
                templates::POLICY_ALLOW_ALL
            } else {
                templates::POLICY_DATABASE
            };
            return Ok(Some(templates::policy(name)?.to_string()));
        }
        Ok(None)
    }

    fn write_dryrun(&self, dir: &Path, stack_name: &str, body: &str, parameters: &BTreeMap<String, String>) -> Result<()> {
        let to_err = |path: &Path, source| StackSystemError::DryrunOutput {
            stack: stack_name.to_string(),
            path: path.to_path_buf(),
            source,
        };
        fs::create_dir_all(dir).map_err(|e| to_err(dir, e))?;

        let template_file = dir.join(format!("template-{stack_name}.yml"));
        fs::write(&template_file, body).map_err(|e| to_err(&template_file, e))?;

        let mut config = BTreeMap::new();
        config.insert("Parameters", parameters);
        let config_body = serde_json::to_string_pretty(&config).map_err(|e| Error::serialization("json", e))?;
        let config_file = dir.join(format!("config-{stack_name}.json"));
        fs::write(&config_file, config_body).map_err(|e| to_err(&config_file, e))?;
        Ok(())
    }

    fn log_event(event: &StackEvent) {
        log!(
            event_log_level(event),
            "  {} ({}) {} {}",
            event.logical_resource_id,
            event.resource_type,
            event.resource_status,
            event.resource_status_reason.as_deref().unwrap_or_default()
        );
    }

    /// Empty buckets and image repositories owned by the stack so the provider can delete them.
    async fn empty_owned_resources(&self, stack_name: &str) -> Result<()> {
        let resources = self
            .api
            .describe_stack_resources(stack_name)
            .await
            .map_err(|e| Error::provider("DescribeStackResources", stack_name, e))?;

        for resource in resources {
            match resource.resource_type.as_str() {
                RESOURCE_TYPE_BUCKET => {
                    debug!("Emptying bucket '{}' owned by '{stack_name}'", resource.physical_resource_id);
                    if let Err(err) = self.artifacts.empty_bucket(&resource.physical_resource_id).await {
                        warn!("Unable to empty bucket '{}': {err}", resource.physical_resource_id);
                    }
                }
                RESOURCE_TYPE_REPOSITORY => {
                    debug!(
                        "Deleting images in repository '{}' owned by '{stack_name}'",
                        resource.physical_resource_id
                    );
                    if let Err(err) = self.repositories.empty_repository(&resource.physical_resource_id).await {
                        warn!("Unable to empty repository '{}': {err}", resource.physical_resource_id);
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Index of the first event that belongs to the current run.
///
/// Events arrive newest first. The previous run ended at the latest top-level
/// `_COMPLETE` event; everything newer than that is new.
pub(crate) fn first_new_event_index(
    events: &[StackEvent],
    stack_name: &str,
    prior_event_time: Option<DateTime<Utc>>,
) -> usize {
    match prior_event_time {
        Some(prior) => events.iter().take_while(|e| e.timestamp > prior).count(),
        None => events
            .iter()
            .position(|e| e.logical_resource_id == stack_name && e.resource_status.ends_with("_COMPLETE"))
            .unwrap_or(0),
    }
}

/// Remembers the newest event seen so each poll reports only what is new.
#[derive(Debug, Default)]
pub(crate) struct EventCursor {
    prior_event_time: Option<DateTime<Utc>>,
}

impl EventCursor {
    /// Events of this poll not reported before, oldest first.
    pub(crate) fn advance<'a>(&mut self, events: &'a [StackEvent], stack_name: &str) -> Vec<&'a StackEvent> {
        let first_new = first_new_event_index(events, stack_name, self.prior_event_time);
        if let Some(newest) = events.first() {
            self.prior_event_time = Some(self.prior_event_time.map_or(newest.timestamp, |t| t.max(newest.timestamp)));
        }
        events[..first_new].iter().rev().collect()
    }
}

pub(crate) fn event_log_level(event: &StackEvent) -> Level {
    if event.resource_status.ends_with("_FAILED") {
        Level::Error
    } else {
        Level::Debug
    }
}

/// Map a provider description into a [`Stack`], stripping tag prefixes.
pub(crate) fn build_stack(details: StackDescription) -> Stack {
    // arn:<partition>:cloudformation:<region>:<account>:stack/<name>/<id>
    let arn_chunks: Vec<&str> = details.stack_id.split(':').collect();
    let region = arn_chunks.get(3).copied().unwrap_or_default().to_string();
    let account_id = arn_chunks.get(4).copied().unwrap_or_default().to_string();

    let tags = details
        .tags
        .iter()
        .filter_map(|(key, value)| key.strip_prefix(TAG_PREFIX).map(|k| (k.to_string(), value.clone())))
        .collect();

    Stack {
        last_update: details.last_updated_time.unwrap_or(details.creation_time),
        id: details.stack_id,
        name: details.stack_name,
        status: details.status,
        status_reason: details.status_reason.unwrap_or_default(),
        region,
        account_id,
        tags,
        outputs: details.outputs,
        parameters: details.parameters,
        termination_protection: details.termination_protection,
    }
}

#[async_trait]
impl StackManager for ProvisioningStackManager {
    async fn upsert_stack(&self, upsert: StackUpsert) -> Result<()> {
        let stack_name = upsert.name.clone();
        let mut stack = self.await_final_status(&stack_name).await?;

        if let Some(existing) = &stack {
            if existing.status == status::ROLLBACK_COMPLETE {
                warn!("  Stack '{stack_name}' was in '{}' status, deleting...", existing.status);
                self.delete_stack(&stack_name).await?;
                stack = self.await_final_status(&stack_name).await?;
            }
        }

        if let Some(existing) = &stack {
            self.check_version(existing)?;
        }

        let body = templates::render(&upsert.template, &upsert.template_data)?;
        let body = self.extensions.decorate_stack_template(&upsert.template, &stack_name, body)?;
        let parameters = self.extensions.decorate_stack_parameters(&stack_name, upsert.parameters.clone())?;
        let tags = self.extensions.decorate_stack_tags(&stack_name, upsert.tags.clone())?;

        let mut capabilities = vec![CAPABILITY_IAM.to_string()];
        if upsert.stack_type() == Some(StackType::Iam) {
            capabilities.push(CAPABILITY_NAMED_IAM.to_string());
        }

        let input = StackInput {
            stack_name: stack_name.clone(),
            template_body: body,
            parameters: Self::build_stack_parameters(&parameters),
            tags: self.build_stack_tags(&tags),
            capabilities,
            role_arn: upsert.role_arn.clone(),
            policy_body: self.resolve_policy(&upsert)?,
        };

        let creating = stack.as_ref().map_or(true, |s| s.status.is_empty() || s.status == status::DRYRUN_COMPLETE);

        if let Some(dir) = &self.options.dryrun_path {
            self.write_dryrun(dir, &stack_name, &input.template_body, &parameters)?;
            let verb = if creating { "create" } else { "update" };
            info!(
                "  DRYRUN: Skipping {verb} of stack named '{stack_name}'.  Template and parameters written to '{}'",
                dir.display()
            );
            return Ok(());
        }

        if creating {
            debug!("  Creating stack named '{stack_name}'");
            debug!("  Stack parameters:\n\t{:?}", input.parameters);
            debug!("  Stack tags:\n\t{:?}", input.tags);
            self.api
                .create_stack(input)
                .await
                .map_err(|e| Error::provider("CreateStack", &stack_name, e))?;

            debug!("  Waiting for stack to exist...");
            self.api
                .wait_until_stack_exists(&stack_name)
                .await
                .map_err(|e| Error::provider("WaitUntilStackExists", &stack_name, e))?;
            debug!("  Stack exists.");
        } else {
            debug!("  Updating stack named '{stack_name}'");
            debug!("  Stack parameters:\n\t{:?}", input.parameters);
            debug!("  Stack tags:\n\t{:?}", input.tags);
            match self.api.update_stack(input).await {
                Ok(()) => {}
                Err(err) if err.is_no_updates() => {
                    info!("  No changes for stack '{stack_name}'");
                }
                Err(err) => return Err(Error::provider("UpdateStack", &stack_name, err)),
            }
        }
        Ok(())
    }

    async fn await_final_status(&self, name: &str) -> Result<Option<Stack>> {
        let mut cursor = EventCursor::default();

        loop {
            let details = self
                .api
                .describe_stack(name)
                .await
                .map_err(|e| Error::provider("DescribeStacks", name, e))?;

            let Some(details) = details else {
                if self.options.dryrun_path.is_some() {
                    return Ok(Some(Stack::dryrun(name, &self.options.tool_version)));
                }
                return Ok(None);
            };

            match self.api.describe_stack_events(name).await {
                Ok(events) => {
                    for event in cursor.advance(&events, name) {
                        Self::log_event(event);
                    }
                }
                Err(err) => debug!("Unable to describe events for stack '{name}': {err}"),
            }

            if status::is_final(&details.status) {
                return Ok(Some(build_stack(details)));
            }

            debug!("  Stack '{name}' is {}; waiting", details.status);
            tokio::time::sleep(self.options.poll_interval).await;
        }
    }

    async fn list_stacks(&self, stack_type: Option<StackType>, namespace: &str) -> Result<Vec<Stack>> {
        debug!(
            "Searching for stacks of type '{}' in namespace '{namespace}'",
            stack_type.map_or("all", |t| t.as_str())
        );
        let prefix = format!("{namespace}-");
        let mut stacks = Vec::new();
        let mut next_token = None;

        loop {
            let page = self
                .api
                .describe_stacks_page(next_token)
                .await
                .map_err(|e| Error::provider("DescribeStacks", namespace, e))?;

            for details in page.stacks {
                if details.status == status::DELETE_COMPLETE || !details.stack_name.starts_with(&prefix) {
                    continue;
                }
                let stack = build_stack(details);
                let Some(actual_type) = stack.stack_type() else {
                    continue;
                };
                if stack_type.is_none_or(|wanted| wanted == actual_type) {
                    stacks.push(stack);
                }
            }

            next_token = page.next_token;
            if next_token.is_none() {
                break;
            }
        }
        Ok(stacks)
    }

    async fn get_stack(&self, name: &str) -> Result<Stack> {
        debug!("Searching for stack named '{name}'");
        let details = self
            .api
            .describe_stack(name)
            .await
            .map_err(|e| Error::provider("DescribeStacks", name, e))?;
        details
            .map(build_stack)
            .ok_or_else(|| StackSystemError::StackNotFound { stack: name.to_string() }.into())
    }

    async fn delete_stack(&self, name: &str) -> Result<()> {
        if self.options.dryrun_path.is_some() {
            info!("  DRYRUN: Skipping delete of stack named '{name}'");
            return Ok(());
        }

        let exists = self
            .api
            .describe_stack(name)
            .await
            .map_err(|e| Error::provider("DescribeStacks", name, e))?
            .is_some();
        if !exists {
            debug!("Stack '{name}' is already deleted");
            return Ok(());
        }

        if self.data_loss_allowed() {
            let policy = templates::policy(templates::POLICY_ALLOW_ALL)?;
            if let Err(err) = self.api.set_stack_policy(name, policy).await {
                debug!("Unable to relax stack policy on '{name}': {err}");
            }
        }

        self.empty_owned_resources(name).await?;

        debug!("Deleting stack named '{name}'");
        self.api
            .delete_stack(name)
            .await
            .map_err(|e| Error::provider("DeleteStack", name, e))
    }

    async fn find_latest_image_id(&self, pattern: &str) -> Result<String> {
        let images = self
            .api
            .describe_images(IMAGE_OWNER, pattern)
            .await
            .map_err(|e| Error::provider("DescribeImages", pattern, e))?;

        let mut latest: Option<(DateTime<Utc>, String)> = None;
        for image in images {
            let created = DateTime::parse_from_rfc3339(&image.creation_date)
                .map_err(|e| Error::parse("image creation date", &image.creation_date, e))?
                .with_timezone(&Utc);
            if latest.as_ref().is_none_or(|(when, _)| *when < created) {
                latest = Some((created, image.image_id));
            }
        }

        match latest {
            Some((_, image_id)) => {
                debug!("Found latest imageId {image_id} for pattern {pattern}");
                Ok(image_id)
            }
            None => Err(StackSystemError::ImageNotFound {
                pattern: pattern.to_string(),
            }
            .into()),
        }
    }

    async fn set_termination_protection(&self, name: &str, enabled: bool) -> Result<()> {
        if self.options.dryrun_path.is_some() {
            info!("  DRYRUN: Skipping termination protection update of stack named '{name}'");
            return Ok(());
        }
        self.api
            .update_termination_protection(name, enabled)
            .await
            .map_err(|e| Error::provider("UpdateTerminationProtection", name, e))
    }

    async fn availability_zones(&self) -> Result<Vec<String>> {
        self.api
            .describe_availability_zones()
            .await
            .map_err(|e| Error::provider("DescribeAvailabilityZones", "region", e))
    }

    fn check_version(&self, stack: &Stack) -> Result<()> {
        if self.options.skip_version_check {
            return Ok(());
        }
        check_compatible(&stack.name, stack.tag("version"), &self.options.tool_version)?;
        Ok(())
    }

    fn allow_data_loss(&self, allow: bool) {
        self.allow_data_loss.store(allow, Ordering::SeqCst);
    }

    fn is_dryrun(&self) -> bool {
        self.options.dryrun_path.is_some()
    }
}
