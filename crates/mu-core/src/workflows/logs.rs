//! Log viewing for environments, services and pipelines.
use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;
use log::debug;

use crate::executor::Executor;
use crate::kernel::Context;
use crate::kernel::error::Result;
use crate::provider::LogEvent;
use crate::stack::{StackType, stack_name};
use crate::workflows::resolve_service_name;

/// Lookback when the caller gives none.
pub const DEFAULT_SEARCH_DURATION: Duration = Duration::from_secs(60);

/// Build jobs of a service pipeline, each logging to its own group.
pub const PIPELINE_JOBS: [&str; 6] = [
    "artifact",
    "image",
    "deploy-acceptance",
    "test-acceptance",
    "deploy-production",
    "test-production",
];

/// Receives each formatted line.
pub type LineSink = Arc<dyn Fn(&str) + Send + Sync>;

/// `<message> [<stream>]`
pub fn format_event(event: &LogEvent) -> String {
    format!("{} [{}]", event.message.trim_end(), event.stream)
}

pub fn environment_groups(ctx: &Context, environment: &str) -> Vec<String> {
    vec![stack_name(ctx.namespace(), StackType::Environment, &[environment])]
}

pub fn service_groups(ctx: &Context, environment: &str, name: &str) -> Result<Vec<String>> {
    let service = resolve_service_name(&ctx.config, name)?;
    Ok(vec![stack_name(ctx.namespace(), StackType::Service, &[&service, environment])])
}

pub fn pipeline_groups(ctx: &Context, name: &str) -> Result<Vec<String>> {
    let service = resolve_service_name(&ctx.config, name)?;
    let pipeline = stack_name(ctx.namespace(), StackType::Pipeline, &[&service]);
    Ok(PIPELINE_JOBS
        .iter()
        .map(|job| format!("/aws/codebuild/{pipeline}-{job}"))
        .collect())
}

/// Show events of every group in `groups` concurrently, feeding each line to
/// `sink`. With `follow` the executor only finishes on error.
pub fn viewer(
    ctx: Arc<Context>,
    groups: Vec<String>,
    search_duration: Duration,
    follow: bool,
    filter: &str,
    sink: LineSink,
) -> Executor {
    let filter = filter.to_string();
    Executor::new(move || async move {
        let callback = move |event: &LogEvent| sink(&format_event(event));
        let views = groups.iter().map(|group| {
            debug!("Viewing log group '{group}'");
            ctx.logs
                .view_logs(group, search_duration, follow, &filter, &callback)
        });
        try_join_all(views).await?;
        Ok(())
    })
}
