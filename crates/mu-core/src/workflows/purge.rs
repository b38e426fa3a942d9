//! # Namespace Purge
//!
//! Tears down everything the tool created in a namespace, in dependency order:
//!
//! 1. pipelines, in parallel
//! 2. environments (with the services, schedules and databases in them), in parallel
//! 3. image repositories, in parallel
//! 4. CodeDeploy applications, in parallel
//! 5. buckets, in parallel
//! 6. the common IAM roles, after data loss has been authorized
//!
//! Repository and bucket stacks are emptied by the stack manager before they are
//! deleted. Stacks of other types that are not reachable from an environment or
//! pipeline stack (an orphaned `vpc` or `service` stack, for instance) are left
//! in place.
use std::sync::Arc;

use log::info;

use crate::executor::{Executor, any_error, parallel, sequence, warn_on_fail};
use crate::kernel::Context;
use crate::kernel::error::Result;
use crate::stack::{Stack, StackType};
use crate::workflows::{StackSummary, delete_and_await, environment, pipeline};

/// Every stack of the namespace that purge considers, keyed by type.
pub async fn plan(ctx: &Context) -> Result<Vec<StackSummary>> {
    let stacks = ctx.stacks.list_stacks(None, ctx.namespace()).await?;
    Ok(stacks
        .iter()
        .filter(|stack| !stack.tag("type").is_empty())
        .map(|stack| StackSummary::new(stack, "type"))
        .collect())
}

/// Purge the namespace of `ctx`. Stacks are listed when the executor runs.
pub fn purger(ctx: Arc<Context>) -> Executor {
    Executor::new(move || async move {
        let stacks = ctx.stacks.list_stacks(None, ctx.namespace()).await?;
        info!("Purging {} stacks from namespace '{}'", stacks.len(), ctx.namespace());
        build(ctx, &stacks).execute().await
    })
}

fn of_type(stacks: &[Stack], stack_type: StackType) -> impl Iterator<Item = &Stack> {
    stacks.iter().filter(move |stack| stack.stack_type() == Some(stack_type))
}

fn delete_all(ctx: &Arc<Context>, stacks: &[Stack], stack_type: StackType) -> Executor {
    let deletes = of_type(stacks, stack_type)
        .map(|stack| {
            let ctx = ctx.clone();
            let name = stack.name.clone();
            Executor::new(move || async move {
                info!("Terminating {stack_type} stack '{name}' ...");
                delete_and_await(ctx.stacks.as_ref(), &name).await
            })
        })
        .collect();
    parallel(deletes)
}

fn build(ctx: Arc<Context>, stacks: &[Stack]) -> Executor {
    let pipelines = of_type(stacks, StackType::Pipeline)
        .map(|stack| pipeline::terminator(ctx.clone(), stack.tag("service")))
        .collect();
    let environments = of_type(stacks, StackType::Environment)
        .map(|stack| environment::terminator(ctx.clone(), stack.tag("environment")))
        .collect();

    let common = {
        let ctx = ctx.clone();
        Executor::new(move || async move {
            ctx.stacks.allow_data_loss(true);
            info!("Terminating common IAM roles ...");
            ctx.rolesets.delete_common_roleset().await
        })
    };

    sequence(vec![
        warn_on_fail(any_error, parallel(pipelines)),
        warn_on_fail(any_error, parallel(environments)),
        warn_on_fail(any_error, delete_all(&ctx, stacks, StackType::Repo)),
        warn_on_fail(any_error, delete_all(&ctx, stacks, StackType::App)),
        warn_on_fail(any_error, delete_all(&ctx, stacks, StackType::Bucket)),
        common,
    ])
}
