//! Terminal rendering of listings and views.
use chrono::{DateTime, Local, Utc};
use clap::ValueEnum;
use colored::{ColoredString, Colorize};
use serde::Serialize;

use mu_core::Result;
use mu_core::provider::pipeline::StageState;
use mu_core::workflows::StackSummary;
use mu_core::workflows::environment::EnvironmentView;
use mu_core::workflows::pipeline::PipelineView;
use mu_core::workflows::service::ServiceView;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum Format {
    #[default]
    Table,
    Json,
}

pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let body =
        serde_json::to_string_pretty(value).map_err(|e| mu_core::Error::serialization("JSON output", e))?;
    println!("{body}");
    Ok(())
}

/// Status colored by outcome: failures red, in-progress yellow, the rest green.
pub fn status(status: &str) -> ColoredString {
    if status.contains("FAIL") || status.contains("ROLLBACK") {
        status.red().bold()
    } else if status.ends_with("_IN_PROGRESS") || status == "InProgress" {
        status.yellow()
    } else {
        status.green()
    }
}

pub fn timestamp(time: &DateTime<Utc>) -> String {
    time.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

fn width(rows: &[[String; 5]], column: usize, header: &str) -> usize {
    rows.iter().map(|row| row[column].len()).chain([header.len()]).max().unwrap_or_default()
}

/// Table of stacks keyed by `subject` (Environment, Service, ...).
pub fn summaries(subject: &str, summaries: &[StackSummary], format: Format) -> Result<()> {
    if format == Format::Json {
        return json(summaries);
    }
    if summaries.is_empty() {
        println!("{}", "No stacks found.".dimmed());
        return Ok(());
    }

    let headers = [subject, "Stack", "Status", "Last Update", "Mu Version"];
    let rows: Vec<[String; 5]> = summaries
        .iter()
        .map(|s| {
            [
                s.subject.clone(),
                s.stack.clone(),
                s.status.clone(),
                timestamp(&s.last_update),
                s.version.clone(),
            ]
        })
        .collect();
    let widths: Vec<usize> = (0..5).map(|i| width(&rows, i, headers[i])).collect();

    let header_line: Vec<String> = headers
        .iter()
        .zip(&widths)
        .map(|(h, w)| format!("{h:<width$}", width = *w))
        .collect();
    println!("{}", header_line.join("  ").bold());
    for row in &rows {
        println!(
            "{:<w0$}  {:<w1$}  {:<w2$}  {:<w3$}  {}",
            row[0].cyan(),
            row[1],
            status(&row[2]),
            row[3],
            row[4].dimmed(),
            w0 = widths[0],
            w1 = widths[1],
            w2 = widths[2],
            w3 = widths[3],
        );
    }
    Ok(())
}

fn stages(stages: &[StageState]) {
    for stage in stages {
        println!("  {}", stage.name.bold());
        for action in &stage.actions {
            let action_status = action.status.as_deref().unwrap_or("-");
            let revision = action.revision_id.as_deref().unwrap_or_default();
            println!("    {:<24} {} {}", action.name, status(action_status), revision.dimmed());
            if let Some(details) = &action.error_details {
                println!("      {}", details.red());
            }
        }
    }
}

pub fn environment(view: &EnvironmentView, format: Format) -> Result<()> {
    if format == Format::Json {
        return json(view);
    }
    println!("{}  {}", "Environment:".bold(), view.name.cyan());
    println!("{}  {}", "Provider:".bold(), view.provider);
    println!(
        "{}  {} ({})",
        "Cluster Stack:".bold(),
        view.cluster_stack.name,
        status(&view.cluster_stack.status)
    );
    match &view.vpc_stack {
        Some(vpc) => println!("{}  {} ({})", "VPC Stack:".bold(), vpc.name, status(&vpc.status)),
        None => println!("{}  {}", "VPC Stack:".bold(), "unmanaged".dimmed()),
    }
    if !view.bastion_host.is_empty() {
        println!("{}  {}", "Bastion Host:".bold(), view.bastion_host);
    }
    println!("{}  {}", "Base URL:".bold(), view.base_url);

    println!();
    println!("{}", "Container Instances:".bold());
    for instance in &view.instances {
        println!(
            "  {:<20} {:<12} {:<12} {:<15} {} tasks",
            instance.instance_id,
            instance.instance_type,
            instance.availability_zone,
            instance.private_ip,
            instance.running_tasks
        );
    }

    println!();
    println!("{}", "Services:".bold());
    for service in &view.services {
        println!(
            "  {:<20} {:<40} {:<20} {}",
            service.name.cyan(),
            service.image,
            status(&service.status),
            timestamp(&service.last_update)
        );
    }
    Ok(())
}

pub fn service(view: &ServiceView, format: Format) -> Result<()> {
    if format == Format::Json {
        return json(view);
    }
    println!("{}  {}", "Service:".bold(), view.name.cyan());
    if view.pipeline_url.is_empty() {
        println!("{}  {}", "Pipeline:".bold(), "none".dimmed());
    } else {
        println!("{}  {}", "Pipeline:".bold(), view.pipeline_url);
        stages(&view.pipeline_stages);
    }

    println!();
    println!("{}", "Deployments:".bold());
    for deployment in &view.deployments {
        println!(
            "  {:<16} {:<40} {:<20} {}",
            deployment.environment.cyan(),
            deployment.image,
            status(&deployment.status),
            timestamp(&deployment.last_update)
        );
        for task in &deployment.tasks {
            let instances: Vec<&str> = task.containers.iter().map(|c| c.instance.as_str()).collect();
            println!("    {} {}", task.name, instances.join(",").dimmed());
        }
    }
    Ok(())
}

pub fn pipeline(view: &PipelineView, format: Format) -> Result<()> {
    if format == Format::Json {
        return json(view);
    }
    println!("{}  {}", "Service:".bold(), view.service.cyan());
    println!("{}  {} ({})", "Stack:".bold(), view.stack.name, status(&view.stack.status));
    println!("{}  {}", "URL:".bold(), view.url);
    if let Some(git) = &view.git_info {
        println!("{}  {} {} @ {}", "Source:".bold(), git.provider, git.slug, git.revision.dimmed());
    }
    stages(&view.stages);
    Ok(())
}
