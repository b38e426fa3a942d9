//! # Template Assets
//!
//! Provisioning templates, Kubernetes manifests and stack policies compiled into the
//! binary. Templates are rendered with `minijinja` against the template data of a
//! [`StackUpsert`](crate::stack::StackUpsert) before extensions decorate them.
use minijinja::{AutoEscape, Environment, UndefinedBehavior, Value};
use serde::Serialize;

use crate::kernel::error::{Error, Result};

pub const COMMON_IAM: &str = "common-iam";
pub const ENV_IAM: &str = "env-iam";
pub const SERVICE_IAM: &str = "service-iam";
pub const PIPELINE_IAM: &str = "pipeline-iam";
pub const PORTFOLIO_IAM: &str = "portfolio-iam";
pub const PORTFOLIO: &str = "portfolio";
pub const PRODUCT: &str = "product";
pub const BUCKET: &str = "bucket";
pub const REPO: &str = "repo";
pub const APP: &str = "app";
pub const VPC: &str = "vpc";
pub const VPC_TARGET: &str = "vpc-target";
pub const ELB: &str = "elb";
pub const ENV_ECS: &str = "env-ecs";
pub const ENV_EC2: &str = "env-ec2";
pub const ENV_EKS: &str = "env-eks";
pub const SERVICE_ECS: &str = "service-ecs";
pub const SERVICE_EC2: &str = "service-ec2";
pub const SCHEDULE: &str = "schedule";
pub const DATABASE: &str = "database";
pub const PIPELINE: &str = "pipeline";
pub const ARTIFACT_PIPELINE: &str = "artifact-pipeline";
pub const BUILDSPEC: &str = "buildspec";
pub const KUBERNETES_DEPLOYMENT: &str = "kubernetes/deployment";
pub const KUBERNETES_DATABASE: &str = "kubernetes/database";

pub const POLICY_DEFAULT: &str = "default";
pub const POLICY_DATABASE: &str = "database";
pub const POLICY_ALLOW_ALL: &str = "allow-all";

const ASSETS: &[(&str, &str)] = &[
    (COMMON_IAM, include_str!("assets/common-iam.yml")),
    (ENV_IAM, include_str!("assets/env-iam.yml")),
    (SERVICE_IAM, include_str!("assets/service-iam.yml")),
    (PIPELINE_IAM, include_str!("assets/pipeline-iam.yml")),
    (PORTFOLIO_IAM, include_str!("assets/portfolio-iam.yml")),
    (PORTFOLIO, include_str!("assets/portfolio.yml")),
    (PRODUCT, include_str!("assets/product.yml")),
    (BUCKET, include_str!("assets/bucket.yml")),
    (REPO, include_str!("assets/repo.yml")),
    (APP, include_str!("assets/app.yml")),
    (VPC, include_str!("assets/vpc.yml")),
    (VPC_TARGET, include_str!("assets/vpc-target.yml")),
    (ELB, include_str!("assets/elb.yml")),
    (ENV_ECS, include_str!("assets/env-ecs.yml")),
    (ENV_EC2, include_str!("assets/env-ec2.yml")),
    (ENV_EKS, include_str!("assets/env-eks.yml")),
    (SERVICE_ECS, include_str!("assets/service-ecs.yml")),
    (SERVICE_EC2, include_str!("assets/service-ec2.yml")),
    (SCHEDULE, include_str!("assets/schedule.yml")),
    (DATABASE, include_str!("assets/database.yml")),
    (PIPELINE, include_str!("assets/pipeline.yml")),
    (ARTIFACT_PIPELINE, include_str!("assets/artifact-pipeline.yml")),
    (BUILDSPEC, include_str!("assets/buildspec.yml")),
    (KUBERNETES_DEPLOYMENT, include_str!("assets/kubernetes/deployment.yml")),
    (KUBERNETES_DATABASE, include_str!("assets/kubernetes/database.yml")),
];

const POLICIES: &[(&str, &str)] = &[
    (POLICY_DEFAULT, include_str!("assets/policies/default.json")),
    (POLICY_DATABASE, include_str!("assets/policies/database.json")),
    (POLICY_ALLOW_ALL, include_str!("assets/policies/allow-all.json")),
];

/// Names of every embedded template.
pub fn names() -> impl Iterator<Item = &'static str> {
    ASSETS.iter().map(|(name, _)| *name)
}

/// Raw, unrendered body of a template.
pub fn asset(name: &str) -> Result<&'static str> {
    let name = name.strip_suffix(".yml").unwrap_or(name);
    ASSETS
        .iter()
        .find(|(asset, _)| *asset == name)
        .map(|(_, body)| *body)
        .ok_or_else(|| Error::Template {
            name: name.to_string(),
            reason: "no such template".to_string(),
        })
}

/// Stack policy document by name.
pub fn policy(name: &str) -> Result<&'static str> {
    POLICIES
        .iter()
        .find(|(policy, _)| *policy == name)
        .map(|(_, body)| *body)
        .ok_or_else(|| Error::Template {
            name: format!("policies/{name}"),
            reason: "no such policy".to_string(),
        })
}

/// Render template `name` with `data`. Missing values render as empty strings.
pub fn render<S: Serialize>(name: &str, data: &S) -> Result<String> {
    let body = asset(name)?;
    render_str(name, body, data)
}

/// Render an arbitrary template body, used for extension-provided templates.
pub fn render_str<S: Serialize>(name: &str, body: &str, data: &S) -> Result<String> {
    let to_err = |e: minijinja::Error| Error::Template {
        name: name.to_string(),
        reason: e.to_string(),
    };

    let mut env = Environment::new();
    env.set_auto_escape_callback(|_| AutoEscape::None);
    env.set_undefined_behavior(UndefinedBehavior::Lenient);
    env.set_keep_trailing_newline(true);
    env.add_template(name, body).map_err(to_err)?;
    let template = env.get_template(name).map_err(to_err)?;

    let mut context = Value::from_serialize(data);
    if context.is_none() || context.is_undefined() {
        context = minijinja::context! {};
    }
    template.render(context).map_err(to_err)
}
