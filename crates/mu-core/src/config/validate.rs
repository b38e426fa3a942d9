//! Field-level validation of a parsed [`Config`].
use regex::Regex;

use crate::config::error::ConfigError;
use crate::config::{Config, Environment, Service};
use crate::kernel::error::{Error, Result};

const NAME_PATTERN: &str = r"^[a-z][-a-z0-9]*$";
const LEADING_ALPHANUMERIC_DASH: &str = r"^[a-zA-Z0-9][a-zA-Z0-9-]+$";
const ROLE_ARN_PATTERN: &str = r"^arn:aws:iam::[0-9]{12}:role/[a-zA-Z0-9\-+=/,.@_]+$";
const INSTANCE_TYPE_PATTERN: &str = r"^[a-zA-Z0-9]{2,3}\.([a-zA-Z0-9]{2,3}\.)?[a-zA-Z0-9]{4,10}$";
const CIDR_PATTERN: &str = r"^\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}/\d{1,2}$";
const URL_PATH_PATTERN: &str = r"^[a-zA-Z0-9/][a-zA-Z0-9\-./_]*?$";

/// Maximum length of an environment name; longer names overflow provider limits once prefixed.
pub const MAX_ENVIRONMENT_NAME: usize = 25;

/// Check `value` against `pattern` and `max` length. Empty values are always valid.
fn check(field: &str, value: &str, pattern: &str, max: usize) -> Result<()> {
    if value.is_empty() {
        return Ok(());
    }
    if value.len() > max {
        return Err(ConfigError::validation(field, value, format!("longer than {max} characters")).into());
    }
    let regex = Regex::new(pattern).map_err(|e| Error::parse("regex", pattern, e))?;
    if !regex.is_match(value) {
        return Err(ConfigError::validation(field, value, format!("must match {pattern}")).into());
    }
    Ok(())
}

fn check_resource_ids(field: &str, values: &[String], prefix: &str) -> Result<()> {
    let pattern = format!("^{prefix}-[a-zA-Z0-9]+$");
    values.iter().try_for_each(|value| check(field, value, &pattern, 64))
}

/// Validate the whole document, reporting the first violation.
pub fn validate(config: &Config) -> Result<()> {
    check("namespace", &config.namespace, NAME_PATTERN, 63)?;
    check("roles.cloudFormation", &config.roles.cloud_formation, ROLE_ARN_PATTERN, 95)?;
    for environment in &config.environments {
        validate_environment(environment)?;
    }
    validate_service(&config.service)
}

fn validate_environment(environment: &Environment) -> Result<()> {
    if environment.name.is_empty() {
        return Err(ConfigError::validation("environments.name", "", "must not be empty").into());
    }
    check("environments.name", &environment.name, NAME_PATTERN, MAX_ENVIRONMENT_NAME)?;

    if environment.discovery.provider.eq_ignore_ascii_case("consul") {
        return Err(ConfigError::UnsupportedDiscovery.into());
    }

    let cluster = &environment.cluster;
    check("cluster.instanceType", &cluster.instance_type, INSTANCE_TYPE_PATTERN, 95)?;
    check("cluster.sshAllow", &cluster.ssh_allow, CIDR_PATTERN, 18)?;
    check_resource_ids("cluster.imageId", std::slice::from_ref(&cluster.image_id), "ami")?;
    check("cluster.keyName", &cluster.key_name, r"^[\x20-\x7E]+$", 255)?;
    if let (Some(min), Some(max)) = (cluster.min_size, cluster.max_size) {
        if min > max {
            return Err(ConfigError::validation("cluster.minSize", min.to_string(), "greater than maxSize").into());
        }
    }

    let target = &environment.vpc_target;
    check_resource_ids("vpcTarget.vpcId", std::slice::from_ref(&target.vpc_id), "vpc")?;
    check_resource_ids("vpcTarget.elbSubnetIds", &target.elb_subnet_ids, "subnet")?;
    check_resource_ids("vpcTarget.instanceSubnetIds", &target.instance_subnet_ids, "subnet")?;

    check("roles.ecsInstance", &environment.roles.ecs_instance, ROLE_ARN_PATTERN, 95)?;
    check("roles.eksService", &environment.roles.eks_service, ROLE_ARN_PATTERN, 95)
}

fn validate_service(service: &Service) -> Result<()> {
    check("service.name", &service.name, LEADING_ALPHANUMERIC_DASH, 63)?;
    check("service.healthEndpoint", &service.health_endpoint, URL_PATH_PATTERN, 255)?;
    if let Some(count) = service.desired_count {
        if service.max_size.is_some_and(|max| count > max) {
            return Err(ConfigError::validation("service.desiredCount", count.to_string(), "greater than maxSize").into());
        }
    }
    for schedule in &service.schedule {
        check("service.schedule.name", &schedule.name, LEADING_ALPHANUMERIC_DASH, 63)?;
    }

    let roles = &service.roles;
    for (field, value) in [
        ("service.roles.ec2Instance", &roles.ec2_instance),
        ("service.roles.codeDeploy", &roles.code_deploy),
        ("service.roles.ecsEvents", &roles.ecs_events),
        ("service.roles.ecsService", &roles.ecs_service),
        ("service.roles.ecsTask", &roles.ecs_task),
        ("service.roles.applicationAutoScaling", &roles.application_auto_scaling),
        ("service.pipeline.roles.pipeline", &service.pipeline.roles.pipeline),
        ("service.pipeline.roles.build", &service.pipeline.roles.build),
    ] {
        check(field, value, ROLE_ARN_PATTERN, 95)?;
    }
    Ok(())
}
