//! # Catalog Workflows
//!
//! Publishes the pipelines declared under `catalog.pipelines` as self-service
//! products. Templates are uploaded to the `servicecatalog` bucket, one folder
//! per product version:
//!
//! ```text
//! s3://<bucket>/default/pipeline.yml
//! s3://<bucket>/<version>/{pipeline,pipeline-iam,service-iam}.yml
//! s3://<bucket>/<version>/artifact-pipeline-<product>.yml
//! ```
//!
//! The portfolio and each product are stacks of their own; product versions
//! are reconciled through the catalog manager.
use std::collections::BTreeMap;
use std::sync::Arc;

use log::info;
use serde_json::json;
use tokio::sync::Mutex;

use crate::config::{CatalogPipeline, Pipeline};
use crate::executor::{Executor, parallel, sequence};
use crate::kernel::Context;
use crate::kernel::constants::tool_version;
use crate::kernel::error::Result;
use crate::stack::{StackType, StackUpsert, build_tags, stack_name};
use crate::templates;
use crate::workflows::{delete_and_await, params, pipeline::stage_params, step, upsert_and_await};

const CATALOG_BUCKET_PREFIX: &str = "servicecatalog";
const PIPELINE_BUCKET_PREFIX: &str = "codepipeline";
const CODE_DEPLOY_BUCKET_PREFIX: &str = "codedeploy";
const DEFAULT_VERSION: &str = "default";
const DEFAULT_ACCEPTANCE: &str = "acceptance";
const DEFAULT_PRODUCTION: &str = "production";

/// Templates every product version references as nested stacks.
const VERSION_TEMPLATES: [&str; 3] = [templates::PIPELINE, templates::PIPELINE_IAM, templates::SERVICE_IAM];

#[derive(Default)]
struct CatalogState {
    cloud_formation_role: String,
    catalog_bucket: String,
    catalog_bucket_url: String,
    code_deploy_bucket: String,
    catalog_role: String,
    principal: String,
    kms_key: String,
    portfolio_id: String,
}

struct CatalogWorkflow {
    ctx: Arc<Context>,
    state: Mutex<CatalogState>,
}

impl CatalogWorkflow {
    fn new(ctx: Arc<Context>) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            state: Mutex::new(CatalogState::default()),
        })
    }

    async fn load_common_role(&self) -> Result<()> {
        self.ctx.rolesets.upsert_common_roleset().await?;
        let common = self.ctx.rolesets.get_common_roleset().await?;
        self.state.lock().await.cloud_formation_role = common.get("CloudFormationRoleArn").cloned().unwrap_or_default();
        Ok(())
    }

    async fn upsert_bucket(&self, prefix: &str) -> Result<(String, String)> {
        let namespace = self.ctx.namespace();
        let bucket_stack = stack_name(namespace, StackType::Bucket, &[prefix]);
        info!("Upserting bucket for {prefix} ...");
        let upsert = StackUpsert::new(&bucket_stack, templates::BUCKET)
            .parameters(params(&[("Namespace", namespace), ("BucketPrefix", prefix)]))
            .tags(build_tags(StackType::Bucket, &[]));
        let stack = upsert_and_await(self.ctx.stacks.as_ref(), upsert).await?;
        Ok((stack.output("Bucket").to_string(), stack.output("BucketURL").to_string()))
    }

    async fn upsert_catalog_bucket(&self) -> Result<()> {
        let (bucket, url) = self.upsert_bucket(CATALOG_BUCKET_PREFIX).await?;
        let mut state = self.state.lock().await;
        state.catalog_bucket = bucket;
        state.catalog_bucket_url = url;
        Ok(())
    }

    async fn upsert_code_deploy_bucket(&self) -> Result<()> {
        let (bucket, _) = self.upsert_bucket(CODE_DEPLOY_BUCKET_PREFIX).await?;
        self.state.lock().await.code_deploy_bucket = bucket;
        Ok(())
    }

    async fn upsert_portfolio_roles(&self) -> Result<()> {
        let namespace = self.ctx.namespace();
        let users = self.ctx.config.catalog.iam_users.join(",");
        let iam_stack = stack_name(namespace, StackType::Iam, &["portfolio", "common"]);
        info!("Upserting portfolio IAM roles ...");
        let upsert = StackUpsert::new(&iam_stack, templates::PORTFOLIO_IAM)
            .parameters(params(&[("Namespace", namespace), ("IAMUserNames", users.as_str())]))
            .tags(build_tags(StackType::Iam, &[]));
        let stack = upsert_and_await(self.ctx.stacks.as_ref(), upsert).await?;

        let mut state = self.state.lock().await;
        state.principal = stack.output("CatalogGroupARN").to_string();
        state.catalog_role = stack.output("CatalogRoleARN").to_string();
        state.kms_key = stack.output("KmsKeyId").to_string();
        Ok(())
    }

    async fn upsert_portfolio(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let namespace = self.ctx.namespace();
        let portfolio_stack = stack_name(namespace, StackType::Portfolio, &["common"]);
        info!("Upserting portfolio ...");
        let upsert = StackUpsert::new(&portfolio_stack, templates::PORTFOLIO)
            .parameters(params(&[("Namespace", namespace), ("PrincipalARN", state.principal.as_str())]))
            .tags(build_tags(StackType::Portfolio, &[]))
            .role_arn(&state.cloud_formation_role);
        let stack = upsert_and_await(self.ctx.stacks.as_ref(), upsert).await?;
        state.portfolio_id = stack.output("PortfolioId").to_string();
        Ok(())
    }

    /// Render `name` with `data`, decorate it, and upload it under `folder/`.
    async fn upload_template(&self, name: &str, folder: &str, file: &str, data: &serde_json::Value) -> Result<()> {
        let (bucket, kms_key) = {
            let state = self.state.lock().await;
            (state.catalog_bucket.clone(), state.kms_key.clone())
        };
        let body = templates::render(name, data)?;
        let body = self.ctx.extensions.decorate_stack_template(name, "", body)?;
        let dest = format!("s3://{bucket}/{folder}/{file}");
        self.ctx.artifacts.create_artifact(body.into_bytes(), &dest, &kms_key).await
    }

    async fn upload_common_templates(&self, folder: &str, data: &serde_json::Value) -> Result<()> {
        for name in VERSION_TEMPLATES {
            self.upload_template(name, folder, &format!("{name}.yml"), data).await?;
        }
        Ok(())
    }

    async fn upsert_product(&self, product: &CatalogPipeline) -> Result<()> {
        self.upload_common_templates(DEFAULT_VERSION, &json!({})).await?;

        let namespace = self.ctx.namespace();
        let product_stack = stack_name(namespace, StackType::Product, &[&product.name]);
        let upsert = {
            let state = self.state.lock().await;
            let default_url = format!("{}/{DEFAULT_VERSION}/{}.yml", state.catalog_bucket_url, templates::PIPELINE);
            StackUpsert::new(&product_stack, templates::PRODUCT)
                .parameters(params(&[
                    ("Namespace", namespace),
                    ("PortfolioId", state.portfolio_id.as_str()),
                    ("CatalogRoleARN", state.catalog_role.as_str()),
                    ("ProductName", product.name.as_str()),
                    ("ProductDescription", product.description.as_str()),
                    ("ProductDefaultVersionName", DEFAULT_VERSION),
                    ("ProductDefaultVersionURL", default_url.as_str()),
                ]))
                .tags(build_tags(StackType::Product, &[]))
                .role_arn(&state.cloud_formation_role)
        };
        info!("Upserting product '{}' ...", product.name);
        upsert_and_await(self.ctx.stacks.as_ref(), upsert).await?;
        Ok(())
    }

    fn version_data(&self, product: &str, version: &str, pipeline: &Pipeline, state: &CatalogState) -> serde_json::Value {
        let acceptance = match pipeline.acceptance.environment.as_str() {
            "" => DEFAULT_ACCEPTANCE,
            env => env,
        };
        let production = match pipeline.production.environment.as_str() {
            "" => DEFAULT_PRODUCTION,
            env => env,
        };
        let mu_version = match pipeline.mu_version.as_str() {
            "" => tool_version(),
            version => version,
        };
        json!({
            "ProductName": product,
            "ProductVersion": version,
            "Namespace": self.ctx.namespace(),
            "AcptEnv": acceptance,
            "ProdEnv": production,
            "CatalogBucketURL": state.catalog_bucket_url,
            "CatalogBucket": state.catalog_bucket,
            "CodeDeployBucket": state.code_deploy_bucket,
            "MuVersion": mu_version,
            "PipelineParams": stage_params(pipeline),
        })
    }

    /// Upload every version of `product` and reconcile the product's versions.
    async fn upsert_versions(&self, product: &CatalogPipeline) -> Result<()> {
        let mut versions = BTreeMap::new();
        for (version, pipeline) in &product.versions {
            let (data, url) = {
                let state = self.state.lock().await;
                let data = self.version_data(&product.name, version, pipeline, &state);
                let url = format!(
                    "{}/{version}/{}-{}.yml",
                    state.catalog_bucket_url,
                    templates::ARTIFACT_PIPELINE,
                    product.name
                );
                (data, url)
            };
            info!("Uploading version '{version}' of product '{}' ...", product.name);
            self.upload_common_templates(version, &data).await?;
            let file = format!("{}-{}.yml", templates::ARTIFACT_PIPELINE, product.name);
            self.upload_template(templates::ARTIFACT_PIPELINE, version, &file, &data).await?;
            versions.insert(version.clone(), url);
        }

        let product_stack = stack_name(self.ctx.namespace(), StackType::Product, &[&product.name]);
        let stack = self.ctx.stacks.get_stack(&product_stack).await?;
        self.ctx
            .catalog
            .set_product_versions(stack.output("ProductId"), &versions)
            .await
    }
}

/// Publish the configured catalog: buckets, portfolio, then one product per
/// pipeline with all of its versions.
pub fn upserter(ctx: Arc<Context>) -> Executor {
    let workflow = CatalogWorkflow::new(ctx.clone());
    let products = ctx
        .config
        .catalog
        .pipelines
        .iter()
        .map(|product| {
            let product = Arc::new(product.clone());
            let versions = product.clone();
            sequence(vec![
                step(&workflow, move |w| async move { w.upsert_product(&product).await }),
                step(&workflow, move |w| async move { w.upsert_versions(&versions).await }),
            ])
        })
        .collect();

    sequence(vec![
        step(&workflow, |w| async move { w.load_common_role().await }),
        parallel(vec![
            step(&workflow, |w| async move { w.upsert_catalog_bucket().await }),
            step(&workflow, |w| async move {
                w.upsert_bucket(PIPELINE_BUCKET_PREFIX).await.map(|_| ())
            }),
            step(&workflow, |w| async move { w.upsert_code_deploy_bucket().await }),
            sequence(vec![
                step(&workflow, |w| async move { w.upsert_portfolio_roles().await }),
                step(&workflow, |w| async move { w.upsert_portfolio().await }),
            ]),
        ]),
        parallel(products),
    ])
}

/// Remove every product (after terminating what was provisioned from it), then
/// the portfolio.
pub fn terminator(ctx: Arc<Context>) -> Executor {
    Executor::new(move || async move {
        let namespace = ctx.namespace();
        for product in ctx.stacks.list_stacks(Some(StackType::Product), namespace).await? {
            info!("Terminating product '{}' ...", product.name);
            ctx.catalog
                .terminate_provisioned_products(product.output("ProductId"))
                .await?;
            delete_and_await(ctx.stacks.as_ref(), &product.name).await?;
        }
        for portfolio in ctx.stacks.list_stacks(Some(StackType::Portfolio), namespace).await? {
            info!("Terminating portfolio '{}' ...", portfolio.name);
            delete_and_await(ctx.stacks.as_ref(), &portfolio.name).await?;
        }
        Ok(())
    })
}
