//! # Extensions
//!
//! Extensions decorate every stack the stack manager upserts. Three hooks run in
//! order on each upsert: the rendered template body, then the stack parameters,
//! then the stack tags. Each hook takes its input by value and returns the
//! decorated copy.
//!
//! Extensions come from two places:
//!
//! - `extensions:` entries of the config, fetched as archives and cached under
//!   `~/.mu/extensions/<sha1(url)>/` ([`archive::ArchiveExtension`]). An archive
//!   contributes a YAML overlay for a template asset by shipping `<asset>.yml`.
//! - the `templates`, `parameters` and `tags` maps of the config, keyed by stack
//!   name ([`overrides`]).
pub mod archive;
pub mod merge;
pub mod overrides;

use std::collections::BTreeMap;
use std::path::Path;

use log::{debug, warn};

use crate::artifact::ArtifactManager;
use crate::config::Config;
use crate::kernel::error::{Error, Result};

pub use archive::ArchiveExtension;
pub use overrides::{ParameterOverride, TagOverride, TemplateOverride};

/// Decorators applied by the stack manager to every upsert.
pub trait ExtensionsManager: Send + Sync {
    fn decorate_stack_template(&self, template_name: &str, stack_name: &str, body: String) -> Result<String>;

    fn decorate_stack_parameters(
        &self,
        stack_name: &str,
        parameters: BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, String>>;

    fn decorate_stack_tags(&self, stack_name: &str, tags: BTreeMap<String, String>) -> Result<BTreeMap<String, String>>;
}

/// One source of decorations. Every hook defaults to contributing nothing.
pub trait Extension: Send + Sync {
    fn id(&self) -> &str;

    /// YAML overlay to merge into `template_name` when upserting `stack_name`.
    fn template_overlay(&self, _template_name: &str, _stack_name: &str) -> Option<serde_yaml::Value> {
        None
    }

    fn parameter_overrides(&self, _stack_name: &str) -> Option<&BTreeMap<String, String>> {
        None
    }

    fn tag_overrides(&self, _stack_name: &str) -> Option<&BTreeMap<String, String>> {
        None
    }
}

/// Ordered collection of loaded extensions. An empty registry decorates nothing.
#[derive(Default)]
pub struct ExtensionsRegistry {
    extensions: Vec<Box<dyn Extension>>,
}

impl ExtensionsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an extension. An extension whose id is already registered is skipped.
    pub fn register(&mut self, extension: Box<dyn Extension>) {
        if self.extensions.iter().any(|e| e.id() == extension.id()) {
            warn!("Extension '{}' already loaded...skipping.", extension.id());
            return;
        }
        debug!("Registered extension '{}'", extension.id());
        self.extensions.push(extension);
    }

    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    /// Load every extension named by `config`. Archives that fail to load are
    /// reported and skipped.
    pub async fn load(config: &Config, artifacts: &ArtifactManager, cache_root: &Path) -> Self {
        let mut registry = Self::new();

        for extension in &config.extensions {
            if !extension.url.is_empty() {
                match ArchiveExtension::load(&extension.url, &config.basedir, artifacts, cache_root).await {
                    Ok(archive) => registry.register(Box::new(archive)),
                    Err(err) => warn!("Unable to load extension '{}': {err}", extension.url),
                }
            } else if !extension.image.is_empty() {
                warn!("Docker based extensions are not yet supported!");
            }
        }

        for (stack_name, template) in &config.templates {
            registry.register(Box::new(TemplateOverride::new(stack_name, template.clone())));
        }
        for (stack_name, parameters) in &config.parameters {
            registry.register(Box::new(ParameterOverride::new(stack_name, parameters.clone())));
        }
        for (stack_name, tags) in &config.tags {
            registry.register(Box::new(TagOverride::new(stack_name, tags.clone())));
        }
        registry
    }
}

impl ExtensionsManager for ExtensionsRegistry {
    fn decorate_stack_template(&self, template_name: &str, stack_name: &str, body: String) -> Result<String> {
        let overlays: Vec<_> = self
            .extensions
            .iter()
            .filter_map(|e| e.template_overlay(template_name, stack_name))
            .collect();
        if overlays.is_empty() {
            return Ok(body);
        }

        let to_err = |reason: String| Error::Template {
            name: template_name.to_string(),
            reason,
        };
        let mut template: serde_yaml::Value = serde_yaml::from_str(&body).map_err(|e| to_err(e.to_string()))?;
        for overlay in overlays {
            merge::apply(&mut template, overlay);
        }
        debug!("Decorated template '{template_name}' for stack '{stack_name}'");
        serde_yaml::to_string(&template).map_err(|e| to_err(e.to_string()))
    }

    fn decorate_stack_parameters(
        &self,
        stack_name: &str,
        mut parameters: BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, String>> {
        for overrides in self.extensions.iter().filter_map(|e| e.parameter_overrides(stack_name)) {
            parameters.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        Ok(parameters)
    }

    fn decorate_stack_tags(&self, stack_name: &str, mut tags: BTreeMap<String, String>) -> Result<BTreeMap<String, String>> {
        for overrides in self.extensions.iter().filter_map(|e| e.tag_overrides(stack_name)) {
            tags.extend(overrides.iter().map(|(k, v)| (overrides::tag_key(k), v.clone())));
        }
        Ok(tags)
    }
}

#[cfg(test)]
mod tests;
