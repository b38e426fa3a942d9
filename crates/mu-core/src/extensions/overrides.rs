//! Per-stack overrides declared in the `templates`, `parameters` and `tags` maps of the config.
use std::collections::BTreeMap;

use crate::extensions::Extension;
use crate::kernel::constants::TAG_PREFIX;

/// Overlay merged into the template of one stack.
pub struct TemplateOverride {
    id: String,
    stack_name: String,
    overlay: serde_yaml::Value,
}

impl TemplateOverride {
    pub fn new(stack_name: &str, overlay: serde_yaml::Value) -> Self {
        Self {
            id: format!("template-override:{stack_name}"),
            stack_name: stack_name.to_string(),
            overlay,
        }
    }
}

impl Extension for TemplateOverride {
    fn id(&self) -> &str {
        &self.id
    }

    fn template_overlay(&self, _template_name: &str, stack_name: &str) -> Option<serde_yaml::Value> {
        (stack_name == self.stack_name).then(|| self.overlay.clone())
    }
}

pub struct ParameterOverride {
    id: String,
    stack_name: String,
    values: BTreeMap<String, String>,
}

impl ParameterOverride {
    pub fn new(stack_name: &str, values: BTreeMap<String, String>) -> Self {
        Self {
            id: format!("parameter-override:{stack_name}"),
            stack_name: stack_name.to_string(),
            values,
        }
    }
}

impl Extension for ParameterOverride {
    fn id(&self) -> &str {
        &self.id
    }

    fn parameter_overrides(&self, stack_name: &str) -> Option<&BTreeMap<String, String>> {
        (stack_name == self.stack_name).then_some(&self.values)
    }
}

pub struct TagOverride {
    id: String,
    stack_name: String,
    values: BTreeMap<String, String>,
}

impl TagOverride {
    pub fn new(stack_name: &str, values: BTreeMap<String, String>) -> Self {
        Self {
            id: format!("tag-override:{stack_name}"),
            stack_name: stack_name.to_string(),
            values,
        }
    }
}

impl Extension for TagOverride {
    fn id(&self) -> &str {
        &self.id
    }

    fn tag_overrides(&self, stack_name: &str) -> Option<&BTreeMap<String, String>> {
        (stack_name == self.stack_name).then_some(&self.values)
    }
}

/// Stack tags are stored with the tool prefix.
pub(crate) fn tag_key(key: &str) -> String {
    if key.starts_with(TAG_PREFIX) {
        key.to_string()
    } else {
        format!("{TAG_PREFIX}{key}")
    }
}
