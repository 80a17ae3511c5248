//! Boot configuration rendering
//!
//! Three bundled templates turn a job into the instance-template properties
//! the provider boots from:
//! - `clash_runner.sh.j2`: the worker-side runner script
//! - `cloud-init.yaml.j2`: writes the env file, script and runner, then starts the runner
//! - `machine_config.json.j2`: the instance-template `properties` document
//!
//! The machine config carries a startup payload field, `metadata.items[0].value`,
//! which is overwritten with the rendered cloud-init document.

mod boot;
mod script;

pub use boot::{CloudInitConfig, MachineConfig};
pub use script::{quote_arg, translate_args_to_script};

use minijinja::{AutoEscape, Environment, UndefinedBehavior};
use serde::Serialize;

const RUNNER_TEMPLATE: &str = include_str!("../../templates/clash_runner.sh.j2");
const CLOUD_INIT_TEMPLATE: &str = include_str!("../../templates/cloud-init.yaml.j2");
const MACHINE_CONFIG_TEMPLATE: &str = include_str!("../../templates/machine_config.json.j2");

pub const RUNNER: &str = "clash_runner.sh.j2";
pub const CLOUD_INIT: &str = "cloud-init.yaml.j2";
pub const MACHINE_CONFIG: &str = "machine_config.json.j2";

/// Rendering errors
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("template error: {0}")]
    Template(#[from] minijinja::Error),

    #[error("machine config is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("machine config has no startup payload field (metadata.items[0].value)")]
    MissingStartupPayload,
}

/// Template environment with the bundled templates loaded.
pub struct TemplateRenderer {
    env: Environment<'static>,
}

impl TemplateRenderer {
    pub fn new() -> Result<Self, RenderError> {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_auto_escape_callback(|_| AutoEscape::None);
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.add_filter("shquote", script::shell_quote);

        env.add_template(RUNNER, RUNNER_TEMPLATE)?;
        env.add_template(CLOUD_INIT, CLOUD_INIT_TEMPLATE)?;
        env.add_template(MACHINE_CONFIG, MACHINE_CONFIG_TEMPLATE)?;
        Ok(Self { env })
    }

    /// Render a named template with serializable bindings.
    pub fn render<S: Serialize>(&self, name: &str, bindings: S) -> Result<String, RenderError> {
        let template = self.env.get_template(name)?;
        Ok(template.render(bindings)?)
    }
}

impl std::fmt::Debug for TemplateRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateRenderer").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minijinja::context;

    #[test]
    fn test_bundled_templates_parse() {
        assert!(TemplateRenderer::new().is_ok());
    }

    #[test]
    fn test_strict_undefined() {
        let renderer = TemplateRenderer::new().unwrap();
        let result = renderer.render(CLOUD_INIT, context! { vm_name => "x" });
        assert!(matches!(result, Err(RenderError::Template(_))));
    }

    #[test]
    fn test_unknown_template() {
        let renderer = TemplateRenderer::new().unwrap();
        assert!(renderer.render("nope.j2", context! {}).is_err());
    }
}
