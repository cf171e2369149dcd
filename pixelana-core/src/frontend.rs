//! One-shot rendering of the front-end page.
//!
//! Page sources are Jinja templates rendered with HTML auto-escaping.
//! Rendering is a pure function of the source and [`FrontendVars`]; serving
//! the result is left to the caller.

use anyhow::{bail, Result};
use minijinja::{AutoEscape, Environment};
use serde::Serialize;

/// Page shipped with the binary.
pub const DEFAULT_PAGE: &str = include_str!("../assets/index.html");

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrontendVars {
    pub inference_url: String,
    pub model_name: String,
    pub default_prompt: String,
}

/// Renders `template` against `vars`. Undefined names render empty.
///
/// Values are HTML-escaped; use `| tojson` to place one inside a script.
pub fn render(template: &str, vars: &FrontendVars) -> Result<String> {
    if vars.inference_url.trim().is_empty() {
        bail!("inference_url must not be empty");
    }

    let mut env = Environment::new();
    env.set_auto_escape_callback(|_| AutoEscape::Html);
    Ok(env.render_str(template, vars)?)
}
