use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use axum::{extract::State, response::Html, routing::get, Router};
use clap::Args;
use pixelana_core::{
    frontend::{render, FrontendVars, DEFAULT_PAGE},
    ModelVariant,
};
use tracing::info;

#[derive(Args, Debug, Clone)]
pub struct FrontendArgs {
    /// Public URL of the model service's inference endpoint
    #[arg(long, env = "PIXELANA_INFERENCE_URL")]
    pub inference_url: String,

    /// Variant the model service runs; picks the page's title and prompt
    #[arg(long, env = "PIXELANA_VARIANT", default_value = "turbo")]
    pub variant: ModelVariant,

    /// Title shown on the page
    #[arg(long)]
    pub model_name: Option<String>,

    /// Prompt pre-filled in the page
    #[arg(long)]
    pub default_prompt: Option<String>,

    /// Jinja page template to render instead of the built-in one
    #[arg(long)]
    pub page: Option<PathBuf>,
}

impl FrontendArgs {
    pub fn vars(&self) -> FrontendVars {
        FrontendVars {
            inference_url: self.inference_url.clone(),
            model_name: self
                .model_name
                .clone()
                .unwrap_or_else(|| self.variant.display_name().to_string()),
            default_prompt: self
                .default_prompt
                .clone()
                .unwrap_or_else(|| self.variant.page_prompt().to_string()),
        }
    }

    /// Reads the page source and renders it once.
    pub async fn render_page(&self) -> Result<String> {
        let template = match &self.page {
            Some(path) => tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("failed to read page {}", path.display()))?,
            None => DEFAULT_PAGE.to_string(),
        };
        let html = render(&template, &self.vars()).context("failed to render page")?;
        info!(inference_url = %self.inference_url, bytes = html.len(), "Rendered front-end page");
        Ok(html)
    }
}

async fn index(State(page): State<Arc<str>>) -> Html<String> {
    Html(page.to_string())
}

/// Serves an already rendered page.
pub fn router(page: String) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/index.html", get(index))
        .with_state(Arc::<str>::from(page))
}
