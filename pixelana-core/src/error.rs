use thiserror::Error;

/// Failures surfaced by [`crate::ModelService`].
///
/// None of these are retried; the request that hit them fails.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("failed to load pipeline: {0:#}")]
    Load(anyhow::Error),
    #[error("generation failed: {0:#}")]
    Generation(anyhow::Error),
    #[error("failed to encode image: {0}")]
    Encode(#[from] image::ImageError),
    #[error("generation task aborted: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("model service is shutting down")]
    Closed,
}
