use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use pixelana_core::{GenerationRequest, ModelService, ModelVariant, ServiceError};
use serde::{de, Deserialize, Deserializer};
use serde_json::{json, Value};
use tracing::error;

pub type SharedService = Arc<ModelService>;

/// Query parameters of the inference endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct InferenceParams {
    #[serde(alias = "user_prompt")]
    pub prompt: Option<String>,
    #[serde(
        alias = "num_inference_steps",
        default,
        deserialize_with = "saturating_steps"
    )]
    pub n_steps: Option<usize>,
    pub guidance_scale: Option<f64>,
    pub seed: Option<u64>,
}

/// Parses a step count, saturating instead of failing on out-of-range
/// integers. Negative counts become 0 and are raised to 1 by clamping later.
fn parse_steps(text: &str) -> Option<usize> {
    let text = text.trim();
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if negative {
        return Some(0);
    }
    Some(digits.parse().unwrap_or(usize::MAX))
}

fn saturating_steps<'de, D>(deserializer: D) -> Result<Option<usize>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Number(n)) => Ok(Some(usize::try_from(n).unwrap_or(usize::MAX))),
        Some(Raw::Text(text)) => parse_steps(&text)
            .map(Some)
            .ok_or_else(|| de::Error::custom(format!("invalid step count: {text}"))),
    }
}

impl InferenceParams {
    pub fn into_request(self, variant: ModelVariant) -> GenerationRequest {
        GenerationRequest {
            prompt: self
                .prompt
                .unwrap_or_else(|| variant.default_prompt().to_string()),
            width: None,
            height: None,
            steps: self.n_steps,
            guidance: self.guidance_scale,
            seed: self.seed,
        }
    }
}

pub async fn web_inference(
    State(service): State<SharedService>,
    Query(params): Query<InferenceParams>,
) -> Response {
    let request = params.into_request(service.variant());
    match service.inference(request).await {
        Ok(bytes) => (
            [
                (header::CONTENT_TYPE, service.output_format().content_type()),
                (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            ],
            bytes,
        )
            .into_response(),
        Err(ServiceError::Closed) => {
            (StatusCode::SERVICE_UNAVAILABLE, "Error: shutting down").into_response()
        }
        Err(e) => {
            error!("Error generating image: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, format!("Error: {e}")).into_response()
        }
    }
}

pub async fn health(State(service): State<SharedService>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "state": service.state(),
        "variant": service.variant().to_string(),
        "in_flight": service.in_flight(),
    }))
}

pub fn router(service: SharedService) -> Router {
    Router::new()
        .route("/", get(web_inference).post(web_inference))
        .route("/health", get(health))
        .with_state(service)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fake_service;
    use axum::{body::to_bytes, http::Uri};
    use image::ImageFormat;
    use pixelana_core::LifecycleState;

    async fn call(service: &SharedService, params: InferenceParams) -> (StatusCode, String, Vec<u8>) {
        let response = web_inference(State(Arc::clone(service)), Query(params)).await;
        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, content_type, body.to_vec())
    }

    #[tokio::test]
    async fn clamps_steps_like_the_direct_call() {
        let (service, model) = fake_service(ModelVariant::Turbo);
        let params = InferenceParams {
            prompt: Some("a red cube".to_string()),
            n_steps: Some(64),
            ..Default::default()
        };
        let (status, _, _) = call(&service, params).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(model.steps_seen(), vec![10]);
    }

    #[tokio::test]
    async fn matches_direct_inference_for_seeded_variant() {
        let (service, _) = fake_service(ModelVariant::Turbo);
        let direct = service
            .inference(GenerationRequest::new("a red cube").with_steps(4))
            .await
            .unwrap();
        let params = InferenceParams {
            prompt: Some("a red cube".to_string()),
            n_steps: Some(4),
            ..Default::default()
        };
        let (_, content_type, body) = call(&service, params).await;
        assert_eq!(content_type, "image/png");
        assert_eq!(body, direct);
        assert_eq!(image::guess_format(&body).unwrap(), ImageFormat::Png);
    }

    #[tokio::test]
    async fn lightning_serves_jpeg() {
        let (service, _) = fake_service(ModelVariant::Lightning);
        let params = InferenceParams {
            prompt: Some("a red cube".to_string()),
            n_steps: Some(4),
            ..Default::default()
        };
        let (status, content_type, body) = call(&service, params).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type, "image/jpeg");
        assert!(!body.is_empty());
        assert_eq!(image::guess_format(&body).unwrap(), ImageFormat::Jpeg);
    }

    #[tokio::test]
    async fn missing_prompt_falls_back_to_variant_default() {
        let (service, model) = fake_service(ModelVariant::Turbo);
        call(&service, InferenceParams::default()).await;
        assert_eq!(model.prompts_seen(), vec!["Solana Logo".to_string()]);
        assert_eq!(model.steps_seen(), vec![4]);
    }

    #[test]
    fn legacy_parameter_names_are_accepted() {
        let params: InferenceParams =
            serde_json::from_value(json!({"user_prompt": "x", "num_inference_steps": 12}))
                .unwrap();
        assert_eq!(params.prompt.as_deref(), Some("x"));
        assert_eq!(params.n_steps, Some(12));
    }

    #[tokio::test]
    async fn generation_errors_become_500() {
        let (service, model) = fake_service(ModelVariant::Turbo);
        model.fail_with("CUDA out of memory");
        let (status, _, body) = call(&service, InferenceParams::default()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(String::from_utf8(body).unwrap().contains("out of memory"));
    }

    #[tokio::test]
    async fn health_reports_lifecycle_state() {
        let (service, _) = fake_service(ModelVariant::Lightning);
        let Json(before) = health(State(Arc::clone(&service))).await;
        assert_eq!(before["state"], "uninitialized");
        assert_eq!(before["variant"], "lightning");

        service.warm().await.unwrap();
        assert_eq!(service.state(), LifecycleState::Warm);
        let Json(after) = health(State(service)).await;
        assert_eq!(after["state"], "warm");
    }

    fn query(uri: &str) -> InferenceParams {
        let uri: Uri = uri.parse().unwrap();
        Query::<InferenceParams>::try_from_uri(&uri).unwrap().0
    }

    #[tokio::test]
    async fn oversized_step_counts_saturate_to_the_ceiling() {
        let (service, model) = fake_service(ModelVariant::Turbo);
        let params = query("http://model/?prompt=cube&n_steps=99999999999999999999999999");
        assert_eq!(params.n_steps, Some(usize::MAX));

        let (status, _, _) = call(&service, params).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(model.steps_seen(), vec![10]);
    }

    #[test]
    fn step_counts_parse_from_query_strings() {
        assert_eq!(query("http://model/?n_steps=7").n_steps, Some(7));
        assert_eq!(query("http://model/?num_inference_steps=3").n_steps, Some(3));
        assert_eq!(query("http://model/?n_steps=-2").n_steps, Some(0));
        assert_eq!(query("http://model/?prompt=x").n_steps, None);

        let uri: Uri = "http://model/?n_steps=many".parse().unwrap();
        assert!(Query::<InferenceParams>::try_from_uri(&uri).is_err());
    }

    #[tokio::test]
    async fn closed_service_answers_503() {
        let (service, _) = fake_service(ModelVariant::Turbo);
        service.close();
        let (status, _, _) = call(&service, InferenceParams::default()).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
