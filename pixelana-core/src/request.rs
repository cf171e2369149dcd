use serde::{Deserialize, Serialize};

use crate::ModelVariant;

/// Upper bound on denoising steps per request.
pub const MAX_STEPS: usize = 10;

/// Clamps a requested step count into `1..=MAX_STEPS`.
pub fn clamp_steps(steps: usize) -> usize {
    steps.clamp(1, MAX_STEPS)
}

// Define the request types.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, PartialOrd)]
pub struct GenerationRequest {
    pub prompt: String,
    pub width: Option<usize>,
    pub height: Option<usize>,
    pub steps: Option<usize>,
    pub guidance: Option<f64>,
    pub seed: Option<u64>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            width: None,
            height: None,
            steps: None,
            guidance: None,
            seed: None,
        }
    }

    pub fn with_steps(mut self, steps: usize) -> Self {
        self.steps = Some(steps);
        self
    }

    pub fn with_guidance(mut self, guidance: f64) -> Self {
        self.guidance = Some(guidance);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Fills every unset field from the variant and clamps the step count.
    ///
    /// The result has all optional fields populated except `seed`, which stays
    /// `None` for variants that sample unseeded.
    pub fn resolve(self, variant: ModelVariant) -> Self {
        let (default_width, default_height) = variant.default_size();
        Self {
            prompt: self.prompt,
            width: Some(self.width.unwrap_or(default_width)),
            height: Some(self.height.unwrap_or(default_height)),
            steps: Some(clamp_steps(self.steps.unwrap_or(variant.default_steps()))),
            guidance: Some(self.guidance.unwrap_or(variant.default_guidance())),
            seed: self.seed.or(variant.default_seed()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_above_ceiling_are_clamped() {
        assert_eq!(clamp_steps(11), MAX_STEPS);
        assert_eq!(clamp_steps(1_000), MAX_STEPS);
        assert_eq!(clamp_steps(10), 10);
        assert_eq!(clamp_steps(4), 4);
        assert_eq!(clamp_steps(0), 1);
    }

    #[test]
    fn resolve_fills_turbo_defaults() {
        let resolved = GenerationRequest::new("a red cube").resolve(ModelVariant::Turbo);
        assert_eq!(resolved.steps, Some(4));
        assert_eq!(resolved.guidance, Some(0.0));
        assert_eq!(resolved.seed, Some(0));
        assert_eq!((resolved.width, resolved.height), (Some(512), Some(512)));
    }

    #[test]
    fn resolve_keeps_lightning_unseeded() {
        let resolved = GenerationRequest::new("a red cube")
            .with_steps(25)
            .resolve(ModelVariant::Lightning);
        assert_eq!(resolved.steps, Some(MAX_STEPS));
        assert_eq!(resolved.seed, None);
        assert_eq!((resolved.width, resolved.height), (Some(1024), Some(1024)));
    }

    #[test]
    fn explicit_fields_override_defaults() {
        let resolved = GenerationRequest::new("x")
            .with_seed(42)
            .with_guidance(1.5)
            .resolve(ModelVariant::Lightning);
        assert_eq!(resolved.seed, Some(42));
        assert_eq!(resolved.guidance, Some(1.5));
    }
}
