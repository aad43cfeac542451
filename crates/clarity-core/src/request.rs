//! Generation requests and the bounds they are checked against.
//!
//! A [`GenerationRequest`] holds caller input as given. Only a
//! [`ValidatedRequest`] can reach a model runtime, so a positive token bound
//! and an in-range temperature are guaranteed at the runtime boundary.

use std::num::NonZeroU32;

use crate::config::SamplingConfig;
use crate::error::{BridgeError, BridgeResult};

/// Upper bounds applied to every request before it is forwarded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingLimits {
    /// Largest accepted `max_tokens`, inclusive.
    pub max_tokens: u32,
    /// Largest accepted temperature, inclusive. The lower bound is always 0.
    pub max_temperature: f32,
}

impl Default for SamplingLimits {
    fn default() -> Self {
        Self::from(&SamplingConfig::default())
    }
}

impl From<&SamplingConfig> for SamplingLimits {
    fn from(cfg: &SamplingConfig) -> Self {
        Self {
            max_tokens: cfg.max_tokens,
            max_temperature: cfg.max_temperature,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub max_tokens: i32,
    pub temperature: f32,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>, max_tokens: i32, temperature: f32) -> Self {
        Self {
            prompt: prompt.into(),
            max_tokens,
            temperature,
        }
    }

    pub fn validate(&self, limits: &SamplingLimits) -> BridgeResult<ValidatedRequest<'_>> {
        validate(&self.prompt, self.max_tokens, self.temperature, limits)
    }
}

/// A request that passed validation. Borrowed from the caller's prompt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidatedRequest<'a> {
    pub prompt: &'a str,
    pub max_tokens: NonZeroU32,
    pub temperature: f32,
}

impl ValidatedRequest<'_> {
    /// Temperature 0 selects the most likely token at every step.
    pub fn is_greedy(&self) -> bool {
        self.temperature == 0.0
    }
}

/// Check caller input against `limits`. Out-of-range values are rejected,
/// never clamped. The prompt is not inspected; an empty prompt is valid.
pub fn validate<'a>(
    prompt: &'a str,
    max_tokens: i32,
    temperature: f32,
    limits: &SamplingLimits,
) -> BridgeResult<ValidatedRequest<'a>> {
    let max_tokens = u32::try_from(max_tokens)
        .ok()
        .and_then(NonZeroU32::new)
        .ok_or_else(|| {
            BridgeError::InvalidParameter(format!("max_tokens must be positive, got {max_tokens}"))
        })?;

    if max_tokens.get() > limits.max_tokens {
        return Err(BridgeError::InvalidParameter(format!(
            "max_tokens {max_tokens} exceeds limit of {}",
            limits.max_tokens
        )));
    }

    if !temperature.is_finite() || temperature < 0.0 || temperature > limits.max_temperature {
        return Err(BridgeError::InvalidParameter(format!(
            "temperature must be within [0, {}], got {temperature}",
            limits.max_temperature
        )));
    }

    Ok(ValidatedRequest {
        prompt,
        max_tokens,
        temperature,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn limits() -> SamplingLimits {
        SamplingLimits {
            max_tokens: 512,
            max_temperature: 2.0,
        }
    }

    fn kind_of(max_tokens: i32, temperature: f32) -> Option<ErrorKind> {
        validate("Hello", max_tokens, temperature, &limits())
            .err()
            .map(|e| e.kind())
    }

    #[test]
    fn accepts_typical_request() {
        let req = validate("Hello", 5, 0.0, &limits()).unwrap();
        assert_eq!(req.prompt, "Hello");
        assert_eq!(req.max_tokens.get(), 5);
        assert!(req.is_greedy());
    }

    #[test]
    fn rejects_zero_and_negative_max_tokens() {
        assert_eq!(kind_of(0, 0.0), Some(ErrorKind::InvalidParameter));
        assert_eq!(kind_of(-1, 0.0), Some(ErrorKind::InvalidParameter));
        assert_eq!(kind_of(i32::MIN, 0.0), Some(ErrorKind::InvalidParameter));
    }

    #[test]
    fn max_tokens_bound_is_inclusive() {
        assert_eq!(kind_of(1, 0.0), None);
        assert_eq!(kind_of(512, 0.0), None);
        assert_eq!(kind_of(513, 0.0), Some(ErrorKind::InvalidParameter));
    }

    #[test]
    fn temperature_range_is_closed_interval() {
        assert_eq!(kind_of(5, 0.0), None);
        assert_eq!(kind_of(5, 0.7), None);
        assert_eq!(kind_of(5, 2.0), None);
        assert_eq!(kind_of(5, -0.01), Some(ErrorKind::InvalidParameter));
        assert_eq!(kind_of(5, 2.01), Some(ErrorKind::InvalidParameter));
    }

    #[test]
    fn rejects_non_finite_temperature() {
        assert_eq!(kind_of(5, f32::NAN), Some(ErrorKind::InvalidParameter));
        assert_eq!(kind_of(5, f32::INFINITY), Some(ErrorKind::InvalidParameter));
        assert_eq!(kind_of(5, f32::NEG_INFINITY), Some(ErrorKind::InvalidParameter));
    }

    #[test]
    fn empty_prompt_is_valid() {
        let req = GenerationRequest::new("", 3, 0.0);
        let validated = req.validate(&limits()).unwrap();
        assert_eq!(validated.prompt, "");
        assert_eq!(validated.max_tokens.get(), 3);
    }

    #[test]
    fn error_message_names_offending_value() {
        let err = validate("x", -4, 0.0, &limits()).unwrap_err();
        assert!(err.message().contains("-4"));
        let err = validate("x", 4, 9.5, &limits()).unwrap_err();
        assert!(err.message().contains("9.5"));
    }

    #[test]
    fn default_limits_follow_sampling_defaults() {
        let defaults = SamplingConfig::default();
        let limits = SamplingLimits::default();
        assert_eq!(limits.max_tokens, defaults.max_tokens);
        assert_eq!(limits.max_temperature, defaults.max_temperature);
    }
}
