//! Model gateway: retry, backoff and primary/fallback switching for generation calls.
//!
//! Every role (outline, content, review) is bound to a [`ModelProfile`]: a
//! primary model, an optional fallback, a [`RetryPolicy`] and generation
//! parameters. [`ModelGateway::generate`] either returns non-empty text or a
//! [`ForgeError::Generation`] carrying every failed attempt.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use forge_model::{GenerationModel, GenerationParams, ModelError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{BackoffKind, ForgeConfig, GenerationConfig, RoleModelConfig};
use crate::errors::ForgeError;
use crate::model_adapter::IntoForgeResult;

// ============================================================================
// GenerationRole
// ============================================================================

/// What a generation call is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationRole {
    /// Chapter outlines.
    Outline,
    /// Chapter content and summaries.
    Content,
    /// Consistency reviews.
    Review,
}

impl GenerationRole {
    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Outline => "outline",
            Self::Content => "content",
            Self::Review => "review",
        }
    }
}

impl fmt::Display for GenerationRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// RetryPolicy
// ============================================================================

/// Delay before the next attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay every time.
    Fixed {
        /// Delay between attempts.
        delay: Duration,
    },
    /// `base · 2^(n−1)`, capped at `max`.
    Exponential {
        /// Delay after the first failure.
        base: Duration,
        /// Upper bound.
        max: Duration,
    },
}

impl Backoff {
    /// Delay after failed attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match *self {
            Self::Fixed { delay } => delay,
            Self::Exponential { base, max } => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                base.checked_mul(factor).unwrap_or(max).min(max)
            }
        }
    }
}

/// Bounded retry for one model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per model, at least 1.
    pub max_attempts: u32,
    /// Delay between attempts.
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// Fixed-delay policy.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Backoff::Fixed { delay },
        }
    }

    /// Exponential policy.
    pub fn exponential(max_attempts: u32, base: Duration, max: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Backoff::Exponential { base, max },
        }
    }

    /// Policy from the generation settings and an optional role override.
    pub fn from_config(generation: &GenerationConfig, role: &RoleModelConfig) -> Self {
        let over = role.retry.clone().unwrap_or_default();
        let attempts = over.max_retries.unwrap_or(generation.max_retries);
        let delay = Duration::from_secs(over.retry_delay_secs.unwrap_or(generation.retry_delay_secs));
        match generation.backoff {
            BackoffKind::Fixed => Self::fixed(attempts, delay),
            BackoffKind::Exponential => {
                Self::exponential(attempts, delay, Duration::from_secs(generation.max_backoff_secs))
            }
        }
    }
}

// ============================================================================
// Sleeper
// ============================================================================

/// Waits between attempts. Tests substitute a recorder.
pub trait Sleeper: Send + Sync + fmt::Debug {
    /// Block for `duration`.
    fn sleep(&self, duration: Duration);
}

/// Sleeps the current thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

// ============================================================================
// Failure chain
// ============================================================================

/// One failed attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureRecord {
    /// Model that failed.
    pub model_id: String,
    /// Attempt number for that model (1-based).
    pub attempt: u32,
    /// Whether the model was the fallback.
    pub fallback: bool,
    /// Whether the failure was worth retrying.
    pub transient: bool,
    /// Error text.
    pub message: String,
}

/// Every failed attempt of a generation call, in order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FailureChain(Vec<FailureRecord>);

impl FailureChain {
    /// Append a record.
    pub fn push(&mut self, record: FailureRecord) {
        self.0.push(record);
    }

    /// Records in order.
    pub fn records(&self) -> &[FailureRecord] {
        &self.0
    }

    /// Number of failed attempts.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if nothing failed.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Distinct models in the chain, in first-failure order.
    pub fn models(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for r in &self.0 {
            if !seen.contains(&r.model_id.as_str()) {
                seen.push(&r.model_id);
            }
        }
        seen
    }
}

impl fmt::Display for FailureChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("no attempts made");
        }
        for (i, r) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            let kind = if r.fallback { "fallback" } else { "primary" };
            write!(f, "{} `{}` attempt {}: {}", kind, r.model_id, r.attempt, r.message)?;
        }
        Ok(())
    }
}

// ============================================================================
// Outcome
// ============================================================================

/// Result of a gateway call.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationOutcome {
    /// A model returned non-empty text.
    Completed {
        /// Generated text.
        text: String,
        /// Model that produced it.
        model_id: String,
        /// Attempts across both models, including the successful one.
        attempts: u32,
        /// Whether the fallback produced the text.
        used_fallback: bool,
        /// Attempts that failed before the successful one.
        failures: FailureChain,
    },
    /// Every attempt failed.
    Exhausted(FailureChain),
}

// ============================================================================
// ModelProfile
// ============================================================================

/// A primary model with its optional fallback.
#[derive(Debug, Clone)]
pub struct FallbackModel {
    primary: Arc<dyn GenerationModel>,
    fallback: Option<Arc<dyn GenerationModel>>,
}

impl FallbackModel {
    /// Pair a primary with an optional fallback.
    pub fn new(primary: Arc<dyn GenerationModel>, fallback: Option<Arc<dyn GenerationModel>>) -> Self {
        Self { primary, fallback }
    }

    /// The primary model.
    pub fn primary(&self) -> &Arc<dyn GenerationModel> {
        &self.primary
    }

    /// The fallback model.
    pub fn fallback(&self) -> Option<&Arc<dyn GenerationModel>> {
        self.fallback.as_ref()
    }
}

/// Models, retry policy and parameters bound to a role. Immutable for a run.
#[derive(Debug, Clone)]
pub struct ModelProfile {
    /// Role served.
    pub role: GenerationRole,
    /// Primary and fallback.
    pub models: FallbackModel,
    /// Retry policy applied to each model.
    pub retry_policy: RetryPolicy,
    /// Generation parameters.
    pub params: GenerationParams,
}

impl ModelProfile {
    /// Profile with only a primary model.
    pub fn new(
        role: GenerationRole,
        primary: Arc<dyn GenerationModel>,
        retry_policy: RetryPolicy,
        params: GenerationParams,
    ) -> Self {
        Self {
            role,
            models: FallbackModel::new(primary, None),
            retry_policy,
            params,
        }
    }

    /// Attach a fallback model.
    pub fn with_fallback(mut self, fallback: Arc<dyn GenerationModel>) -> Self {
        self.models.fallback = Some(fallback);
        self
    }

    /// Build a profile from configuration.
    ///
    /// # Errors
    ///
    /// Missing credentials or an invalid endpoint surface here as
    /// [`ForgeError::InvalidConfig`] rather than as retried call failures.
    pub fn from_config(
        role: GenerationRole,
        models: &RoleModelConfig,
        generation: &GenerationConfig,
    ) -> Result<Self, ForgeError> {
        let primary: Arc<dyn GenerationModel> =
            Arc::from(forge_model::create_generation_model(&models.primary).into_forge_result()?);
        let params = GenerationParams {
            temperature: models.temperature,
            max_tokens: models.max_tokens,
        };
        let mut profile = Self::new(role, primary, RetryPolicy::from_config(generation, models), params);

        if let Some(endpoint) = models.active_fallback() {
            let fallback: Arc<dyn GenerationModel> =
                Arc::from(forge_model::create_generation_model(endpoint).into_forge_result()?);
            profile = profile.with_fallback(fallback);
        }
        Ok(profile)
    }
}

// ============================================================================
// ModelGateway
// ============================================================================

/// Dispatches generation calls to role profiles.
#[derive(Debug, Clone)]
pub struct ModelGateway {
    profiles: HashMap<GenerationRole, ModelProfile>,
    sleeper: Arc<dyn Sleeper>,
}

impl ModelGateway {
    /// Create a gateway without profiles.
    pub fn new(sleeper: Arc<dyn Sleeper>) -> Self {
        Self {
            profiles: HashMap::new(),
            sleeper,
        }
    }

    /// Register a profile for its role.
    pub fn with_profile(mut self, profile: ModelProfile) -> Self {
        self.profiles.insert(profile.role, profile);
        self
    }

    /// Build outline, content and review profiles from configuration.
    ///
    /// Reviews share the content models.
    pub fn from_config(config: &ForgeConfig) -> Result<Self, ForgeError> {
        let outline =
            ModelProfile::from_config(GenerationRole::Outline, &config.models.outline, &config.generation)?;
        let content =
            ModelProfile::from_config(GenerationRole::Content, &config.models.content, &config.generation)?;
        let review = ModelProfile {
            role: GenerationRole::Review,
            ..content.clone()
        };
        Ok(Self::new(Arc::new(ThreadSleeper))
            .with_profile(outline)
            .with_profile(content)
            .with_profile(review))
    }

    /// Profile bound to `role`.
    pub fn profile(&self, role: GenerationRole) -> Option<&ModelProfile> {
        self.profiles.get(&role)
    }

    /// Whether `role` has a profile.
    pub fn has_role(&self, role: GenerationRole) -> bool {
        self.profiles.contains_key(&role)
    }

    /// Generate with the role's parameters.
    pub fn generate(&self, role: GenerationRole, prompt: &str) -> Result<String, ForgeError> {
        let params = self.require(role)?.params;
        self.generate_with(role, prompt, &params)
    }

    /// Generate with explicit parameters.
    ///
    /// # Errors
    ///
    /// [`ForgeError::Generation`] when primary and fallback are exhausted.
    pub fn generate_with(
        &self,
        role: GenerationRole,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, ForgeError> {
        match self.try_generate(role, prompt, params)? {
            GenerationOutcome::Completed { text, .. } => Ok(text),
            GenerationOutcome::Exhausted(chain) => Err(ForgeError::Generation {
                role: role.to_string(),
                chain,
            }),
        }
    }

    /// Run the retry and fallback sequence and return the tagged outcome.
    ///
    /// Only a missing profile is an `Err`.
    pub fn try_generate(
        &self,
        role: GenerationRole,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<GenerationOutcome, ForgeError> {
        let profile = self.require(role)?;
        let policy = profile.retry_policy;
        let mut chain = FailureChain::default();

        let primary = profile.models.primary();
        if let Some(text) = self.attempt_model(primary.as_ref(), false, prompt, params, &policy, &mut chain) {
            return Ok(GenerationOutcome::Completed {
                text,
                model_id: primary.model_id().to_string(),
                attempts: chain.len() as u32 + 1,
                used_fallback: false,
                failures: chain,
            });
        }

        if let Some(fallback) = profile.models.fallback() {
            warn!(
                role = %role,
                primary = primary.model_id(),
                fallback = fallback.model_id(),
                failures = chain.len(),
                "Primary model exhausted, switching to fallback"
            );
            if let Some(text) =
                self.attempt_model(fallback.as_ref(), true, prompt, params, &policy, &mut chain)
            {
                info!(role = %role, model = fallback.model_id(), "Fallback model succeeded");
                return Ok(GenerationOutcome::Completed {
                    text,
                    model_id: fallback.model_id().to_string(),
                    attempts: chain.len() as u32 + 1,
                    used_fallback: true,
                    failures: chain,
                });
            }
        }

        warn!(role = %role, failures = chain.len(), "Generation exhausted");
        Ok(GenerationOutcome::Exhausted(chain))
    }

    fn require(&self, role: GenerationRole) -> Result<&ModelProfile, ForgeError> {
        self.profiles.get(&role).ok_or_else(|| {
            ForgeError::invalid_config(
                format!("no model configured for role `{}`", role),
                "Configure models.outline and models.content in novelforge.yaml",
            )
        })
    }

    fn attempt_model(
        &self,
        model: &dyn GenerationModel,
        fallback: bool,
        prompt: &str,
        params: &GenerationParams,
        policy: &RetryPolicy,
        chain: &mut FailureChain,
    ) -> Option<String> {
        for attempt in 1..=policy.max_attempts {
            debug!(model = model.model_id(), attempt, fallback, "Generation attempt");

            let error = match model.generate(prompt, params) {
                Ok(text) if !text.trim().is_empty() => return Some(text),
                Ok(_) => ModelError::empty_response(model.model_id()),
                Err(e) => e,
            };

            let transient = error.is_transient();
            debug!(model = model.model_id(), attempt, transient, error = %error, "Generation attempt failed");
            chain.push(FailureRecord {
                model_id: model.model_id().to_string(),
                attempt,
                fallback,
                transient,
                message: error.to_string(),
            });

            if !transient {
                warn!(model = model.model_id(), error = %error, "Non-transient model failure, not retrying");
                return None;
            }
            if attempt < policy.max_attempts {
                self.sleeper.sleep(policy.backoff.delay_for(attempt));
            }
        }
        None
    }
}
