//! Design-vector construction from subject attributes.

use std::collections::HashMap;
use std::fmt;

use super::types::PredictionError;

/// Fills the design vector of a model for one subject.
///
/// Slots listed in `reserved` belong to the occupancy covariate and are
/// written by the engine; builders leave them untouched.
pub trait EffectVectorBuilder<S: ?Sized> {
    /// Whether a covariate value can be produced for `effect_id`.
    fn supports(&self, effect_id: u32) -> bool;

    /// # Errors
    ///
    /// Returns `PredictionError` for an unknown effect id or a design vector
    /// whose length differs from `effect_ids`.
    fn fill(
        &self,
        effect_ids: &[u32],
        subject: &S,
        design: &mut [f64],
        reserved: &[usize],
    ) -> Result<(), PredictionError>;
}

/// Builder backed by one extractor closure per effect id.
pub struct EffectRegistry<S: ?Sized> {
    extractors: HashMap<u32, Box<dyn Fn(&S) -> f64 + Send + Sync>>,
}

impl<S: ?Sized> Default for EffectRegistry<S> {
    fn default() -> Self {
        Self {
            extractors: HashMap::new(),
        }
    }
}

impl<S: ?Sized> fmt::Debug for EffectRegistry<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<_> = self.extractors.keys().copied().collect();
        ids.sort_unstable();
        f.debug_struct("EffectRegistry")
            .field("effect_ids", &ids)
            .finish()
    }
}

impl<S: ?Sized> EffectRegistry<S> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `extractor` for `effect_id`, replacing any previous one.
    pub fn register<F>(&mut self, effect_id: u32, extractor: F)
    where
        F: Fn(&S) -> f64 + Send + Sync + 'static,
    {
        self.extractors.insert(effect_id, Box::new(extractor));
    }

    #[must_use]
    pub fn with_effect<F>(mut self, effect_id: u32, extractor: F) -> Self
    where
        F: Fn(&S) -> f64 + Send + Sync + 'static,
    {
        self.register(effect_id, extractor);
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.extractors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.extractors.is_empty()
    }
}

impl<S: ?Sized> EffectVectorBuilder<S> for EffectRegistry<S> {
    fn supports(&self, effect_id: u32) -> bool {
        self.extractors.contains_key(&effect_id)
    }

    fn fill(
        &self,
        effect_ids: &[u32],
        subject: &S,
        design: &mut [f64],
        reserved: &[usize],
    ) -> Result<(), PredictionError> {
        if design.len() != effect_ids.len() {
            return Err(PredictionError::DesignLengthMismatch {
                expected: effect_ids.len(),
                found: design.len(),
            });
        }
        for (slot, (effect_id, value)) in effect_ids.iter().zip(design.iter_mut()).enumerate() {
            if reserved.contains(&slot) {
                continue;
            }
            let extractor = self
                .extractors
                .get(effect_id)
                .ok_or(PredictionError::UnknownEffect {
                    effect_id: *effect_id,
                })?;
            *value = extractor(subject);
        }
        Ok(())
    }
}
