//! Strategy registry: a closed map from strategy codes to factories.
//!
//! Custom strategies must be pre-registered compiled variants; there is no
//! dynamic code path.

use crate::error::EngineError;
use crate::strategy::{
    Evaluate, RoleDivisionEvaluator, RoleDivisionParams, TrendEvaluator, TrendParams,
};
use anyhow::Result;
use serde_json::Value;
use std::collections::HashMap;

pub type EvaluatorFactory = Box<dyn Fn(&Value) -> Result<Box<dyn Evaluate>> + Send + Sync>;

fn params_from<T: serde::de::DeserializeOwned + Default>(value: &Value) -> Result<T> {
    if value.is_null() {
        return Ok(T::default());
    }
    Ok(serde_json::from_value(value.clone())?)
}

/// Maps strategy codes to evaluator factories.
pub struct StrategyRegistry {
    factories: HashMap<String, EvaluatorFactory>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        let mut registry = Self { factories: HashMap::new() };

        registry.register("trend", |params| {
            let params: TrendParams = params_from(params)?;
            Ok(Box::new(TrendEvaluator::new(params)))
        });

        registry.register("role_division", |params| {
            let params: RoleDivisionParams = params_from(params)?;
            Ok(Box::new(RoleDivisionEvaluator::new(params)))
        });

        registry
    }

    pub fn register<F>(&mut self, code: &str, factory: F)
    where
        F: Fn(&Value) -> Result<Box<dyn Evaluate>> + Send + Sync + 'static,
    {
        self.factories.insert(code.to_lowercase(), Box::new(factory));
    }

    /// Instantiate the evaluator registered under `code`.
    pub fn create(&self, code: &str, params: &Value) -> Result<Box<dyn Evaluate>, EngineError> {
        let factory = self
            .factories
            .get(&code.to_lowercase())
            .ok_or_else(|| EngineError::UnknownStrategy(code.to_string()))?;
        factory(params).map_err(EngineError::Internal)
    }

    pub fn available(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    pub fn has_strategy(&self, code: &str) -> bool {
        self.factories.contains_key(&code.to_lowercase())
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::new()
    }
}
