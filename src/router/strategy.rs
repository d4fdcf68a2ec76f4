//! Model Routing
//!
//! Maps a requested model onto the ordered upstream candidates allowed by the
//! configured substitution rules.

use crate::config::{ModelRule, Provider, SelectionPolicy};
use crate::error::{Result, RoxyError};
use parking_lot::{Mutex, RwLock};
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// A (model, provider) pair the gateway may attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub model: String,
    pub provider: Provider,
}

impl Candidate {
    /// Candidate for a model name, provider inferred from the name
    pub fn for_model(model: impl Into<String>) -> Self {
        let model = model.into();
        let provider = Provider::infer(&model);
        Self { model, provider }
    }
}

impl std::fmt::Display for Candidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.model, self.provider)
    }
}

/// A validated substitution rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingRule {
    source_model: String,
    target_models: Vec<String>,
    policy: SelectionPolicy,
}

impl RoutingRule {
    /// Build a rule; the target list must be non-empty
    pub fn new(
        source_model: impl Into<String>,
        target_models: Vec<String>,
        policy: SelectionPolicy,
    ) -> Result<Self> {
        let source_model = source_model.into();
        if source_model.trim().is_empty() {
            return Err(RoxyError::Config("source_model is required".to_string()));
        }
        if target_models.is_empty() {
            return Err(RoxyError::Config(format!(
                "rule for '{}' needs at least one target model",
                source_model
            )));
        }
        Ok(Self {
            source_model,
            target_models,
            policy,
        })
    }

    pub fn source_model(&self) -> &str {
        &self.source_model
    }

    pub fn target_models(&self) -> &[String] {
        &self.target_models
    }

    pub fn policy(&self) -> SelectionPolicy {
        self.policy
    }
}

impl TryFrom<&ModelRule> for RoutingRule {
    type Error = RoxyError;

    fn try_from(rule: &ModelRule) -> Result<Self> {
        RoutingRule::new(
            rule.source_model.clone(),
            rule.target_models.clone(),
            rule.selection_policy,
        )
    }
}

/// Outcome of resolving a requested model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Candidates in the order they may be attempted; never empty
    pub candidates: Vec<Candidate>,

    /// Policy of the matching rule, `None` when no rule matched
    pub policy: Option<SelectionPolicy>,
}

impl Resolution {
    /// Whether later candidates may be tried after an upstream rate limit
    pub fn allows_fallback(&self) -> bool {
        self.policy == Some(SelectionPolicy::Fallback)
    }
}

/// Rule table plus the shared round-robin cursors
#[derive(Debug, Default)]
pub struct RoutingEngine {
    rules: RwLock<HashMap<String, Arc<RoutingRule>>>,
    cursors: Mutex<HashMap<String, usize>>,
}

impl RoutingEngine {
    /// Build from configuration; when a source model repeats, the first rule wins
    pub fn new(rules: &[ModelRule]) -> Result<Self> {
        let mut table = HashMap::new();
        for rule in rules {
            let rule = RoutingRule::try_from(rule)?;
            table
                .entry(rule.source_model.clone())
                .or_insert_with(|| Arc::new(rule));
        }
        Ok(Self {
            rules: RwLock::new(table),
            cursors: Mutex::new(HashMap::new()),
        })
    }

    /// Candidates for `source_model`
    pub fn resolve(&self, source_model: &str) -> Resolution {
        let rule = self.rules.read().get(source_model).cloned();

        let Some(rule) = rule else {
            return Resolution {
                candidates: vec![Candidate::for_model(source_model)],
                policy: None,
            };
        };

        let candidates = match rule.policy {
            SelectionPolicy::Random => {
                let model = rule
                    .target_models
                    .choose(&mut rand::thread_rng())
                    .unwrap_or(&rule.target_models[0]);
                vec![Candidate::for_model(model.as_str())]
            }
            SelectionPolicy::RoundRobin => {
                let idx = self.next_index(source_model, rule.target_models.len());
                vec![Candidate::for_model(rule.target_models[idx].as_str())]
            }
            SelectionPolicy::Fallback => rule
                .target_models
                .iter()
                .map(|m| Candidate::for_model(m.as_str()))
                .collect(),
        };

        Resolution {
            candidates,
            policy: Some(rule.policy),
        }
    }

    /// Advance the cursor for `source_model` and return the position to use
    fn next_index(&self, source_model: &str, len: usize) -> usize {
        let mut cursors = self.cursors.lock();
        let cursor = cursors.entry(source_model.to_string()).or_insert(0);
        let idx = *cursor % len;
        *cursor = (idx + 1) % len;
        idx
    }

    /// Insert or replace the rule for its source model
    pub fn add_rule(&self, rule: RoutingRule) {
        let source = rule.source_model.clone();
        info!(
            source_model = %source,
            policy = %rule.policy,
            targets = ?rule.target_models,
            "routing rule set"
        );
        let mut rules = self.rules.write();
        rules.insert(source.clone(), Arc::new(rule));
        self.cursors.lock().remove(&source);
    }

    /// Remove the rule for `source_model`, returning whether one existed
    pub fn remove_rule(&self, source_model: &str) -> bool {
        let mut rules = self.rules.write();
        let existed = rules.remove(source_model).is_some();
        self.cursors.lock().remove(source_model);
        if existed {
            info!(source_model, "routing rule removed");
        }
        existed
    }

    /// All rules, sorted by source model
    pub fn rules(&self) -> Vec<RoutingRule> {
        let mut rules: Vec<RoutingRule> = self
            .rules
            .read()
            .values()
            .map(|r| (**r).clone())
            .collect();
        rules.sort_by(|a, b| a.source_model.cmp(&b.source_model));
        rules
    }
}
