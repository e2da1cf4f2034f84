//! Feature evaluation over a single snapshot.
use std::{
    collections::HashSet,
    sync::{Mutex, PoisonError},
};

use serde::{Deserialize, Serialize};

use crate::{
    api::{Constraint, Dependency, Feature, Strategy},
    constraints,
    events::EventSender,
    feature_store::Snapshot,
    strategy::{StrategyRegistry, PARAM_GROUP_ID},
    variant::select_variant,
    Context, Error, Variant,
};

/// Outcome of evaluating a feature.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evaluation {
    pub enabled: bool,
    pub variant: Variant,
}

impl Evaluation {
    pub(crate) fn disabled() -> Evaluation {
        Evaluation {
            enabled: false,
            variant: Variant::disabled(),
        }
    }

    fn enabled(mut variant: Variant) -> Evaluation {
        variant.feature_enabled = true;
        Evaluation {
            enabled: true,
            variant,
        }
    }
}

/// Remembers which diagnostics have been reported, so that data-driven problems hit on every
/// evaluation are surfaced only once.
#[derive(Debug, Default)]
pub(crate) struct WarnOnce {
    seen: Mutex<HashSet<String>>,
}

impl WarnOnce {
    /// Returns `true` the first time `key` is seen.
    pub fn first(&self, key: String) -> bool {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key)
    }
}

pub(crate) struct Evaluator<'a> {
    pub snapshot: &'a Snapshot,
    pub strategies: &'a StrategyRegistry,
    pub warnings: &'a WarnOnce,
    pub events: &'a EventSender,
}

impl Evaluator<'_> {
    /// Evaluate `feature`, including its parent dependencies.
    pub fn evaluate(&self, feature: &Feature, context: &Context) -> Evaluation {
        let satisfied = feature
            .dependencies
            .iter()
            .all(|dependency| self.is_dependency_satisfied(dependency, context));
        if !satisfied {
            return Evaluation::disabled();
        }
        self.evaluate_feature(feature, context)
    }

    fn evaluate_feature(&self, feature: &Feature, context: &Context) -> Evaluation {
        if !feature.enabled {
            return Evaluation::disabled();
        }

        if feature.strategies.is_empty() {
            return Evaluation::enabled(select_variant(
                &feature.name,
                &feature.variants,
                context,
            ));
        }

        let Some(strategy) = feature
            .strategies
            .iter()
            .find(|strategy| self.is_strategy_enabled(feature, strategy, context))
        else {
            return Evaluation::disabled();
        };

        let variant = if strategy.variants.is_empty() {
            select_variant(&feature.name, &feature.variants, context)
        } else {
            let group_id = strategy
                .parameters
                .get_str(PARAM_GROUP_ID)
                .unwrap_or_else(|| feature.name.clone());
            select_variant(&group_id, &strategy.variants, context)
        };
        Evaluation::enabled(variant)
    }

    fn is_strategy_enabled(&self, feature: &Feature, strategy: &Strategy, context: &Context) -> bool {
        let Some(implementation) = self.strategies.get(&strategy.name) else {
            self.warn_once(
                format!("strategy:{}", strategy.name),
                Error::UnknownStrategy(strategy.name.clone()),
            );
            return false;
        };

        let mut segment_constraints: Vec<&Constraint> = Vec::new();
        for &segment_id in &strategy.segments {
            match self.snapshot.segment(segment_id) {
                Some(constraints) => segment_constraints.extend(constraints),
                None => {
                    self.error_once(
                        format!("segment:{}:{segment_id}", feature.name),
                        Error::SegmentNotFound {
                            feature: feature.name.clone(),
                            segment_id,
                        },
                    );
                    return false;
                }
            }
        }

        match constraints::check(context, segment_constraints.into_iter().chain(&strategy.constraints)) {
            Ok(true) => implementation.is_enabled(&strategy.parameters, context),
            Ok(false) => false,
            Err(source) => {
                self.error_once(
                    format!("constraint:{}:{}", feature.name, source.kind()),
                    Error::Evaluation {
                        feature: feature.name.clone(),
                        source,
                    },
                );
                false
            }
        }
    }

    /// Parents are evaluated one level deep: a parent that has dependencies of its own is never
    /// satisfied.
    fn is_dependency_satisfied(&self, dependency: &Dependency, context: &Context) -> bool {
        let Some(parent) = self.snapshot.feature(&dependency.feature) else {
            self.warn_once(
                format!("parent:{}", dependency.feature),
                Error::ParentNotFound(dependency.feature.clone()),
            );
            return false;
        };
        if !parent.dependencies.is_empty() {
            log::debug!(target: "unleash", parent:display = parent.name; "transitive dependencies are not supported");
            return false;
        }

        let evaluation = self.evaluate_feature(parent, context);
        if dependency.enabled == Some(false) {
            return !evaluation.enabled;
        }
        evaluation.enabled
            && (dependency.variants.is_empty()
                || dependency.variants.contains(&evaluation.variant.name))
    }

    fn warn_once(&self, key: String, warning: Error) {
        if self.warnings.first(key) {
            self.events.warning(warning);
        }
    }

    fn error_once(&self, key: String, error: Error) {
        if self.warnings.first(key) {
            self.events.error(error);
        }
    }
}
