use serde::{Deserialize, Serialize};

use crate::{
    api::{Payload, VariantDefinition},
    normalize::{normalized_value, VARIANT_SEED},
    strategy::random_id,
    Context,
};

/// Name of the variant returned when no variant applies.
pub const DISABLED_VARIANT_NAME: &str = "disabled";

/// A resolved variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variant {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Payload>,
    /// Whether a variant was selected.
    pub enabled: bool,
    /// Whether the owning feature is enabled for the evaluated context.
    #[serde(default)]
    pub feature_enabled: bool,
}

impl Variant {
    /// The variant returned when the feature is disabled or defines no usable variant.
    pub fn disabled() -> Variant {
        Variant {
            name: DISABLED_VARIANT_NAME.to_owned(),
            payload: None,
            enabled: false,
            feature_enabled: false,
        }
    }

    fn from_definition(definition: &VariantDefinition) -> Variant {
        Variant {
            name: definition.name.clone(),
            payload: definition.payload.clone(),
            enabled: true,
            feature_enabled: false,
        }
    }
}

impl Default for Variant {
    fn default() -> Self {
        Variant::disabled()
    }
}

/// Select a variant for `context` among `variants`, bucketing within `group_id`.
///
/// Overrides are checked first and the first variant, in order, with a matching override wins.
/// Otherwise the context is hashed onto the cumulative weights. Returns [`Variant::disabled`] when
/// there are no variants or all weights are zero.
pub fn select_variant(group_id: &str, variants: &[VariantDefinition], context: &Context) -> Variant {
    if variants.is_empty() {
        return Variant::disabled();
    }

    if let Some(definition) = override_variant(variants, context) {
        return Variant::from_definition(definition);
    }

    let total_weight = variants
        .iter()
        .fold(0u32, |total, v| total.saturating_add(v.weight));
    if total_weight == 0 {
        return Variant::disabled();
    }

    let stickiness = variants[0].stickiness.as_deref();
    let target = normalized_value(
        &stickiness_id(stickiness, context),
        group_id,
        total_weight,
        VARIANT_SEED,
    );

    let mut counter = 0u32;
    for definition in variants {
        counter = counter.saturating_add(definition.weight);
        if counter >= target {
            return Variant::from_definition(definition);
        }
    }

    // Unreachable: `target` never exceeds `total_weight`.
    Variant::disabled()
}

fn override_variant<'a>(
    variants: &'a [VariantDefinition],
    context: &Context,
) -> Option<&'a VariantDefinition> {
    variants.iter().find(|variant| {
        variant.overrides.iter().any(|o| {
            context
                .field(&o.context_name)
                .is_some_and(|value| o.values.iter().any(|v| v == value))
        })
    })
}

fn stickiness_id(stickiness: Option<&str>, context: &Context) -> String {
    match stickiness {
        Some(field) if !field.is_empty() && field != "default" => context
            .field(field)
            .filter(|v| !v.is_empty())
            .map(str::to_owned)
            .unwrap_or_else(random_id),
        _ => [
            &context.user_id,
            &context.session_id,
            &context.remote_address,
        ]
        .into_iter()
        .flatten()
        .find(|v| !v.is_empty())
        .cloned()
        .unwrap_or_else(random_id),
    }
}
