//! A client-side SDK for Unleash-compatible feature toggle servers.
//!
//! # Overview
//!
//! The SDK revolves around a [`Client`] that keeps a local copy of all feature toggles and
//! evaluates them for a [`Context`] without any network round-trip. Features are refreshed by a
//! background thread that revalidates them with the server on an interval and persists the last
//! known copy to disk (see [`Storage`]). Evaluations are counted and reported back to the server
//! periodically.
//!
//! A feature is enabled when one of its activation [`Strategy`]s is enabled and all of that
//! strategy's constraints hold. Enabled features may resolve a weighted [`Variant`].
//!
//! ```no_run
//! # use unleash_client::{ClientConfig, Context, FeatureOptions, VariantOptions};
//! let client = ClientConfig::new("my-app", "http://localhost:4242/api")
//!     .custom_header("Authorization", "client-token")
//!     .to_client()?;
//! client.wait_for_ready()?;
//!
//! let context = Context::new().user_id("user-1");
//! let enabled = client.is_enabled("new-checkout", &FeatureOptions::new().context(&context));
//! let variant = client.get_variant("checkout-button", &VariantOptions::new().context(&context));
//! # Ok::<(), unleash_client::Error>(())
//! ```
//!
//! # Error Handling
//!
//! Errors are represented by the [`Error`] enum. Only client construction and a few queries return
//! them. Evaluation never fails: data-driven problems (malformed constraints, missing segments,
//! unknown strategies) make the evaluation fail closed and are reported as [`Event`]s to the
//! configured [`Listener`], as are background network failures.
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate for logging messages, all
//! under the `unleash` target. The default listener, [`LogListener`], forwards events to `log` as
//! well.

#![warn(rustdoc::missing_crate_level_docs)]

mod api;
mod client;
mod config;
mod constraints;
mod context;
mod error;
mod eval;
mod events;
mod feature_store;
mod http;
mod listener;
mod metrics;
mod normalize;
mod repository;
mod storage;
pub mod strategy;
mod variant;

pub use api::{
    Constraint, Dependency, Feature, FeatureResponse, Operator, Override, Parameters, Payload,
    Segment, Strategy as FeatureStrategy, VariantDefinition,
};
pub use client::{Client, EvaluationOptions, FeatureOptions, VariantOptions};
pub use config::ClientConfig;
pub use constraints::check as check_constraints;
pub use context::Context;
pub use error::{Error, EvaluationError, Result};
pub use eval::Evaluation;
pub use events::Event;
pub use feature_store::Snapshot;
pub use http::{CLIENT_SPEC_VERSION, SDK_VERSION};
pub use listener::{Listener, LogListener, NoopListener};
pub use metrics::{Bucket, ClientData, MetricsData, ToggleCount};
pub use normalize::{normalized_value, STRATEGY_SEED, VARIANT_SEED};
pub use repository::{HttpRepository, Repository};
pub use storage::{BootstrapStorage, DefaultStorage, Storage};
pub use strategy::{Strategy, StrategyRegistry};
pub use variant::{select_variant, Variant, DISABLED_VARIANT_NAME};
