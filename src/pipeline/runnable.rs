//! Contains the [FillCase], a single `(scenario, fork, variant)` instance.

use crate::{
    builder::FixtureBuilder,
    error::FillError,
    fixture::FixtureRecord,
    forks::{Fork, ForkRules},
    scenario::{Scenario, Variant},
};
use std::sync::Arc;

/// An individual fill instance.
#[derive(Debug, Clone)]
pub(crate) struct FillCase {
    /// The module the resulting fixture is collected under.
    pub(crate) module: String,
    /// The fixture's display name within its module.
    pub(crate) display_name: String,
    /// The scenario to fill.
    pub(crate) scenario: Arc<Scenario>,
    /// The fork to fill the scenario for.
    pub(crate) fork: Fork,
    /// The EIPs activated on top of the fork.
    pub(crate) variant: Variant,
}

impl FillCase {
    /// Create a new [FillCase].
    pub(crate) fn new(module: String, scenario: Arc<Scenario>, fork: Fork, variant: Variant) -> Self {
        Self {
            module,
            display_name: display_name(&fork, &variant),
            scenario,
            fork,
            variant,
        }
    }

    /// Fill the instance.
    pub(crate) async fn run(&self, builder: &FixtureBuilder) -> Result<FixtureRecord, FillError> {
        builder.build(&self.scenario, &self.fork, &self.variant).await
    }
}

/// The display name of an instance: `fork=<fork>[-eips=<a>+<b>]`.
fn display_name(fork: &Fork, variant: &Variant) -> String {
    if variant.is_baseline() {
        format!("fork={}", fork.name())
    } else {
        format!("fork={}-{}", fork.name(), variant)
    }
}
