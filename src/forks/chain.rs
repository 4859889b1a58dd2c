//! Contains the [ForkChain], the ordered set of known forks.

use super::{Activation, Fork, ForkDelta, ForkRules, ForkSpec, TransitionFork};
use crate::error::ForkError;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc};
use tracing::debug;

/// The mainnet fork definitions, in activation order.
const MAINNET_DEFINITIONS: &str = include_str!("../../forks.toml");

/// The contents of a fork definitions file.
#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct ForkDefinitions {
    /// Fork deltas in activation order.
    #[serde(default)]
    pub(crate) fork: Vec<ForkDelta>,
    /// Transition forks between two adjacent-or-later forks.
    #[serde(default)]
    pub(crate) transition: Vec<TransitionDefinition>,
}

/// A transition fork as written in the definitions file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct TransitionDefinition {
    pub(crate) name: String,
    pub(crate) from: String,
    pub(crate) to: String,
    #[serde(flatten)]
    pub(crate) activation: Activation,
}

/// The forks of a network in activation order. Read-only once built.
#[derive(Debug, Clone)]
pub(crate) struct ForkChain {
    /// Forks in activation order; each is the parent of the next.
    forks: Vec<Arc<ForkSpec>>,
    /// Transition forks, resolvable by name alongside plain forks.
    transitions: Vec<Arc<TransitionFork>>,
    /// Fork name to position.
    by_name: HashMap<String, usize>,
}

impl ForkChain {
    /// Builds the mainnet chain from the embedded definitions.
    pub(crate) fn mainnet() -> Result<Self, ForkError> {
        Self::from_toml(MAINNET_DEFINITIONS)
    }

    /// Parses and builds a chain from a TOML definitions document.
    pub(crate) fn from_toml(definitions: &str) -> Result<Self, ForkError> {
        let definitions = toml::from_str::<ForkDefinitions>(definitions)
            .map_err(|e| ForkError::Definition(e.to_string()))?;
        Self::from_definitions(definitions)
    }

    /// Builds a chain, linking every fork to the one defined before it.
    pub(crate) fn from_definitions(definitions: ForkDefinitions) -> Result<Self, ForkError> {
        let mut forks: Vec<Arc<ForkSpec>> = Vec::with_capacity(definitions.fork.len());
        let mut by_name = HashMap::with_capacity(definitions.fork.len());

        for delta in definitions.fork {
            if by_name.contains_key(&delta.name) {
                return Err(ForkError::DuplicateFork(delta.name));
            }
            by_name.insert(delta.name.clone(), forks.len());
            let fork = ForkSpec::new(delta, forks.last().cloned())?;
            forks.push(Arc::new(fork));
        }

        if forks.is_empty() {
            return Err(ForkError::Definition("no forks defined".into()));
        }

        let mut chain = Self {
            forks,
            transitions: Vec::new(),
            by_name,
        };

        for def in definitions.transition {
            if chain.by_name.contains_key(&def.name)
                || chain.transitions.iter().any(|t| t.name() == def.name)
            {
                return Err(ForkError::DuplicateFork(def.name));
            }
            let from = chain.lookup(&def.from)?;
            let to = chain.lookup(&def.to)?;
            if !to.at_or_after(&from) || to.position() == from.position() {
                return Err(ForkError::InvalidTransition {
                    name: def.name,
                    reason: format!("{} does not come after {}", def.to, def.from),
                });
            }
            chain.transitions.push(Arc::new(TransitionFork::new(
                def.name,
                from,
                to,
                def.activation,
            )));
        }

        debug!(
            target: "fork-chain",
            "Built fork chain with {} forks and {} transitions",
            chain.forks.len(),
            chain.transitions.len()
        );
        Ok(chain)
    }

    /// Looks up a plain fork by name.
    pub(crate) fn lookup(&self, name: &str) -> Result<Arc<ForkSpec>, ForkError> {
        self.by_name
            .get(name)
            .map(|i| self.forks[*i].clone())
            .ok_or_else(|| ForkError::UnknownFork(name.to_string()))
    }

    /// Resolves a plain or transition fork by name.
    pub(crate) fn resolve(&self, name: &str) -> Result<Fork, ForkError> {
        let fork: Fork = match self.transitions.iter().find(|t| t.name() == name) {
            Some(transition) => transition.clone(),
            None => self.lookup(name)?,
        };
        Ok(fork)
    }

    /// The chain positions a fork covers: a single position for a plain fork, both sides for a
    /// transition.
    pub(crate) fn span(&self, name: &str) -> Result<(usize, usize), ForkError> {
        match self.transitions.iter().find(|t| t.name() == name) {
            Some(transition) => Ok((transition.from().position(), transition.to().position())),
            None => {
                let position = self.lookup(name)?.position();
                Ok((position, position))
            }
        }
    }

    /// Returns the fork `steps` positions before `fork`.
    pub(crate) fn predecessor(
        &self,
        fork: &ForkSpec,
        steps: usize,
    ) -> Result<Arc<ForkSpec>, ForkError> {
        fork.position()
            .checked_sub(steps)
            .and_then(|i| self.forks.get(i))
            .cloned()
            .ok_or_else(|| self.out_of_range(fork, steps))
    }

    /// Returns the fork `steps` positions after `fork`.
    pub(crate) fn successor(&self, fork: &ForkSpec, steps: usize) -> Result<Arc<ForkSpec>, ForkError> {
        fork.position()
            .checked_add(steps)
            .and_then(|i| self.forks.get(i))
            .cloned()
            .ok_or_else(|| self.out_of_range(fork, steps))
    }

    /// All forks from `from` to `until`, both inclusive, in chain order. Empty if `until`
    /// precedes `from`.
    pub(crate) fn between(&self, from: &str, until: &str) -> Result<Vec<Arc<ForkSpec>>, ForkError> {
        let from = self.lookup(from)?;
        let until = self.lookup(until)?;
        Ok(self
            .forks
            .get(from.position()..=until.position())
            .map(<[_]>::to_vec)
            .unwrap_or_default())
    }

    /// The forks a fill run targets between two endpoints.
    ///
    /// `from` defaults to the root and `until` to the latest deployed fork. Ignored forks are
    /// dropped unless named as an endpoint, and every transition whose sides both fall in the
    /// range is placed right after its target fork.
    pub(crate) fn fill_targets(
        &self,
        from: Option<&str>,
        until: Option<&str>,
    ) -> Result<Vec<Fork>, ForkError> {
        let from = match from {
            Some(name) => self.lookup(name)?,
            None => self.forks[0].clone(),
        };
        let until = match until {
            Some(name) => self.lookup(name)?,
            None => self.latest_deployed(),
        };

        let mut targets: Vec<Fork> = Vec::new();
        for fork in self.between(from.name(), until.name())? {
            let endpoint = fork.position() == from.position() || fork.position() == until.position();
            if fork.is_ignored() && !endpoint {
                continue;
            }
            targets.push(fork.clone());
            targets.extend(
                self.transitions
                    .iter()
                    .filter(|t| {
                        t.to().position() == fork.position() && t.from().at_or_after(&from)
                    })
                    .map(|t| t.clone() as Fork),
            );
        }
        Ok(targets)
    }

    /// The most recent fork that is live on mainnet.
    pub(crate) fn latest_deployed(&self) -> Arc<ForkSpec> {
        self.forks
            .iter()
            .rev()
            .find(|f| f.is_deployed())
            .unwrap_or(&self.forks[0])
            .clone()
    }

    /// Iterates over all plain forks in chain order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = &Arc<ForkSpec>> {
        self.forks.iter()
    }

    /// The transition forks of the chain.
    pub(crate) fn transitions(&self) -> &[Arc<TransitionFork>] {
        &self.transitions
    }

    fn out_of_range(&self, fork: &ForkSpec, steps: usize) -> ForkError {
        ForkError::OutOfRange {
            fork: fork.name().to_string(),
            steps,
            len: self.forks.len(),
        }
    }
}
