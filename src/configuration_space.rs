/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use crate::errors::ExperimentError;
use itertools::Itertools;
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde::{ser::SerializeMap, Deserialize, Serialize, Serializer};
use std::collections::HashSet;
use tracing::debug;

/// A named, finite set of values that the experiment varies.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Factor {
    pub name: String,
    pub values: Vec<String>,
}
impl Factor {
    pub fn new(name: &str, values: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }
}

/// One value per factor plus the repetition this entry represents.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Combination {
    values: Vec<(String, String)>,
    repetition: u32,
}
impl Combination {
    pub fn new(values: &[(&str, &str)], repetition: u32) -> Self {
        Self {
            values: values
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
            repetition,
        }
    }

    pub fn value(&self, factor: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(name, _)| name == factor)
            .map(|(_, value)| value.as_str())
    }

    pub fn values(&self) -> &[(String, String)] {
        &self.values
    }

    /// Zero based repetition index.
    pub fn repetition(&self) -> u32 {
        self.repetition
    }

    /// `governor=performance workload=high`
    pub fn label(&self) -> String {
        self.values
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .join(" ")
    }
}

impl Serialize for Combination {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len() + 1))?;
        for (name, value) in self.values.iter() {
            map.serialize_entry(name, value)?;
        }
        map.serialize_entry("repetition", &self.repetition)?;
        map.end()
    }
}

/// Cartesian product of all factors, replicated and shuffled once on construction.
#[derive(Debug)]
pub struct CombinationQueue {
    factor_names: Vec<String>,
    entries: Vec<Combination>,
    cursor: usize,
    seed: u64,
}
impl CombinationQueue {
    /// Builds the queue. The shuffle uses `seed` when given, otherwise a seed is drawn from the
    /// thread rng and kept so the order can be reproduced later.
    pub fn build(
        factors: &[Factor],
        repetitions: u32,
        seed: Option<u64>,
    ) -> Result<Self, ExperimentError> {
        if factors.is_empty() {
            return Err(ExperimentError::EmptyFactorSet);
        }

        for factor in factors {
            if factor.values.is_empty() {
                return Err(ExperimentError::EmptyFactor(factor.name.clone()));
            }

            let mut seen = HashSet::new();
            for value in factor.values.iter() {
                if !seen.insert(value) {
                    return Err(ExperimentError::DuplicateFactorValue {
                        factor: factor.name.clone(),
                        value: value.clone(),
                    });
                }
            }
        }

        let repetitions = repetitions.max(1);
        let mut entries = factors
            .iter()
            .map(|factor| {
                factor
                    .values
                    .iter()
                    .map(|value| (factor.name.clone(), value.clone()))
            })
            .multi_cartesian_product()
            .flat_map(|values| {
                (0..repetitions).map(move |repetition| Combination {
                    values: values.clone(),
                    repetition,
                })
            })
            .collect_vec();

        let seed = seed.unwrap_or_else(rand::random);
        let mut rng = StdRng::seed_from_u64(seed);
        entries.shuffle(&mut rng);
        debug!("built {} combinations using seed {}", entries.len(), seed);

        Ok(Self {
            factor_names: factors.iter().map(|f| f.name.clone()).collect(),
            entries,
            cursor: 0,
            seed,
        })
    }

    /// Hands out the next combination, or `None` once every entry has been handed out. Keeps
    /// returning `None` after that.
    pub fn next_combination(&mut self) -> Option<Combination> {
        let combination = self.entries.get(self.cursor)?.clone();
        self.cursor += 1;
        Some(combination)
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn factor_names(&self) -> &[String] {
        &self.factor_names
    }

    pub fn entries(&self) -> &[Combination] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn factors() -> Vec<Factor> {
        vec![
            Factor::new("governor", &["performance", "powersave", "schedutil"]),
            Factor::new("workload", &["low", "medium", "high"]),
        ]
    }

    #[test]
    fn queue_contains_every_combination_for_every_repetition() -> anyhow::Result<()> {
        let queue = CombinationQueue::build(&factors(), 2, Some(7))?;
        assert_eq!(queue.len(), 3 * 3 * 2);

        let unique = queue.entries().iter().unique().count();
        assert_eq!(unique, 18);

        for governor in ["performance", "powersave", "schedutil"] {
            for workload in ["low", "medium", "high"] {
                for repetition in 0..2 {
                    assert!(queue.entries().iter().any(|c| {
                        c.value("governor") == Some(governor)
                            && c.value("workload") == Some(workload)
                            && c.repetition() == repetition
                    }));
                }
            }
        }

        Ok(())
    }

    #[test]
    fn next_combination_reports_exhaustion_once_the_queue_is_drained() -> anyhow::Result<()> {
        let mut queue = CombinationQueue::build(&factors(), 1, Some(1))?;
        let before = queue.entries().to_vec();

        let mut handed_out = vec![];
        for _ in 0..queue.len() {
            let combination = queue
                .next_combination()
                .expect("queue should not be exhausted yet");
            handed_out.push(combination);
        }
        assert!(queue.next_combination().is_none());
        assert!(queue.next_combination().is_none());
        assert!(queue.is_exhausted());
        assert_eq!(queue.cursor(), queue.len());

        assert_eq!(handed_out, before);
        assert_eq!(queue.entries(), before.as_slice());
        Ok(())
    }

    #[test]
    fn same_seed_gives_same_order() -> anyhow::Result<()> {
        let a = CombinationQueue::build(&factors(), 3, Some(42))?;
        let b = CombinationQueue::build(&factors(), 3, Some(42))?;
        assert_eq!(a.entries(), b.entries());
        assert_eq!(a.seed(), 42);
        Ok(())
    }

    #[test]
    fn zero_repetitions_is_treated_as_one() -> anyhow::Result<()> {
        let queue = CombinationQueue::build(&factors(), 0, None)?;
        assert_eq!(queue.len(), 9);
        Ok(())
    }

    #[test]
    fn invalid_factor_sets_are_rejected() {
        assert!(matches!(
            CombinationQueue::build(&[], 1, None),
            Err(ExperimentError::EmptyFactorSet)
        ));

        let empty = vec![Factor::new("governor", &[])];
        assert!(matches!(
            CombinationQueue::build(&empty, 1, None),
            Err(ExperimentError::EmptyFactor(name)) if name == "governor"
        ));

        let duplicated = vec![Factor::new("governor", &["performance", "performance"])];
        assert!(matches!(
            CombinationQueue::build(&duplicated, 1, None),
            Err(ExperimentError::DuplicateFactorValue { .. })
        ));
    }

    #[test]
    fn label_lists_factor_values_in_declaration_order() -> anyhow::Result<()> {
        let mut queue = CombinationQueue::build(&factors(), 1, Some(3))?;
        let combination = queue.next_combination().expect("queue is not empty");
        let label = combination.label();
        assert!(label.starts_with("governor="));
        assert!(label.contains(" workload="));
        Ok(())
    }
}
