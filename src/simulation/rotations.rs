// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Built-in priority rotations
//!
//! A rotation is a priority list: at every decision point the first spell off
//! cooldown is cast. Damage rolls and crits come from a seeded RNG, so the
//! same seed always produces the same fight.

use std::collections::BTreeMap;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{IterationOutcome, IterationRunner, SimulationError};

const CRIT_CHANCE: f64 = 0.2;
const CRIT_MULTIPLIER: f64 = 2.0;
const DAMAGE_SPREAD: f64 = 0.1;
/// Longest fight a single iteration may simulate
pub const MAX_DURATION_SECS: f64 = 3600.0;

#[derive(Debug, Clone, PartialEq)]
pub struct Spell {
    pub id: u32,
    pub name: &'static str,
    pub cast_ms: u64,
    pub cooldown_ms: u64,
    pub gcd_ms: u64,
    pub base_damage: f64,
}

#[derive(Debug, Clone)]
pub struct PriorityRotation {
    name: String,
    spells: Vec<Spell>,
    duration_ms: u64,
}

impl PriorityRotation {
    pub fn new(name: &str, spells: Vec<Spell>, duration_secs: f64) -> Result<Self, SimulationError> {
        if !duration_secs.is_finite() || duration_secs <= 0.0 || duration_secs > MAX_DURATION_SECS
        {
            return Err(SimulationError::InvalidDuration(duration_secs.to_string()));
        }
        Ok(Self {
            name: name.to_string(),
            spells,
            duration_ms: (duration_secs * 1000.0) as u64,
        })
    }
}

impl IterationRunner for PriorityRotation {
    fn name(&self) -> &str {
        &self.name
    }

    fn run_iteration(&self, seed: u64) -> Result<IterationOutcome, SimulationError> {
        if self.spells.is_empty() {
            return Err(SimulationError::Iteration {
                seed,
                message: "rotation has no spells".to_string(),
            });
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let mut ready_at = vec![0u64; self.spells.len()];
        let mut now = 0u64;
        let mut casts = 0u64;
        let mut damage = 0.0;

        while now < self.duration_ms {
            let Some(idx) = ready_at.iter().position(|&t| t <= now) else {
                // Nothing castable: idle until the next cooldown expires
                now = ready_at.iter().copied().min().unwrap_or(self.duration_ms);
                continue;
            };
            let spell = &self.spells[idx];
            let busy = spell.cast_ms.max(spell.gcd_ms).max(1);
            if now + spell.cast_ms > self.duration_ms {
                break;
            }

            let roll = rng.gen_range(1.0 - DAMAGE_SPREAD..=1.0 + DAMAGE_SPREAD);
            let crit = if rng.gen_bool(CRIT_CHANCE) {
                CRIT_MULTIPLIER
            } else {
                1.0
            };
            damage += spell.base_damage * roll * crit;
            casts += 1;

            ready_at[idx] = now + spell.cast_ms + spell.cooldown_ms;
            now += busy;
        }

        Ok(IterationOutcome {
            casts,
            damage,
            duration_secs: self.duration_ms as f64 / 1000.0,
        })
    }
}

fn fire_blast() -> Spell {
    Spell {
        id: 108853,
        name: "Fire Blast",
        cast_ms: 0,
        cooldown_ms: 12_000,
        gcd_ms: 1_200,
        base_damage: 800.0,
    }
}

fn scorch() -> Spell {
    Spell {
        id: 2948,
        name: "Scorch",
        cast_ms: 1_500,
        cooldown_ms: 0,
        gcd_ms: 1_500,
        base_damage: 500.0,
    }
}

fn pyroblast() -> Spell {
    Spell {
        id: 11366,
        name: "Pyroblast",
        cast_ms: 4_500,
        cooldown_ms: 0,
        gcd_ms: 1_500,
        base_damage: 2_100.0,
    }
}

/// Named rotations available to the pool, RPC server and coordinator
#[derive(Debug, Clone)]
pub struct RotationCatalog {
    rotations: BTreeMap<String, Vec<Spell>>,
}

impl Default for RotationCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl RotationCatalog {
    pub fn builtin() -> Self {
        let mut rotations = BTreeMap::new();
        rotations.insert("fire-mage".to_string(), vec![fire_blast(), scorch()]);
        rotations.insert("scorch-only".to_string(), vec![scorch()]);
        rotations.insert(
            "pyro-hardcast".to_string(),
            vec![fire_blast(), pyroblast(), scorch()],
        );
        Self { rotations }
    }

    pub fn names(&self) -> Vec<String> {
        self.rotations.keys().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.rotations.contains_key(name)
    }

    /// Build a runner for `name` simulating `duration_secs` per iteration
    pub fn build(
        &self,
        name: &str,
        duration_secs: f64,
    ) -> Result<Arc<dyn IterationRunner>, SimulationError> {
        let spells = self
            .rotations
            .get(name)
            .ok_or_else(|| SimulationError::UnknownRotation(name.to_string()))?;
        Ok(Arc::new(PriorityRotation::new(
            name,
            spells.clone(),
            duration_secs,
        )?))
    }
}
