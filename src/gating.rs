//! Stochastic channel gating.
//!
//! Every membrane element owns an integer population per channel type and
//! its own random stream. Elements are independent within a step, so they
//! advance in parallel; streams are derived from the seed and the element
//! index, which makes results independent of the thread count.

use std::sync::Arc;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Binomial, Distribution, Exp1};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::channels::{ChannelId, ChannelStateId, ChannelType, CurrentId};
use crate::error::GatingError;
use crate::field::MembraneConductance;
use crate::model::Model;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatingMethod {
    /// Exact continuous-time jumps.
    #[default]
    Ssa,
    /// Binomial leaps from the populations at the start of the step.
    TauLeap,
}

/// Deterministic per-element seed (SplitMix64 over seed and index).
pub fn derive_seed(seed: u64, element: u64) -> u64 {
    const GOLDEN_GAMMA: u64 = 0x9E3779B97F4A7C15;
    let mut z = seed ^ element.wrapping_mul(GOLDEN_GAMMA);
    z = z.wrapping_add(GOLDEN_GAMMA);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

#[derive(Debug, Clone)]
struct Population {
    counts: Vec<u32>,
    /// Unit-exponential hazard left until the next event. Carried across
    /// steps so that step boundaries do not restart the event clock.
    residual: f64,
}

#[derive(Debug, Clone)]
struct Element {
    populations: Vec<Population>,
    rng: ChaCha8Rng,
}

#[derive(Debug, Default)]
struct Scratch {
    rates: Vec<f64>,
    propensities: Vec<f64>,
    snapshot: Vec<u32>,
}

impl Element {
    fn new(model: &Model, seed: u64, index: usize) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(derive_seed(seed, index as u64));
        let populations = model
            .channels()
            .iter()
            .map(|channel| Population {
                counts: vec![0; channel.state_count()],
                residual: rng.sample(Exp1),
            })
            .collect();
        Self { populations, rng }
    }

    fn advance(
        &mut self,
        model: &Model,
        method: GatingMethod,
        v: f64,
        dt: f64,
        scratch: &mut Scratch,
    ) {
        for (channel, population) in model.channels().iter().zip(&mut self.populations) {
            if channel.transitions().is_empty() {
                continue;
            }
            scratch.rates.clear();
            scratch.rates.extend(channel.rates().iter().map(|rate| rate.rate(v)));
            match method {
                GatingMethod::Ssa => ssa_step(channel, population, dt, &mut self.rng, scratch),
                GatingMethod::TauLeap => {
                    tau_leap_step(channel, &mut population.counts, dt, &mut self.rng, scratch)
                }
            }
        }
    }
}

fn ssa_step(
    channel: &ChannelType,
    population: &mut Population,
    dt: f64,
    rng: &mut ChaCha8Rng,
    scratch: &mut Scratch,
) {
    let Scratch {
        rates,
        propensities,
        ..
    } = scratch;
    let transitions = channel.transitions();
    let counts = &mut population.counts;

    propensities.clear();
    propensities.extend(
        transitions
            .iter()
            .map(|t| counts[t.from.0] as f64 * rates[t.rate]),
    );
    let mut total: f64 = propensities.iter().sum();
    let mut remaining = dt;

    loop {
        if !(total > 0.0) {
            break;
        }
        let budget = total * remaining;
        if population.residual >= budget {
            population.residual -= budget;
            break;
        }
        remaining -= population.residual / total;

        let target = rng.random::<f64>() * total;
        let mut acc = 0.0;
        let mut chosen = None;
        for (index, &propensity) in propensities.iter().enumerate() {
            if propensity <= 0.0 {
                continue;
            }
            chosen = Some(index);
            acc += propensity;
            if acc > target {
                break;
            }
        }
        let Some(index) = chosen else {
            break;
        };

        // only transitions with a populated source have positive propensity
        let fired = transitions[index];
        counts[fired.from.0] -= 1;
        counts[fired.to.0] += 1;
        for state in [fired.from, fired.to] {
            for &dependent in channel.outgoing(state) {
                let t = transitions[dependent];
                propensities[dependent] = counts[t.from.0] as f64 * rates[t.rate];
            }
        }
        total = propensities.iter().sum();
        population.residual = rng.sample(Exp1);
    }
}

fn tau_leap_step(
    channel: &ChannelType,
    counts: &mut [u32],
    dt: f64,
    rng: &mut ChaCha8Rng,
    scratch: &mut Scratch,
) {
    let Scratch {
        rates, snapshot, ..
    } = scratch;
    let transitions = channel.transitions();
    snapshot.clear();
    snapshot.extend_from_slice(counts);

    for (state, &n) in snapshot.iter().enumerate() {
        if n == 0 {
            continue;
        }
        let outgoing = channel.outgoing(ChannelStateId(state));
        let exit_rate: f64 = outgoing.iter().map(|&i| rates[transitions[i].rate]).sum();
        if !(exit_rate > 0.0) {
            continue;
        }
        let leaving = sample_binomial(rng, n, 1.0 - (-exit_rate * dt).exp());
        if leaving == 0 {
            continue;
        }

        // split the leavers among destinations by sequential conditionals
        let mut left = leaving;
        let mut rate_left = exit_rate;
        for (k, &index) in outgoing.iter().enumerate() {
            let t = transitions[index];
            let rate = rates[t.rate];
            let moved = if k + 1 == outgoing.len() {
                left
            } else {
                sample_binomial(rng, left, rate / rate_left)
            };
            counts[state] -= moved;
            counts[t.to.0] += moved;
            left -= moved;
            rate_left -= rate;
            if left == 0 {
                break;
            }
        }
    }
}

fn sample_binomial(rng: &mut ChaCha8Rng, n: u32, p: f64) -> u32 {
    let p = p.clamp(0.0, 1.0);
    match Binomial::new(u64::from(n), p) {
        Ok(distribution) => distribution.sample(rng).min(u64::from(n)) as u32,
        Err(_) => 0,
    }
}

/// Per-element channel populations and their stochastic advance.
#[derive(Debug, Clone)]
pub struct StochasticGatingEngine {
    model: Arc<Model>,
    elements: Vec<Element>,
    method: GatingMethod,
    seed: u64,
}

impl StochasticGatingEngine {
    pub fn new(model: Arc<Model>, element_count: usize, method: GatingMethod, seed: u64) -> Self {
        let elements = (0..element_count)
            .map(|index| Element::new(&model, seed, index))
            .collect();
        Self {
            model,
            elements,
            method,
            seed,
        }
    }

    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    pub fn element_count(&self) -> usize {
        self.elements.len()
    }

    pub fn method(&self) -> GatingMethod {
        self.method
    }

    pub fn set_method(&mut self, method: GatingMethod) {
        self.method = method;
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Advances every element by `dt` at its own fixed potential.
    pub fn advance(&mut self, voltages: &[f64], dt: f64) -> Result<(), GatingError> {
        if voltages.len() != self.elements.len() {
            return Err(GatingError::VoltageCountMismatch {
                expected: self.elements.len(),
                got: voltages.len(),
            });
        }
        if !(dt.is_finite() && dt > 0.0) {
            return Err(GatingError::InvalidTimestep(dt));
        }
        let model = self.model.as_ref();
        let method = self.method;
        self.elements
            .par_iter_mut()
            .zip(voltages.par_iter())
            .for_each_init(Scratch::default, |scratch, (element, &v)| {
                element.advance(model, method, v, dt, scratch)
            });
        Ok(())
    }

    fn channel_type(&self, channel: ChannelId) -> Result<&ChannelType, GatingError> {
        self.model
            .channel(channel)
            .ok_or(GatingError::UnknownChannel { channel: channel.0 })
    }

    fn population_mut(
        &mut self,
        element: usize,
        channel: ChannelId,
    ) -> Result<&mut Population, GatingError> {
        self.channel_type(channel)?;
        let count = self.elements.len();
        self.elements
            .get_mut(element)
            .map(|e| &mut e.populations[channel.0])
            .ok_or(GatingError::UnknownElement { element, count })
    }

    /// Overwrites one state's count. The element's total for the channel
    /// must stay within `u32`, so no later transition can overflow a state.
    pub fn set_count(
        &mut self,
        element: usize,
        channel: ChannelId,
        state: ChannelStateId,
        count: u32,
    ) -> Result<(), GatingError> {
        let channel_type = self.channel_type(channel)?;
        if state.0 >= channel_type.state_count() {
            return Err(GatingError::UnknownState {
                channel: channel_type.name.clone(),
                state: state.0,
            });
        }
        let name = channel_type.name.clone();
        let population = self.population_mut(element, channel)?;
        let others: u64 = population
            .counts
            .iter()
            .enumerate()
            .filter(|&(s, _)| s != state.0)
            .map(|(_, &c)| u64::from(c))
            .sum();
        if others + u64::from(count) > u64::from(u32::MAX) {
            return Err(GatingError::PopulationOverflow {
                channel: name,
                element,
                existing: others,
                requested: f64::from(count),
            });
        }
        population.counts[state.0] = count;
        Ok(())
    }

    /// Adds `density * area * fraction` channels per element and state. The
    /// fractional part is rounded up with probability equal to itself, drawn
    /// from the element's stream. Returns the number of channels added.
    pub fn inject_density(
        &mut self,
        areas: &[f64],
        channel: ChannelId,
        density: f64,
        fractions: &[f64],
    ) -> Result<u64, GatingError> {
        let channel_type = self.channel_type(channel)?;
        let name = channel_type.name.clone();
        if areas.len() != self.elements.len() {
            return Err(GatingError::AreaCountMismatch {
                expected: self.elements.len(),
                got: areas.len(),
            });
        }
        if !(density.is_finite() && density >= 0.0) {
            return Err(GatingError::InvalidDensity {
                channel: name,
                density,
            });
        }
        if fractions.len() != channel_type.state_count() {
            return Err(GatingError::FractionCountMismatch {
                channel: name,
                expected: channel_type.state_count(),
                got: fractions.len(),
            });
        }
        if let Some((state, &fraction)) = fractions
            .iter()
            .enumerate()
            .find(|(_, f)| !(f.is_finite() && (0.0..=1.0).contains(*f)))
        {
            return Err(GatingError::InvalidFraction {
                channel: name,
                state,
                fraction,
            });
        }
        // upper bound after rounding, checked against what is already there
        for (element, (e, &area)) in self.elements.iter().zip(areas).enumerate() {
            let requested: f64 = fractions
                .iter()
                .map(|&fraction| (density * area * fraction).ceil())
                .sum();
            let existing: u64 = e.populations[channel.0]
                .counts
                .iter()
                .map(|&c| u64::from(c))
                .sum();
            if !(requested.is_finite()
                && requested >= 0.0
                && existing as f64 + requested <= f64::from(u32::MAX))
            {
                return Err(GatingError::PopulationOverflow {
                    channel: name,
                    element,
                    existing,
                    requested,
                });
            }
        }

        let mut added = 0u64;
        for (index, (element, &area)) in self.elements.iter_mut().zip(areas).enumerate() {
            let Element { populations, rng } = element;
            let population = &mut populations[channel.0];
            for (count, &fraction) in population.counts.iter_mut().zip(fractions) {
                let expected = density * area * fraction;
                let whole = expected.floor();
                let extra = u32::from(rng.random_bool((expected - whole).clamp(0.0, 1.0)));
                let n = whole as u32 + extra;
                let existing = *count;
                *count = existing
                    .checked_add(n)
                    .ok_or_else(|| GatingError::PopulationOverflow {
                        channel: name.clone(),
                        element: index,
                        existing: u64::from(existing),
                        requested: expected,
                    })?;
                added += u64::from(n);
            }
        }
        Ok(added)
    }

    pub fn counts(&self, element: usize, channel: ChannelId) -> Option<&[u32]> {
        self.elements
            .get(element)?
            .populations
            .get(channel.0)
            .map(|p| p.counts.as_slice())
    }

    pub fn count(&self, element: usize, channel: ChannelId, state: ChannelStateId) -> Option<u32> {
        self.counts(element, channel)?.get(state.0).copied()
    }

    /// Channels of one type on one element.
    pub fn total(&self, element: usize, channel: ChannelId) -> Option<u64> {
        self.counts(element, channel)
            .map(|counts| counts.iter().map(|&c| u64::from(c)).sum())
    }

    /// Channels of one type in one state, summed over elements.
    pub fn state_total(&self, channel: ChannelId, state: ChannelStateId) -> u64 {
        self.elements
            .iter()
            .filter_map(|e| e.populations.get(channel.0)?.counts.get(state.0))
            .map(|&c| u64::from(c))
            .sum()
    }

    /// Channels of one type summed over elements.
    pub fn channel_total(&self, channel: ChannelId) -> u64 {
        (0..self.elements.len())
            .filter_map(|element| self.total(element, channel))
            .sum()
    }

    pub fn open_count(&self, element: usize, current: CurrentId) -> Option<u32> {
        let current = self.model.current(current)?;
        self.count(element, current.channel, current.open_state)
    }

    /// Outward-positive current (A) of one ohmic current on one element.
    pub fn element_current(&self, element: usize, current: CurrentId, v: f64) -> Option<f64> {
        let open = self.open_count(element, current)?;
        Some(self.model.current(current)?.current(open, v))
    }

    /// Summed ohmic conductance per element from the current open counts.
    pub fn membrane_conductances(&self, out: &mut Vec<MembraneConductance>) {
        out.clear();
        out.extend(self.elements.iter().map(|element| {
            let mut conductance = MembraneConductance::default();
            for current in self.model.currents() {
                let open = element.populations[current.channel.0].counts[current.open_state.0];
                conductance.add(f64::from(open) * current.conductance, current.reversal);
            }
            conductance
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelBuilder;
    use crate::rate::VDepRate;

    const OPENING: f64 = 300.0;
    const CLOSING: f64 = 700.0;

    fn two_state() -> (Arc<Model>, ChannelId, ChannelStateId, ChannelStateId) {
        let mut builder = ModelBuilder::new();
        let (gate, states) = builder.add_subunit("gate", &["closed", "open"]);
        let channel = builder.add_channel("two", &[gate]);
        builder.add_gating(
            channel,
            states[0],
            states[1],
            VDepRate::Constant(OPENING),
            VDepRate::Constant(CLOSING),
        );
        builder.add_ohmic_current("I_two", channel, &[states[1]], 1e-12, 0.0);
        let model = builder.build().expect("model");
        let ty = model.channel(channel).expect("channel");
        let closed = ty.state(&[states[0]]).expect("closed");
        let open = ty.state(&[states[1]]).expect("open");
        (Arc::new(model), channel, closed, open)
    }

    fn four_gate() -> (Arc<Model>, ChannelId) {
        let mut builder = ModelBuilder::new();
        let (gate, states) = builder.add_subunit("n", &["c", "o"]);
        let channel = builder.add_channel("k", &[gate; 4]);
        builder.add_gating(
            channel,
            states[0],
            states[1],
            VDepRate::Constant(2000.0),
            VDepRate::Constant(1500.0),
        );
        builder.add_ohmic_current("I_k", channel, &[states[1]; 4], 1e-12, -0.077);
        (Arc::new(builder.build().expect("model")), channel)
    }

    fn open_fraction_samples(method: GatingMethod, dt: f64, seed: u64) -> f64 {
        let (model, channel, closed, open) = two_state();
        let mut engine = StochasticGatingEngine::new(model, 1, method, seed);
        engine.set_count(0, channel, closed, 10_000).expect("count");
        let steps_per_ms = (1e-3 / dt).round() as usize;
        for _ in 0..20 * steps_per_ms {
            engine.advance(&[0.0], dt).expect("advance");
        }
        let mut sum = 0.0;
        let samples = 200;
        for _ in 0..samples {
            for _ in 0..steps_per_ms {
                engine.advance(&[0.0], dt).expect("advance");
            }
            sum += engine.count(0, channel, open).expect("open") as f64 / 10_000.0;
        }
        sum / samples as f64
    }

    #[test]
    fn populations_are_conserved() {
        let (model, channel) = four_gate();
        let mut engine = StochasticGatingEngine::new(model, 8, GatingMethod::Ssa, 7);
        let mut fractions = vec![0.0; 16];
        fractions[0] = 1.0;
        let areas = vec![1.0; 8];
        let added = engine
            .inject_density(&areas, channel, 250.0, &fractions)
            .expect("inject");
        assert_eq!(added, 2000);
        let voltages: Vec<f64> = (0..8).map(|i| -0.08 + 0.01 * i as f64).collect();
        for method in [GatingMethod::Ssa, GatingMethod::TauLeap] {
            engine.set_method(method);
            for step in 0..200 {
                let dt = if step % 3 == 0 { 1e-5 } else { 4e-5 };
                engine.advance(&voltages, dt).expect("advance");
                for element in 0..8 {
                    assert_eq!(engine.total(element, channel), Some(250));
                }
            }
        }
        assert_eq!(engine.channel_total(channel), 2000);
    }

    #[test]
    fn two_state_ssa_reaches_equilibrium() {
        let mean = open_fraction_samples(GatingMethod::Ssa, 1e-4, 42);
        let expected = OPENING / (OPENING + CLOSING);
        assert!((mean - expected).abs() < 0.01, "{mean}");
    }

    #[test]
    fn tau_leap_agrees_with_ssa() {
        let expected = OPENING / (OPENING + CLOSING);
        let ssa = open_fraction_samples(GatingMethod::Ssa, 1e-5, 3);
        let leap = open_fraction_samples(GatingMethod::TauLeap, 1e-5, 3);
        assert!((leap - expected).abs() < 0.01, "{leap}");
        assert!((leap - ssa).abs() < 0.015, "{leap} vs {ssa}");
    }

    #[test]
    fn fine_steps_match_one_coarse_step() {
        let (model, channel, closed, open) = two_state();
        let run = |steps: usize, seed: u64| {
            let mut engine =
                StochasticGatingEngine::new(Arc::clone(&model), 1, GatingMethod::Ssa, seed);
            engine.set_count(0, channel, closed, 10_000).expect("count");
            let dt = 2e-4 / steps as f64;
            for _ in 0..steps {
                engine.advance(&[0.0], dt).expect("advance");
            }
            engine.count(0, channel, open).expect("open") as f64
        };
        // p_open(t) = r_f / (r_f + r_b) * (1 - exp(-(r_f + r_b) t))
        let expected = 10_000.0 * 0.3 * (1.0 - (-0.2f64).exp());
        let fine: f64 = (0..10).map(|s| run(1000, s)).sum::<f64>() / 10.0;
        let coarse: f64 = (0..10).map(|s| run(1, 100 + s)).sum::<f64>() / 10.0;
        // sd of a single run is about 22 channels
        assert!((fine - expected).abs() < 30.0, "{fine} vs {expected}");
        assert!((coarse - expected).abs() < 30.0, "{coarse} vs {expected}");
    }

    #[test]
    fn results_do_not_depend_on_thread_count() {
        let (model, channel) = four_gate();
        let run = |threads: usize| {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()
                .expect("pool");
            pool.install(|| {
                let mut engine =
                    StochasticGatingEngine::new(Arc::clone(&model), 32, GatingMethod::Ssa, 1234);
                let fractions: Vec<f64> = vec![1.0 / 16.0; 16];
                let areas: Vec<f64> = (0..32).map(|i| 1.0 + i as f64 * 0.1).collect();
                engine
                    .inject_density(&areas, channel, 100.0, &fractions)
                    .expect("inject");
                let voltages: Vec<f64> = (0..32).map(|i| -0.07 + 0.002 * i as f64).collect();
                for _ in 0..50 {
                    engine.advance(&voltages, 2e-5).expect("advance");
                }
                (0..32)
                    .map(|e| engine.counts(e, channel).expect("counts").to_vec())
                    .collect::<Vec<_>>()
            })
        };
        assert_eq!(run(1), run(4));
    }

    #[test]
    fn stochastic_rounding_preserves_expected_totals() {
        let (model, channel, _, _) = two_state();
        let mut engine = StochasticGatingEngine::new(model, 1000, GatingMethod::Ssa, 99);
        let areas = vec![1.0; 1000];
        let added = engine
            .inject_density(&areas, channel, 2.5, &[0.5, 0.5])
            .expect("inject");
        // 1.25 channels per state per element: 1 or 2, mean 1.25
        assert!((added as f64 - 2500.0).abs() < 100.0, "{added}");
        for element in 0..1000 {
            let total = engine.total(element, channel).expect("total");
            assert!((2..=4).contains(&total));
        }
    }

    #[test]
    fn invalid_requests_are_rejected() {
        let (model, channel, closed, _) = two_state();
        let mut engine = StochasticGatingEngine::new(model, 2, GatingMethod::Ssa, 1);
        assert!(matches!(
            engine.advance(&[0.0], 1e-5),
            Err(GatingError::VoltageCountMismatch { expected: 2, got: 1 })
        ));
        assert!(matches!(
            engine.advance(&[0.0, 0.0], 0.0),
            Err(GatingError::InvalidTimestep(_))
        ));
        assert!(matches!(
            engine.set_count(5, channel, closed, 1),
            Err(GatingError::UnknownElement { element: 5, count: 2 })
        ));
        assert!(matches!(
            engine.set_count(0, ChannelId(3), closed, 1),
            Err(GatingError::UnknownChannel { channel: 3 })
        ));
        assert!(matches!(
            engine.inject_density(&[1.0, 1.0], channel, -1.0, &[1.0, 0.0]),
            Err(GatingError::InvalidDensity { .. })
        ));
        assert!(matches!(
            engine.inject_density(&[1.0, 1.0], channel, 1.0, &[1.5, 0.0]),
            Err(GatingError::InvalidFraction { state: 0, .. })
        ));
        assert!(matches!(
            engine.inject_density(&[1.0], channel, 1.0, &[1.0, 0.0]),
            Err(GatingError::AreaCountMismatch { expected: 2, got: 1 })
        ));
        assert!(matches!(
            engine.inject_density(&[1.0, 1.0], channel, 1.0, &[1.0]),
            Err(GatingError::FractionCountMismatch {
                expected: 2,
                got: 1,
                ..
            })
        ));
    }

    #[test]
    fn element_totals_stay_within_counter_range() {
        let (model, channel, closed, open) = two_state();
        let mut engine = StochasticGatingEngine::new(model, 1, GatingMethod::TauLeap, 5);

        // each state fits on its own, the sum does not
        assert!(matches!(
            engine.inject_density(&[1.0], channel, 3.0e9, &[1.0, 1.0]),
            Err(GatingError::PopulationOverflow { element: 0, existing: 0, .. })
        ));
        assert_eq!(engine.total(0, channel), Some(0));

        engine
            .inject_density(&[1.0], channel, 3.0e9, &[1.0, 0.0])
            .expect("inject");
        assert!(matches!(
            engine.inject_density(&[1.0], channel, 2.0e9, &[0.0, 1.0]),
            Err(GatingError::PopulationOverflow {
                existing: 3_000_000_000,
                ..
            })
        ));
        assert!(matches!(
            engine.set_count(0, channel, open, 2_000_000_000),
            Err(GatingError::PopulationOverflow { .. })
        ));
        assert_eq!(engine.total(0, channel), Some(3_000_000_000));

        engine.set_count(0, channel, closed, u32::MAX).expect("count");
        assert!(matches!(
            engine.set_count(0, channel, open, 1),
            Err(GatingError::PopulationOverflow { .. })
        ));
        for method in [GatingMethod::TauLeap, GatingMethod::Ssa] {
            engine.set_method(method);
            engine.advance(&[0.0], 1e-8).expect("advance");
            assert_eq!(engine.total(0, channel), Some(u64::from(u32::MAX)));
        }
    }

    #[test]
    fn conductances_follow_open_counts() {
        let (model, channel, _, open) = two_state();
        let mut engine = StochasticGatingEngine::new(model, 2, GatingMethod::Ssa, 1);
        engine.set_count(1, channel, open, 5).expect("count");
        let mut out = Vec::new();
        engine.membrane_conductances(&mut out);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], MembraneConductance::default());
        assert!((out[1].g - 5e-12).abs() < 1e-24);
        let current = engine
            .element_current(1, CurrentId(0), 0.01)
            .expect("current");
        assert!((current - 5e-14).abs() < 1e-26);
    }
}
