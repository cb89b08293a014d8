//! Channel composition: subunits, the combinatorial channel state space and
//! the transitions between its states.
//!
//! A channel is an ordered tuple of subunits. Its states are the Cartesian
//! product of the subunit state sets and two states are adjacent iff they
//! differ in exactly one position.

use itertools::Itertools;
use std::collections::HashMap;

use crate::error::ModelError;
use crate::rate::VDepRate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubUnitId(pub usize);

/// Global id of one named subunit state (e.g. `Ko`, `Na_hi`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubUnitStateId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelId(pub usize);

/// Index of a state inside one channel's state space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelStateId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CurrentId(pub usize);

#[derive(Debug, Clone, PartialEq)]
pub struct SubUnit {
    pub name: String,
    pub states: Vec<SubUnitStateId>,
}

impl SubUnit {
    pub fn position_of(&self, state: SubUnitStateId) -> Option<usize> {
        self.states.iter().position(|&s| s == state)
    }
}

/// Index-based state graph of one channel type.
///
/// States are stored as local per-position indices in mixed radix order,
/// last position varying fastest.
#[derive(Debug, Clone, PartialEq)]
pub struct StateSpace {
    radices: Vec<usize>,
    states: Vec<Vec<usize>>,
}

impl StateSpace {
    pub fn new(radices: Vec<usize>) -> Self {
        let states = radices
            .iter()
            .map(|&k| 0..k)
            .multi_cartesian_product()
            .collect();
        Self { radices, states }
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn positions(&self) -> usize {
        self.radices.len()
    }

    pub fn local_states(&self, state: ChannelStateId) -> &[usize] {
        &self.states[state.0]
    }

    pub fn index_of(&self, local: &[usize]) -> Option<ChannelStateId> {
        if local.len() != self.radices.len() {
            return None;
        }
        let mut index = 0usize;
        for (&value, &radix) in local.iter().zip(&self.radices) {
            if value >= radix {
                return None;
            }
            index = index * radix + value;
        }
        Some(ChannelStateId(index))
    }

    pub fn differing_positions(&self, a: ChannelStateId, b: ChannelStateId) -> usize {
        self.states[a.0]
            .iter()
            .zip(&self.states[b.0])
            .filter(|(x, y)| x != y)
            .count()
    }

    /// All states reachable by changing exactly one position.
    pub fn neighbors(&self, state: ChannelStateId) -> Vec<ChannelStateId> {
        let local = &self.states[state.0];
        let mut neighbors = Vec::new();
        let mut probe = local.clone();
        for (position, &radix) in self.radices.iter().enumerate() {
            for value in 0..radix {
                if value == local[position] {
                    continue;
                }
                probe[position] = value;
                if let Some(id) = self.index_of(&probe) {
                    neighbors.push(id);
                }
            }
            probe[position] = local[position];
        }
        neighbors
    }
}

/// One directed state-level transition; `rate` indexes `ChannelType::rates`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTransition {
    pub from: ChannelStateId,
    pub to: ChannelStateId,
    pub position: usize,
    pub rate: usize,
}

/// A subunit-level gating process with its forward and backward rates.
#[derive(Debug, Clone, PartialEq)]
pub struct Gating {
    pub from: SubUnitStateId,
    pub to: SubUnitStateId,
    pub forward: VDepRate,
    pub backward: VDepRate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelType {
    pub name: String,
    pub subunits: Vec<SubUnitId>,
    space: StateSpace,
    /// Global subunit-state tuple per channel state.
    tuples: Vec<Vec<SubUnitStateId>>,
    /// Distinct directional rates; two per gating process.
    rates: Vec<VDepRate>,
    transitions: Vec<StateTransition>,
    outgoing: Vec<Vec<usize>>,
}

impl ChannelType {
    /// Builds the full state space and binds every gating process to all
    /// state pairs that differ only in the gated subunit.
    pub(crate) fn new(
        name: String,
        subunits: Vec<SubUnitId>,
        subunit_defs: &[SubUnit],
        gatings: &[Gating],
    ) -> Result<Self, ModelError> {
        let radices = subunits
            .iter()
            .map(|id| subunit_defs[id.0].states.len())
            .collect();
        let space = StateSpace::new(radices);
        let tuples: Vec<Vec<SubUnitStateId>> = (0..space.len())
            .map(|index| {
                space
                    .local_states(ChannelStateId(index))
                    .iter()
                    .zip(&subunits)
                    .map(|(&local, id)| subunit_defs[id.0].states[local])
                    .collect()
            })
            .collect();

        let mut rates = Vec::with_capacity(gatings.len() * 2);
        // (from substate, to substate) -> rate slot
        let mut slots: HashMap<(SubUnitStateId, SubUnitStateId), usize> = HashMap::new();
        for gating in gatings {
            slots.insert((gating.from, gating.to), rates.len());
            rates.push(gating.forward.clone());
            slots.insert((gating.to, gating.from), rates.len());
            rates.push(gating.backward.clone());
        }

        let mut channel = Self {
            name,
            subunits,
            space,
            tuples,
            rates,
            transitions: Vec::new(),
            outgoing: Vec::new(),
        };

        let mut transitions = Vec::new();
        for index in 0..channel.space.len() {
            let from = ChannelStateId(index);
            for to in channel.space.neighbors(from) {
                let transition = channel.transition(from, to)?;
                let key = (
                    channel.tuples[from.0][transition.position],
                    channel.tuples[to.0][transition.position],
                );
                if let Some(&slot) = slots.get(&key) {
                    transitions.push(StateTransition {
                        rate: slot,
                        ..transition
                    });
                }
            }
        }
        let mut outgoing = vec![Vec::new(); channel.space.len()];
        for (index, transition) in transitions.iter().enumerate() {
            outgoing[transition.from.0].push(index);
        }
        channel.transitions = transitions;
        channel.outgoing = outgoing;
        Ok(channel)
    }

    /// Validates a state-level transition slot. Rate slot 0 is a placeholder
    /// until a gating process is bound to it.
    pub fn transition(
        &self,
        from: ChannelStateId,
        to: ChannelStateId,
    ) -> Result<StateTransition, ModelError> {
        let count = self.space.len();
        if from.0 >= count || to.0 >= count {
            return Err(ModelError::UnknownChannelState {
                channel: self.name.clone(),
                state: from.0.max(to.0),
            });
        }
        let differing = self.space.differing_positions(from, to);
        if differing != 1 {
            return Err(ModelError::NonAdjacentStates {
                channel: self.name.clone(),
                from: from.0,
                to: to.0,
                differing,
            });
        }
        let position = self
            .space
            .local_states(from)
            .iter()
            .zip(self.space.local_states(to))
            .position(|(a, b)| a != b)
            .unwrap_or_default();
        Ok(StateTransition {
            from,
            to,
            position,
            rate: 0,
        })
    }

    pub fn state_space(&self) -> &StateSpace {
        &self.space
    }

    pub fn state_count(&self) -> usize {
        self.space.len()
    }

    pub fn states(&self) -> impl Iterator<Item = ChannelStateId> + '_ {
        (0..self.space.len()).map(ChannelStateId)
    }

    pub fn tuple(&self, state: ChannelStateId) -> &[SubUnitStateId] {
        &self.tuples[state.0]
    }

    /// Looks up a state by its subunit-state tuple.
    pub fn state(&self, tuple: &[SubUnitStateId]) -> Option<ChannelStateId> {
        self.tuples
            .iter()
            .position(|candidate| candidate.as_slice() == tuple)
            .map(ChannelStateId)
    }

    /// Number of subunits of `state` currently in `substate`.
    pub fn count(&self, state: ChannelStateId, substate: SubUnitStateId) -> usize {
        self.tuples[state.0].iter().filter(|&&s| s == substate).count()
    }

    /// Number of ordered states with the same substate occupancy as `state`;
    /// they are indistinguishable up to a permutation of identical subunits.
    pub fn multiplicity(&self, state: ChannelStateId) -> usize {
        let signature = self.signature(state);
        self.states()
            .filter(|&other| self.signature(other) == signature)
            .count()
    }

    fn signature(&self, state: ChannelStateId) -> Vec<(SubUnitId, SubUnitStateId, usize)> {
        self.subunits
            .iter()
            .zip(&self.tuples[state.0])
            .map(|(&subunit, &substate)| (subunit, substate))
            .counts()
            .into_iter()
            .map(|((subunit, substate), n)| (subunit, substate, n))
            .sorted()
            .collect()
    }

    pub fn rates(&self) -> &[VDepRate] {
        &self.rates
    }

    pub fn transitions(&self) -> &[StateTransition] {
        &self.transitions
    }

    /// Transition indices leaving `state`.
    pub fn outgoing(&self, state: ChannelStateId) -> &[usize] {
        &self.outgoing[state.0]
    }
}

/// Ohmic current carried by one conducting state of a channel.
#[derive(Debug, Clone, PartialEq)]
pub struct OhmicCurrent {
    pub name: String,
    pub channel: ChannelId,
    pub open_state: ChannelStateId,
    /// Single-channel conductance (S).
    pub conductance: f64,
    /// Reversal potential (V).
    pub reversal: f64,
}

impl OhmicCurrent {
    /// Outward-positive current (A) for `open` conducting channels at `v`.
    #[inline]
    pub fn current(&self, open: u32, v: f64) -> f64 {
        open as f64 * self.conductance * (v - self.reversal)
    }
}
