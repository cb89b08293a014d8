//! Model definition. A `ModelBuilder` collects subunits, channels, gating
//! processes and ohmic currents; `build` validates everything at once and
//! returns an immutable `Model`.

use log::info;

use crate::channels::{
    ChannelId, ChannelStateId, ChannelType, CurrentId, Gating, OhmicCurrent, SubUnit, SubUnitId,
    SubUnitStateId,
};
use crate::error::ModelError;
use crate::rate::VDepRate;

#[derive(Debug, Clone)]
struct ChannelDecl {
    name: String,
    subunits: Vec<SubUnitId>,
    gatings: Vec<Gating>,
}

#[derive(Debug, Clone)]
struct CurrentDecl {
    name: String,
    channel: ChannelId,
    open_state: Vec<SubUnitStateId>,
    conductance: f64,
    reversal: f64,
}

#[derive(Debug, Clone, Default)]
pub struct ModelBuilder {
    state_names: Vec<String>,
    subunits: Vec<SubUnit>,
    channels: Vec<ChannelDecl>,
    currents: Vec<CurrentDecl>,
    pending: Option<ModelError>,
}

impl ModelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a subunit with its named states; returns the subunit id and
    /// the ids of its states in declaration order.
    pub fn add_subunit(&mut self, name: &str, states: &[&str]) -> (SubUnitId, Vec<SubUnitStateId>) {
        let ids: Vec<SubUnitStateId> = states
            .iter()
            .map(|state| {
                self.state_names.push((*state).to_owned());
                SubUnitStateId(self.state_names.len() - 1)
            })
            .collect();
        self.subunits.push(SubUnit {
            name: name.to_owned(),
            states: ids.clone(),
        });
        (SubUnitId(self.subunits.len() - 1), ids)
    }

    /// Declares a channel as an ordered tuple of subunits (repeats allowed).
    pub fn add_channel(&mut self, name: &str, subunits: &[SubUnitId]) -> ChannelId {
        self.channels.push(ChannelDecl {
            name: name.to_owned(),
            subunits: subunits.to_vec(),
            gatings: Vec::new(),
        });
        ChannelId(self.channels.len() - 1)
    }

    /// Declares `from <-> to` for every subunit of `channel` drawing from the
    /// state set that contains both states.
    pub fn add_gating(
        &mut self,
        channel: ChannelId,
        from: SubUnitStateId,
        to: SubUnitStateId,
        forward: VDepRate,
        backward: VDepRate,
    ) -> &mut Self {
        if let Some(decl) = self.channels.get_mut(channel.0) {
            decl.gatings.push(Gating {
                from,
                to,
                forward,
                backward,
            });
        } else if self.pending.is_none() {
            self.pending = Some(ModelError::UnknownChannel { channel: channel.0 });
        }
        self
    }

    /// Binds a conducting channel state to a single-channel conductance (S)
    /// and reversal potential (V).
    pub fn add_ohmic_current(
        &mut self,
        name: &str,
        channel: ChannelId,
        open_state: &[SubUnitStateId],
        conductance: f64,
        reversal: f64,
    ) -> CurrentId {
        self.currents.push(CurrentDecl {
            name: name.to_owned(),
            channel,
            open_state: open_state.to_vec(),
            conductance,
            reversal,
        });
        CurrentId(self.currents.len() - 1)
    }

    pub fn build(self) -> Result<Model, ModelError> {
        let ModelBuilder {
            state_names,
            subunits,
            channels: channel_decls,
            currents: current_decls,
            pending,
        } = self;
        if let Some(error) = pending {
            return Err(error);
        }

        for subunit in &subunits {
            if subunit.states.is_empty() {
                return Err(ModelError::EmptySubUnit {
                    subunit: subunit.name.clone(),
                });
            }
            for (i, a) in subunit.states.iter().enumerate() {
                if subunit.states[i + 1..]
                    .iter()
                    .any(|b| state_names[b.0] == state_names[a.0])
                {
                    return Err(ModelError::DuplicateSubUnitState {
                        subunit: subunit.name.clone(),
                        state: state_names[a.0].clone(),
                    });
                }
            }
        }

        let mut channels = Vec::with_capacity(channel_decls.len());
        for decl in channel_decls {
            validate_channel(&decl, &subunits, &state_names)?;
            channels.push(ChannelType::new(
                decl.name,
                decl.subunits,
                &subunits,
                &decl.gatings,
            )?);
        }

        let mut currents = Vec::with_capacity(current_decls.len());
        for decl in current_decls {
            let channel = channels
                .get(decl.channel.0)
                .ok_or(ModelError::UnknownChannel {
                    channel: decl.channel.0,
                })?;
            let open_state = resolve_state(channel, &decl.open_state, &subunits, &state_names)?;
            if !decl.conductance.is_finite() || decl.conductance < 0.0 {
                return Err(ModelError::InvalidConductance {
                    current: decl.name,
                    conductance: decl.conductance,
                });
            }
            if !decl.reversal.is_finite() {
                return Err(ModelError::InvalidReversal {
                    current: decl.name,
                    reversal: decl.reversal,
                });
            }
            currents.push(OhmicCurrent {
                name: decl.name,
                channel: decl.channel,
                open_state,
                conductance: decl.conductance,
                reversal: decl.reversal,
            });
        }

        for channel in &channels {
            info!(
                "Channel {}: {} states, {} transitions, {} rate laws",
                channel.name,
                channel.state_count(),
                channel.transitions().len(),
                channel.rates().len()
            );
        }

        Ok(Model {
            state_names,
            subunits,
            channels,
            currents,
        })
    }
}

fn validate_channel(
    decl: &ChannelDecl,
    subunits: &[SubUnit],
    state_names: &[String],
) -> Result<(), ModelError> {
    if decl.subunits.is_empty() {
        return Err(ModelError::EmptyChannel {
            channel: decl.name.clone(),
        });
    }
    if let Some(unknown) = decl.subunits.iter().find(|id| id.0 >= subunits.len()) {
        return Err(ModelError::UnknownSubUnit {
            channel: decl.name.clone(),
            subunit: unknown.0,
        });
    }
    for (index, gating) in decl.gatings.iter().enumerate() {
        for state in [gating.from, gating.to] {
            if state.0 >= state_names.len() {
                return Err(ModelError::UnknownSubUnitState { state: state.0 });
            }
        }
        if gating.from == gating.to {
            return Err(ModelError::SelfTransition {
                channel: decl.name.clone(),
                state: state_names[gating.from.0].clone(),
            });
        }
        let shared = decl.subunits.iter().any(|id| {
            let subunit = &subunits[id.0];
            subunit.position_of(gating.from).is_some() && subunit.position_of(gating.to).is_some()
        });
        if !shared {
            return Err(ModelError::ForeignTransition {
                channel: decl.name.clone(),
                from: state_names[gating.from.0].clone(),
                to: state_names[gating.to.0].clone(),
            });
        }
        let duplicate = decl.gatings[..index].iter().any(|other| {
            (other.from == gating.from && other.to == gating.to)
                || (other.from == gating.to && other.to == gating.from)
        });
        if duplicate {
            return Err(ModelError::DuplicateGating {
                channel: decl.name.clone(),
                from: state_names[gating.from.0].clone(),
                to: state_names[gating.to.0].clone(),
            });
        }
    }
    Ok(())
}

fn resolve_state(
    channel: &ChannelType,
    tuple: &[SubUnitStateId],
    subunits: &[SubUnit],
    state_names: &[String],
) -> Result<ChannelStateId, ModelError> {
    if tuple.len() != channel.subunits.len() {
        return Err(ModelError::SubUnitCountMismatch {
            channel: channel.name.clone(),
            expected: channel.subunits.len(),
            got: tuple.len(),
        });
    }
    for (position, (&state, subunit)) in tuple.iter().zip(&channel.subunits).enumerate() {
        if subunits[subunit.0].position_of(state).is_none() {
            return Err(ModelError::SubstateMismatch {
                channel: channel.name.clone(),
                position,
                state: state_names
                    .get(state.0)
                    .cloned()
                    .unwrap_or_else(|| format!("#{}", state.0)),
            });
        }
    }
    channel
        .state(tuple)
        .ok_or_else(|| ModelError::UnknownChannelState {
            channel: channel.name.clone(),
            state: usize::MAX,
        })
}

/// Immutable channel model shared by the engine and the simulation.
#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    state_names: Vec<String>,
    subunits: Vec<SubUnit>,
    channels: Vec<ChannelType>,
    currents: Vec<OhmicCurrent>,
}

impl Model {
    pub fn channels(&self) -> &[ChannelType] {
        &self.channels
    }

    pub fn channel(&self, id: ChannelId) -> Option<&ChannelType> {
        self.channels.get(id.0)
    }

    pub fn channel_by_name(&self, name: &str) -> Option<ChannelId> {
        self.channels
            .iter()
            .position(|channel| channel.name == name)
            .map(ChannelId)
    }

    pub fn currents(&self) -> &[OhmicCurrent] {
        &self.currents
    }

    pub fn current(&self, id: CurrentId) -> Option<&OhmicCurrent> {
        self.currents.get(id.0)
    }

    pub fn current_by_name(&self, name: &str) -> Option<CurrentId> {
        self.currents
            .iter()
            .position(|current| current.name == name)
            .map(CurrentId)
    }

    pub fn subunit(&self, id: SubUnitId) -> Option<&SubUnit> {
        self.subunits.get(id.0)
    }

    pub fn state_name(&self, id: SubUnitStateId) -> Option<&str> {
        self.state_names.get(id.0).map(String::as_str)
    }

    /// Human-readable state tuple, e.g. `[Kc, Ko, Ko, Ko]`.
    pub fn describe_state(&self, channel: ChannelId, state: ChannelStateId) -> Option<String> {
        let channel = self.channel(channel)?;
        if state.0 >= channel.state_count() {
            return None;
        }
        let names: Vec<&str> = channel
            .tuple(state)
            .iter()
            .map(|&s| self.state_names[s.0].as_str())
            .collect();
        Some(format!("[{}]", names.join(", ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant(rate: f64) -> VDepRate {
        VDepRate::Constant(rate)
    }

    #[test]
    fn identical_subunits_share_one_gating_process() {
        let mut builder = ModelBuilder::new();
        let (ksu, k) = builder.add_subunit("K", &["Kc", "Ko"]);
        let channel = builder.add_channel("VGKC", &[ksu; 4]);
        builder.add_gating(channel, k[0], k[1], constant(2.0), constant(3.0));
        builder.add_ohmic_current("VGKC_I", channel, &[k[1]; 4], 20e-12, -77e-3);
        let model = builder.build().expect("model");

        let vgkc = &model.channels()[0];
        assert_eq!(vgkc.state_count(), 16);
        assert_eq!(vgkc.rates().len(), 2);
        // every state-level pair is bound to a rate
        assert_eq!(vgkc.transitions().len(), 16 * 4);
        let open = model.currents()[0].open_state;
        assert_eq!(vgkc.count(open, k[1]), 4);
        assert_eq!(vgkc.multiplicity(open), 1);
        let one_open = vgkc.state(&[k[0], k[0], k[1], k[0]]).expect("state");
        assert_eq!(vgkc.multiplicity(one_open), 4);
        let two_open = vgkc.state(&[k[1], k[0], k[1], k[0]]).expect("state");
        assert_eq!(vgkc.multiplicity(two_open), 6);
    }

    #[test]
    fn mixed_subunits_bind_rates_per_position() {
        let mut builder = ModelBuilder::new();
        let (msu, m) = builder.add_subunit("m", &["mo", "mc"]);
        let (hsu, h) = builder.add_subunit("h", &["hi", "ha"]);
        let channel = builder.add_channel("VGNaC", &[msu, msu, msu, hsu]);
        builder
            .add_gating(channel, h[0], h[1], constant(1.0), constant(2.0))
            .add_gating(channel, m[1], m[0], constant(3.0), constant(4.0));
        let model = builder.build().expect("model");
        let na = &model.channels()[0];
        assert_eq!(na.state_count(), 16);
        for transition in na.transitions() {
            let rate = na.rates()[transition.rate].rate(0.0);
            let from = na.tuple(transition.from)[transition.position];
            let to = na.tuple(transition.to)[transition.position];
            let expected = match (from, to) {
                (a, b) if a == h[0] && b == h[1] => 1.0,
                (a, b) if a == h[1] && b == h[0] => 2.0,
                (a, b) if a == m[1] && b == m[0] => 3.0,
                (a, b) if a == m[0] && b == m[1] => 4.0,
                _ => panic!("unexpected transition"),
            };
            assert_eq!(rate, expected);
        }
        assert_eq!(
            model.describe_state(ChannelId(0), ChannelStateId(0)).as_deref(),
            Some("[mo, mo, mo, hi]")
        );
    }

    #[test]
    fn non_adjacent_transition_is_rejected() {
        let mut builder = ModelBuilder::new();
        let (ksu, k) = builder.add_subunit("K", &["Kc", "Ko"]);
        let channel = builder.add_channel("VGKC", &[ksu; 4]);
        builder.add_gating(channel, k[0], k[1], constant(1.0), constant(1.0));
        let model = builder.build().expect("model");
        let vgkc = &model.channels()[0];
        let closed = vgkc.state(&[k[0]; 4]).expect("state");
        let open = vgkc.state(&[k[1]; 4]).expect("state");
        assert!(matches!(
            vgkc.transition(closed, open),
            Err(ModelError::NonAdjacentStates { differing: 4, .. })
        ));
        assert!(matches!(
            vgkc.transition(closed, closed),
            Err(ModelError::NonAdjacentStates { differing: 0, .. })
        ));
        let one = vgkc.state(&[k[1], k[0], k[0], k[0]]).expect("state");
        assert!(vgkc.transition(closed, one).is_ok());
    }

    #[test]
    fn foreign_gating_is_rejected() {
        let mut builder = ModelBuilder::new();
        let (ksu, k) = builder.add_subunit("K", &["Kc", "Ko"]);
        let (_, m) = builder.add_subunit("m", &["mo", "mc"]);
        let channel = builder.add_channel("VGKC", &[ksu]);
        builder.add_gating(channel, k[0], m[0], constant(1.0), constant(1.0));
        assert!(matches!(
            builder.build(),
            Err(ModelError::ForeignTransition { .. })
        ));
    }

    #[test]
    fn duplicate_gating_is_rejected() {
        let mut builder = ModelBuilder::new();
        let (ksu, k) = builder.add_subunit("K", &["Kc", "Ko"]);
        let channel = builder.add_channel("VGKC", &[ksu]);
        builder
            .add_gating(channel, k[0], k[1], constant(1.0), constant(1.0))
            .add_gating(channel, k[1], k[0], constant(1.0), constant(1.0));
        assert!(matches!(
            builder.build(),
            Err(ModelError::DuplicateGating { .. })
        ));
    }

    #[test]
    fn inconsistent_open_state_is_rejected() {
        let mut builder = ModelBuilder::new();
        let (ksu, k) = builder.add_subunit("K", &["Kc", "Ko"]);
        let channel = builder.add_channel("VGKC", &[ksu, ksu]);
        builder.add_ohmic_current("short", channel, &[k[1]], 1e-12, 0.0);
        assert!(matches!(
            builder.build(),
            Err(ModelError::SubUnitCountMismatch {
                expected: 2,
                got: 1,
                ..
            })
        ));

        let mut builder = ModelBuilder::new();
        let (ksu, k) = builder.add_subunit("K", &["Kc", "Ko"]);
        let (_, m) = builder.add_subunit("m", &["mo", "mc"]);
        let channel = builder.add_channel("VGKC", &[ksu, ksu]);
        builder.add_ohmic_current("mixed", channel, &[k[1], m[0]], 1e-12, 0.0);
        assert!(matches!(
            builder.build(),
            Err(ModelError::SubstateMismatch { position: 1, .. })
        ));
    }

    #[test]
    fn gating_on_unknown_channel_is_rejected() {
        let mut builder = ModelBuilder::new();
        let (_, k) = builder.add_subunit("K", &["Kc", "Ko"]);
        builder.add_gating(ChannelId(3), k[0], k[1], constant(1.0), constant(1.0));
        assert_eq!(
            builder.build(),
            Err(ModelError::UnknownChannel { channel: 3 })
        );
    }

    #[test]
    fn negative_conductance_is_rejected() {
        let mut builder = ModelBuilder::new();
        let (lsu, l) = builder.add_subunit("L", &["lsus"]);
        let channel = builder.add_channel("Leak", &[lsu]);
        builder.add_ohmic_current("Leak_I", channel, &[l[0]], -1e-12, -54.4e-3);
        assert!(matches!(
            builder.build(),
            Err(ModelError::InvalidConductance { .. })
        ));
    }

    #[test]
    fn empty_declarations_are_rejected() {
        let mut builder = ModelBuilder::new();
        builder.add_subunit("nothing", &[]);
        assert!(matches!(builder.build(), Err(ModelError::EmptySubUnit { .. })));

        let mut builder = ModelBuilder::new();
        builder.add_channel("hollow", &[]);
        assert!(matches!(builder.build(), Err(ModelError::EmptyChannel { .. })));
    }
}
