use thiserror::Error;

/// Rejected model definitions. Raised by `ModelBuilder::build` and never
/// corrected silently.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("subunit `{subunit}` declares no states")]
    EmptySubUnit { subunit: String },

    #[error("subunit `{subunit}` declares state `{state}` more than once")]
    DuplicateSubUnitState { subunit: String, state: String },

    #[error("channel `{channel}` has no subunits")]
    EmptyChannel { channel: String },

    #[error("channel `{channel}` references unknown subunit #{subunit}")]
    UnknownSubUnit { channel: String, subunit: usize },

    #[error("unknown channel #{channel}")]
    UnknownChannel { channel: usize },

    #[error("unknown subunit state #{state}")]
    UnknownSubUnitState { state: usize },

    #[error("channel `{channel}` has no state #{state}")]
    UnknownChannelState { channel: String, state: usize },

    #[error("channel `{channel}`: states `{from}` and `{to}` do not belong to one of its subunits")]
    ForeignTransition {
        channel: String,
        from: String,
        to: String,
    },

    #[error("channel `{channel}`: transition `{state}` -> `{state}` is a self-loop")]
    SelfTransition { channel: String, state: String },

    #[error("channel `{channel}`: gating `{from}` <-> `{to}` declared twice")]
    DuplicateGating {
        channel: String,
        from: String,
        to: String,
    },

    #[error("channel `{channel}`: states #{from} and #{to} differ in {differing} subunits")]
    NonAdjacentStates {
        channel: String,
        from: usize,
        to: usize,
        differing: usize,
    },

    #[error("channel `{channel}`: state tuple has {got} subunit states, channel has {expected} subunits")]
    SubUnitCountMismatch {
        channel: String,
        expected: usize,
        got: usize,
    },

    #[error("channel `{channel}`: state `{state}` is not a state of the subunit at position {position}")]
    SubstateMismatch {
        channel: String,
        position: usize,
        state: String,
    },

    #[error("current `{current}`: conductance {conductance} S must be finite and non-negative")]
    InvalidConductance { current: String, conductance: f64 },

    #[error("current `{current}`: reversal potential {reversal} V is not finite")]
    InvalidReversal { current: String, reversal: f64 },

    #[error("invalid voltage range [{min}, {max}] with step {step}")]
    InvalidVoltageRange { min: f64, max: f64, step: f64 },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MeshError {
    #[error("mesh has no tetrahedra")]
    Empty,

    #[error("tetrahedron {tet} references vertex {vertex}, mesh has {vertex_count} vertices")]
    VertexOutOfRange {
        tet: usize,
        vertex: usize,
        vertex_count: usize,
    },

    #[error("tetrahedron {tet} is degenerate (volume {volume})")]
    DegenerateTet { tet: usize, volume: f64 },

    #[error("face {face:?} is shared by {count} tetrahedra")]
    NonManifoldFace { face: [usize; 3], count: usize },

    #[error("vertex {vertex} has a non-finite coordinate")]
    NonFiniteVertex { vertex: usize },

    #[error("invalid grid: {cells:?} cells with spacing {spacing:?}")]
    InvalidGrid { cells: [usize; 3], spacing: [f64; 3] },
}

/// Failures of the potential field. Setup variants are configuration errors,
/// `Diverged` and `NonFinitePotential` are fatal for the current run.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FieldError {
    #[error("membrane capacitance {0} F/m^2 must be finite and positive")]
    InvalidCapacitance(f64),

    #[error("bulk resistivity {0} ohm.m must be finite and positive")]
    InvalidResistivity(f64),

    #[error("field timestep {0} s must be finite and positive")]
    InvalidTimestep(f64),

    #[error("no membrane triangles")]
    NoMembrane,

    #[error("triangle {triangle} is not a surface triangle of the mesh")]
    UnknownTriangle { triangle: usize },

    #[error("membrane triangle {triangle} is listed more than once")]
    DuplicateTriangle { triangle: usize },

    #[error("vertex {vertex} does not exist")]
    UnknownVertex { vertex: usize },

    #[error("mesh region containing vertex {vertex} has no membrane (singular system)")]
    FloatingRegion { vertex: usize },

    #[error("expected {expected} membrane conductances, got {got}")]
    ConductanceCountMismatch { expected: usize, got: usize },

    #[error("solver diverged at field step {step}: residual {residual:e} after {iterations} iterations")]
    Diverged {
        step: u64,
        iterations: usize,
        residual: f64,
    },

    #[error("non-finite potential at vertex {vertex} in field step {step}")]
    NonFinitePotential { step: u64, vertex: usize },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatingError {
    #[error("expected {expected} element voltages, got {got}")]
    VoltageCountMismatch { expected: usize, got: usize },

    #[error("kinetics timestep {0} s must be finite and positive")]
    InvalidTimestep(f64),

    #[error("element {element} out of range ({count} elements)")]
    UnknownElement { element: usize, count: usize },

    #[error("channel #{channel} out of range")]
    UnknownChannel { channel: usize },

    #[error("channel `{channel}` has no state #{state}")]
    UnknownState { channel: String, state: usize },

    #[error("channel `{channel}`: density {density} must be finite and non-negative")]
    InvalidDensity { channel: String, density: f64 },

    #[error("channel `{channel}`: population fraction {fraction} for state #{state} is invalid")]
    InvalidFraction {
        channel: String,
        state: usize,
        fraction: f64,
    },

    #[error("expected {expected} element areas, got {got}")]
    AreaCountMismatch { expected: usize, got: usize },

    #[error("channel `{channel}`: expected {expected} population fractions, got {got}")]
    FractionCountMismatch {
        channel: String,
        expected: usize,
        got: usize,
    },

    #[error(
        "channel `{channel}`: {existing} + {requested} channels on element {element} exceed the counter range"
    )]
    PopulationOverflow {
        channel: String,
        element: usize,
        existing: u64,
        requested: f64,
    },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config value `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Error, Debug)]
pub enum SimulationError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Mesh(#[from] MeshError),

    #[error(transparent)]
    Gating(#[from] GatingError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("field setup failed: {0}")]
    FieldSetup(#[source] FieldError),

    #[error("field solve failed at t = {time:e} s: {source}")]
    Field {
        time: f64,
        #[source]
        source: FieldError,
    },

    #[error("probe target does not exist: {0}")]
    UnknownProbeTarget(String),

    #[error("channels can only be injected before the run starts (t = {time:e} s)")]
    AlreadyRunning { time: f64 },

    #[error("end time {end:e} s lies before the current time {time:e} s")]
    EndBeforeNow { end: f64, time: f64 },

    #[error("reporting interval {0} s must be finite and positive")]
    InvalidReportInterval(f64),
}
