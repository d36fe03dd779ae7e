use thiserror::Error;

/// Broad classification of a [`PowerError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or disconnected network. Raised before any iteration.
    Structural,
    /// Invalid branch, cost or option data.
    Configuration,
    /// No feasible commitment or a required OPF solve failed.
    Infeasible,
}

#[derive(Debug, Error)]
pub enum PowerError {
    #[error("network has no slack bus")]
    NoSlackBus,

    #[error("network has {0} slack buses, at most one is allowed")]
    MultipleSlackBuses(usize),

    #[error("branch {branch} references bus index {bus} which is not in the network")]
    DanglingBranch { branch: usize, bus: usize },

    #[error("generator {gen} references bus index {bus} which is not in the network")]
    DanglingGenerator { gen: usize, bus: usize },

    #[error("load {load} references bus index {bus} which is not in the network")]
    DanglingLoad { load: usize, bus: usize },

    #[error("bus id {0} is used more than once")]
    DuplicateBusId(usize),

    #[error("bus {0} is not connected to the slack bus")]
    Islanded(usize),

    #[error("singular system: {0}")]
    Singular(String),

    #[error("sparse matrix: {0}")]
    Sparse(String),

    #[error("branch {0} has zero series impedance")]
    ZeroImpedance(usize),

    #[error("bus {0} has v_min greater than v_max")]
    InvalidVoltageLimits(usize),

    #[error("generator {gen} has {limit}_min greater than {limit}_max")]
    InvalidGeneratorLimits { gen: usize, limit: &'static str },

    #[error("invalid cost data for generator {gen}: {reason}")]
    InvalidCost { gen: usize, reason: String },

    #[error("invalid option: {0}")]
    InvalidOption(String),

    #[error("minimum generation {p_min:.3} MW cannot be reduced below load capacity {capacity:.3} MW")]
    InfeasibleCommitment { p_min: f64, capacity: f64 },

    #[error("OPF failed at stage {stage} after {iterations} iterations")]
    OpfFailed { stage: usize, iterations: usize },
}

impl PowerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PowerError::NoSlackBus
            | PowerError::MultipleSlackBuses(_)
            | PowerError::DanglingBranch { .. }
            | PowerError::DanglingGenerator { .. }
            | PowerError::DanglingLoad { .. }
            | PowerError::DuplicateBusId(_)
            | PowerError::Islanded(_)
            | PowerError::Singular(_)
            | PowerError::Sparse(_) => ErrorKind::Structural,
            PowerError::ZeroImpedance(_)
            | PowerError::InvalidVoltageLimits(_)
            | PowerError::InvalidGeneratorLimits { .. }
            | PowerError::InvalidCost { .. }
            | PowerError::InvalidOption(_) => ErrorKind::Configuration,
            PowerError::InfeasibleCommitment { .. } | PowerError::OpfFailed { .. } => {
                ErrorKind::Infeasible
            }
        }
    }
}

// Index and shape errors from sparsetools.
impl From<anyhow::Error> for PowerError {
    fn from(err: anyhow::Error) -> Self {
        PowerError::Sparse(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PowerError>;
