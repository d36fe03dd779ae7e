use crate::error::{PowerError, Result};
use std::collections::{HashSet, VecDeque};

/// Network models a power system as a directed graph of buses connected
/// by branches, with generators and loads attached to buses.
///
/// Branches, generators and loads refer to buses by their position in
/// `buses`. Positions stay stable for the lifetime of the network.
#[derive(Clone, Debug)]
pub struct Network {
    pub name: String,

    /// System MVA base used for converting power into per-unit quantities.
    /// Default value is 100.
    pub base_mva: f64,

    pub buses: Vec<Bus>,
    pub branches: Vec<Branch>,

    /// Generators and dispatchable loads.
    pub generators: Vec<Generator>,

    /// Fixed loads.
    pub loads: Vec<Load>,
}

/// Bus is a node in the power system graph structure.
#[derive(Clone, Debug)]
pub struct Bus {
    /// Unique bus number.
    pub id: usize,
    pub name: String,

    /// Reference bus for voltage angle and system power balance.
    pub slack: bool,

    /// Voltage magnitude (p.u.).
    pub v_amplitude: f64,

    /// Voltage angle (degrees).
    pub v_phase: f64,

    /// Maximum voltage magnitude (p.u.).
    pub v_max: f64,

    /// Minimum voltage magnitude (p.u.).
    pub v_min: f64,

    /// Shunt conductance (MW demanded at V = 1.0 p.u.).
    pub g_shunt: f64,

    /// Shunt susceptance (MVAr injected at V = 1.0 p.u.).
    pub b_shunt: f64,

    /// Lagrange multiplier on real power mismatch (u/MW).
    pub p_lambda: f64,

    /// Lagrange multiplier on reactive power mismatch (u/MVAr).
    pub q_lambda: f64,

    /// Kuhn-Tucker multiplier on upper voltage limit (u/p.u.).
    pub mu_v_max: f64,

    /// Kuhn-Tucker multiplier on lower voltage limit (u/p.u.).
    pub mu_v_min: f64,
}

impl Default for Bus {
    fn default() -> Self {
        Self {
            id: 0,
            name: String::new(),
            slack: false,
            v_amplitude: 1.0,
            v_phase: 0.0,
            v_max: 1.1,
            v_min: 0.9,
            g_shunt: 0.0,
            b_shunt: 0.0,
            p_lambda: 0.0,
            q_lambda: 0.0,
            mu_v_max: 0.0,
            mu_v_min: 0.0,
        }
    }
}

/// Branch represents either a transmission line/cable or a two winding
/// transformer.
#[derive(Clone, Debug)]
pub struct Branch {
    pub name: String,

    /// Index of the source ("from") bus.
    pub source: usize,

    /// Index of the target ("to") bus.
    pub target: usize,

    /// Resistance (p.u.).
    pub r: f64,

    /// Reactance (p.u.).
    pub x: f64,

    /// Total line charging susceptance (p.u.).
    pub b: f64,

    /// MVA rating. Zero means unlimited.
    pub s_max: f64,

    /// Transformer off nominal turns ratio. Zero means a line (ratio 1).
    pub ratio: f64,

    /// Transformer phase shift angle (degrees), positive => delay.
    pub phase_shift: f64,

    pub online: bool,

    /// Real power injected at the source bus end (MW).
    pub p_source: f64,

    /// Reactive power injected at the source bus end (MVAr).
    pub q_source: f64,

    /// Real power injected at the target bus end (MW).
    pub p_target: f64,

    /// Reactive power injected at the target bus end (MVAr).
    pub q_target: f64,

    /// Kuhn-Tucker multiplier on MVA limit at the source end (u/MVA).
    pub mu_s_source: f64,

    /// Kuhn-Tucker multiplier on MVA limit at the target end (u/MVA).
    pub mu_s_target: f64,
}

impl Default for Branch {
    fn default() -> Self {
        Self {
            name: String::new(),
            source: 0,
            target: 0,
            r: 0.0,
            x: 0.0,
            b: 0.0,
            s_max: 0.0,
            ratio: 0.0,
            phase_shift: 0.0,
            online: true,
            p_source: 0.0,
            q_source: 0.0,
            p_target: 0.0,
            q_target: 0.0,
            mu_s_source: 0.0,
            mu_s_target: 0.0,
        }
    }
}

/// Generator cost function, units of cost and output are $/hr and MW.
#[derive(Clone, Debug, PartialEq)]
pub enum CostModel {
    /// Coefficients of an n-th order polynomial, starting with the highest
    /// order, where cost is f(p) = cn*p^n + ... + c1*p + c0.
    Polynomial(Vec<f64>),

    /// Break-points (p0,f0), (p1,f1), ..., (pn,fn) with p0 < p1 < ... < pn.
    PiecewiseLinear(Vec<(f64, f64)>),
}

impl Default for CostModel {
    fn default() -> Self {
        CostModel::Polynomial(Vec::default())
    }
}

impl CostModel {
    /// Total cost at output `p` (MW). Piecewise linear costs are
    /// extrapolated from their end segments.
    pub fn total_cost(&self, p: f64) -> f64 {
        match self {
            CostModel::Polynomial(c) => c.iter().fold(0.0, |acc, &ci| acc * p + ci),
            CostModel::PiecewiseLinear(points) => match self.segment_at(p) {
                Some((m, b)) => m * p + b,
                None => points.first().map(|&(_, f)| f).unwrap_or(0.0),
            },
        }
    }

    /// Slope and intercept of the linear segment covering `p`.
    fn segment_at(&self, p: f64) -> Option<(f64, f64)> {
        match self {
            CostModel::Polynomial(_) => None,
            CostModel::PiecewiseLinear(points) => {
                let segments = self.segments();
                if segments.is_empty() {
                    return None;
                }
                let k = points[1..points.len() - 1]
                    .iter()
                    .take_while(|&&(pk, _)| p > pk)
                    .count();
                Some(segments[k])
            }
        }
    }

    /// First derivative of the cost with respect to output ($/MWh).
    pub fn marginal_cost(&self, p: f64) -> f64 {
        match self {
            CostModel::Polynomial(c) => {
                let n = c.len();
                c.iter()
                    .enumerate()
                    .take(n.saturating_sub(1))
                    .fold(0.0, |acc, (k, &ck)| acc * p + ck * (n - 1 - k) as f64)
            }
            CostModel::PiecewiseLinear(_) => self.segment_at(p).map(|(m, _)| m).unwrap_or(0.0),
        }
    }

    /// Second derivative of a polynomial cost. Zero for piecewise linear costs.
    pub fn curvature(&self, p: f64) -> f64 {
        match self {
            CostModel::Polynomial(c) => {
                let n = c.len();
                c.iter()
                    .enumerate()
                    .take(n.saturating_sub(2))
                    .fold(0.0, |acc, (k, &ck)| {
                        let e = (n - 1 - k) as f64;
                        acc * p + ck * e * (e - 1.0)
                    })
            }
            CostModel::PiecewiseLinear(_) => 0.0,
        }
    }

    /// Slope and intercept of each linear segment.
    pub fn segments(&self) -> Vec<(f64, f64)> {
        match self {
            CostModel::Polynomial(_) => Vec::default(),
            CostModel::PiecewiseLinear(points) => points
                .windows(2)
                .map(|w| {
                    let ((p0, f0), (p1, f1)) = (w[0], w[1]);
                    let m = (f1 - f0) / (p1 - p0);
                    (m, f0 - m * p0)
                })
                .collect(),
        }
    }

    pub fn is_pwl(&self) -> bool {
        matches!(self, CostModel::PiecewiseLinear(_))
    }

    fn check(&self, gen: usize) -> Result<()> {
        let invalid = |reason: &str| PowerError::InvalidCost {
            gen,
            reason: reason.to_string(),
        };
        match self {
            CostModel::Polynomial(c) => {
                if c.iter().any(|ci| !ci.is_finite()) {
                    return Err(invalid("non-finite polynomial coefficient"));
                }
            }
            CostModel::PiecewiseLinear(points) => {
                if points.len() < 2 {
                    return Err(invalid("piecewise linear cost needs two or more points"));
                }
                if points.windows(2).any(|w| w[1].0 <= w[0].0) {
                    return Err(invalid("break-points must be strictly increasing"));
                }
                let slopes = self.segments();
                if slopes.windows(2).any(|w| w[1].0 < w[0].0 - 1e-10) {
                    return Err(invalid("piecewise linear cost must be convex"));
                }
            }
        }
        Ok(())
    }
}

/// Generator or dispatchable load attached to a single bus.
#[derive(Clone, Debug)]
pub struct Generator {
    pub name: String,

    /// Index of the bus the generator is attached to.
    pub bus: usize,

    /// Real power output (MW).
    pub p: f64,

    /// Reactive power output (MVAr).
    pub q: f64,

    /// Minimum real power output (MW).
    pub p_min: f64,

    /// Maximum real power output (MW).
    pub p_max: f64,

    /// Minimum reactive power output (MVAr).
    pub q_min: f64,

    /// Maximum reactive power output (MVAr).
    pub q_max: f64,

    /// Voltage magnitude setpoint (p.u.).
    pub v_amplitude: f64,

    /// Commitment status, toggled by unit decommitment.
    pub online: bool,

    pub cost: CostModel,

    /// Kuhn-Tucker multiplier on lower Pg limit (u/MW).
    pub mu_p_min: f64,

    /// Kuhn-Tucker multiplier on upper Pg limit (u/MW).
    pub mu_p_max: f64,

    /// Kuhn-Tucker multiplier on lower Qg limit (u/MVAr).
    pub mu_q_min: f64,

    /// Kuhn-Tucker multiplier on upper Qg limit (u/MVAr).
    pub mu_q_max: f64,
}

impl Default for Generator {
    fn default() -> Self {
        Self {
            name: String::new(),
            bus: 0,
            p: 0.0,
            q: 0.0,
            p_min: 0.0,
            p_max: f64::INFINITY,
            q_min: f64::NEG_INFINITY,
            q_max: f64::INFINITY,
            v_amplitude: 1.0,
            online: true,
            cost: CostModel::default(),
            mu_p_min: 0.0,
            mu_p_max: 0.0,
            mu_q_min: 0.0,
            mu_q_max: 0.0,
        }
    }
}

impl Generator {
    /// Checks for dispatchable loads.
    pub fn is_load(&self) -> bool {
        self.p_min < 0.0 && self.p_max == 0.0
    }

    /// Average cost at minimum output ($/MWh).
    pub fn average_cost_at_p_min(&self) -> f64 {
        self.cost.total_cost(self.p_min) / self.p_min
    }
}

/// Fixed demand attached to a single bus.
#[derive(Clone, Debug)]
pub struct Load {
    pub name: String,
    pub bus: usize,

    /// Real power demand (MW).
    pub p: f64,

    /// Reactive power demand (MVAr).
    pub q: f64,

    pub online: bool,
}

impl Default for Load {
    fn default() -> Self {
        Self {
            name: String::new(),
            bus: 0,
            p: 0.0,
            q: 0.0,
            online: true,
        }
    }
}

impl Network {
    pub fn new(name: &str, base_mva: f64) -> Self {
        Self {
            name: name.to_string(),
            base_mva,
            buses: Vec::default(),
            branches: Vec::default(),
            generators: Vec::default(),
            loads: Vec::default(),
        }
    }

    /// Adds a bus and returns its index.
    pub fn add_bus(&mut self, bus: Bus) -> usize {
        self.buses.push(bus);
        self.buses.len() - 1
    }

    pub fn add_branch(&mut self, branch: Branch) -> usize {
        self.branches.push(branch);
        self.branches.len() - 1
    }

    pub fn add_generator(&mut self, generator: Generator) -> usize {
        self.generators.push(generator);
        self.generators.len() - 1
    }

    pub fn add_load(&mut self, load: Load) -> usize {
        self.loads.push(load);
        self.loads.len() - 1
    }

    /// Generators attached to bus `i`, in network order.
    pub fn generators_at(&self, i: usize) -> impl Iterator<Item = (usize, &Generator)> {
        self.generators
            .iter()
            .enumerate()
            .filter(move |(_, g)| g.bus == i)
    }

    /// Loads attached to bus `i`, in network order.
    pub fn loads_at(&self, i: usize) -> impl Iterator<Item = (usize, &Load)> {
        self.loads.iter().enumerate().filter(move |(_, l)| l.bus == i)
    }

    /// Index of the single slack bus.
    pub fn slack_bus(&self) -> Result<usize> {
        let slack: Vec<usize> = self
            .buses
            .iter()
            .enumerate()
            .filter(|(_, b)| b.slack)
            .map(|(i, _)| i)
            .collect();
        match slack.len() {
            0 => Err(PowerError::NoSlackBus),
            1 => Ok(slack[0]),
            n => Err(PowerError::MultipleSlackBuses(n)),
        }
    }

    /// Checks references, impedances, voltage limits and cost data.
    pub fn validate(&self) -> Result<()> {
        let nb = self.buses.len();

        let mut ids = HashSet::new();
        for (i, b) in self.buses.iter().enumerate() {
            if !ids.insert(b.id) {
                return Err(PowerError::DuplicateBusId(b.id));
            }
            if b.v_min > b.v_max {
                return Err(PowerError::InvalidVoltageLimits(i));
            }
        }
        for (l, br) in self.branches.iter().enumerate() {
            for bus in [br.source, br.target] {
                if bus >= nb {
                    return Err(PowerError::DanglingBranch { branch: l, bus });
                }
            }
            if br.online && br.r == 0.0 && br.x == 0.0 {
                return Err(PowerError::ZeroImpedance(l));
            }
        }
        for (k, g) in self.generators.iter().enumerate() {
            if g.bus >= nb {
                return Err(PowerError::DanglingGenerator { gen: k, bus: g.bus });
            }
            if g.p_min > g.p_max {
                return Err(PowerError::InvalidGeneratorLimits { gen: k, limit: "p" });
            }
            if g.q_min > g.q_max {
                return Err(PowerError::InvalidGeneratorLimits { gen: k, limit: "q" });
            }
            g.cost.check(k)?;
        }
        for (k, l) in self.loads.iter().enumerate() {
            if l.bus >= nb {
                return Err(PowerError::DanglingLoad { load: k, bus: l.bus });
            }
        }
        Ok(())
    }

    /// Returns a flag per bus marking isolated buses: buses not reachable
    /// from the slack bus that have nothing attached. Any other bus that
    /// cannot be reached from the slack bus is reported as islanded.
    pub fn isolated_buses(&self, slack: usize) -> Result<Vec<bool>> {
        let nb = self.buses.len();
        let mut adj = vec![Vec::new(); nb];
        for br in self.branches.iter().filter(|br| br.online) {
            adj[br.source].push(br.target);
            adj[br.target].push(br.source);
        }

        let mut reached = vec![false; nb];
        let mut queue = VecDeque::from([slack]);
        reached[slack] = true;
        while let Some(i) = queue.pop_front() {
            for &j in &adj[i] {
                if !reached[j] {
                    reached[j] = true;
                    queue.push_back(j);
                }
            }
        }

        let mut isolated = vec![false; nb];
        for i in (0..nb).filter(|&i| !reached[i]) {
            let b = &self.buses[i];
            let attached = !adj[i].is_empty()
                || self.generators_at(i).any(|(_, g)| g.online)
                || self.loads_at(i).any(|(_, l)| l.online && (l.p != 0.0 || l.q != 0.0))
                || b.g_shunt != 0.0
                || b.b_shunt != 0.0;
            if attached {
                return Err(PowerError::Islanded(b.id));
            }
            isolated[i] = true;
        }
        Ok(isolated)
    }

    /// Resets prices, multipliers and branch flows to zero.
    pub fn clear_results(&mut self) {
        for b in self.buses.iter_mut() {
            b.p_lambda = 0.0;
            b.q_lambda = 0.0;
            b.mu_v_max = 0.0;
            b.mu_v_min = 0.0;
        }
        for g in self.generators.iter_mut() {
            g.mu_p_min = 0.0;
            g.mu_p_max = 0.0;
            g.mu_q_min = 0.0;
            g.mu_q_max = 0.0;
        }
        for br in self.branches.iter_mut() {
            br.p_source = 0.0;
            br.q_source = 0.0;
            br.p_target = 0.0;
            br.q_target = 0.0;
            br.mu_s_source = 0.0;
            br.mu_s_target = 0.0;
        }
    }

    /// Online generator commitment, indexed by generator position.
    pub fn commitment(&self) -> Vec<bool> {
        self.generators.iter().map(|g| g.online).collect()
    }

    pub fn set_commitment(&mut self, online: &[bool]) {
        for (g, &on) in self.generators.iter_mut().zip(online) {
            g.online = on;
        }
    }
}
