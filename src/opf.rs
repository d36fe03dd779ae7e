use crate::acopf::AcOpf;
use crate::dcopf::DcOpf;
use crate::error::Result;
use crate::ipm::{pdipm, IpmSolution, NonlinearProgram};
use crate::network::{CostModel, Network};
use crate::options::{Formulation, Options};
use crate::pf::zero_offline;
use crate::traits::LinearSolver;
use sparsetools::coo::Coo;
use std::f64::consts::PI;
use std::time::{Duration, Instant};

/// Outcome of an optimal power flow solve.
#[derive(Debug, Clone)]
pub struct OpfSolution {
    pub converged: bool,

    /// Total generation cost ($/hr).
    pub objective: f64,

    pub iterations: usize,

    /// Largest of the final feasibility, gradient and complementarity
    /// conditions.
    pub residual: f64,

    pub elapsed: Duration,
}

/// Runs an optimal power flow on `net`, minimising the total cost of the
/// online generators.
///
/// On success the generator dispatch, bus voltages, nodal prices, limit
/// multipliers and branch flows are written back to the network. When the
/// solver does not converge the network keeps its voltages and dispatch and
/// all prices and multipliers hold zero.
pub fn solve_opf(
    net: &mut Network,
    formulation: Formulation,
    opt: &Options,
    lin_solver: &dyn LinearSolver,
) -> Result<OpfSolution> {
    net.clear_results();

    opt.validate()?;
    net.validate()?;
    let refbus = net.slack_bus()?;
    let isolated = net.isolated_buses(refbus)?;

    let t0 = Instant::now();
    let layout = Layout::new(net, refbus, isolated, formulation == Formulation::AC);
    log::info!(
        "-- {:?} Optimal Power Flow: {} variables, {} online generators",
        formulation,
        layout.nx(),
        layout.gens.len()
    );

    let s = match formulation {
        Formulation::DC => run(DcOpf::new(net, &layout)?, net, &layout, opt, lin_solver)?,
        Formulation::AC => run(AcOpf::new(net, &layout)?, net, &layout, opt, lin_solver)?,
    };

    if s.converged {
        log::info!("OPF converged in {} iterations, objective {:.4}", s.iterations, s.f);
    } else {
        log::info!("OPF did not converge after {} iterations", s.iterations);
    }

    Ok(OpfSolution {
        converged: s.converged,
        objective: s.f,
        iterations: s.iterations,
        residual: s.feascond.max(s.gradcond).max(s.compcond),
        elapsed: t0.elapsed(),
    })
}

fn run<P: OpfProblem>(
    nlp: P,
    net: &mut Network,
    layout: &Layout,
    opt: &Options,
    lin_solver: &dyn LinearSolver,
) -> Result<IpmSolution> {
    let s = pdipm(&nlp, &layout.x0(net), &opt.opf, lin_solver)?;
    if s.converged {
        nlp.update(net, &s);
    }
    Ok(s)
}

/// Position of an optimisation variable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Var {
    Va(usize),
    Vm(usize),
    Pg(usize),
    Qg(usize),
    Y(usize),
}

/// Inequality rows shared by the DC and AC formulations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Limit {
    /// `x[var] <= value`
    Upper(usize, f64),

    /// `value <= x[var]`
    Lower(usize, f64),

    /// Cost segment `m * base_mva * Pg + b <= y` of a piecewise linear cost.
    Segment {
        pg: usize,
        y: usize,
        slope: f64,
        intercept: f64,
    },
}

/// Variable layout of the OPF problem:
///
/// ```txt
///     x = [Va; Vm; Pg; Qg; y]
/// ```
///
/// where `Vm` and `Qg` are only present in the AC formulation and `y`
/// holds one cost variable per generator with a piecewise linear cost.
/// Only online generators get variables.
pub(crate) struct Layout {
    pub nb: usize,
    pub base_mva: f64,
    pub refbus: usize,
    pub isolated: Vec<bool>,

    /// Network indices of the online generators.
    pub gens: Vec<usize>,

    /// Cost models of the online generators.
    pub costs: Vec<CostModel>,

    /// Positions in `gens` of the generators with piecewise linear costs.
    pub pwl: Vec<usize>,

    pub ac: bool,
}

impl Layout {
    pub fn new(net: &Network, refbus: usize, isolated: Vec<bool>, ac: bool) -> Self {
        let gens: Vec<usize> = (0..net.generators.len())
            .filter(|&k| net.generators[k].online)
            .collect();
        let costs: Vec<CostModel> = gens.iter().map(|&k| net.generators[k].cost.clone()).collect();
        let pwl = (0..gens.len()).filter(|&k| costs[k].is_pwl()).collect();
        Self {
            nb: net.buses.len(),
            base_mva: net.base_mva,
            refbus,
            isolated,
            gens,
            costs,
            pwl,
            ac,
        }
    }

    pub fn va(&self, i: usize) -> usize {
        i
    }

    pub fn vm(&self, i: usize) -> usize {
        self.nb + i
    }

    pub fn pg(&self, k: usize) -> usize {
        if self.ac {
            2 * self.nb + k
        } else {
            self.nb + k
        }
    }

    pub fn qg(&self, k: usize) -> usize {
        2 * self.nb + self.gens.len() + k
    }

    pub fn y(&self, k: usize) -> usize {
        let ng = self.gens.len();
        if self.ac {
            2 * self.nb + 2 * ng + k
        } else {
            self.nb + ng + k
        }
    }

    pub fn nx(&self) -> usize {
        self.y(self.pwl.len())
    }

    pub fn var(&self, j: usize) -> Var {
        let (nb, ng) = (self.nb, self.gens.len());
        if j < nb {
            Var::Va(j)
        } else if self.ac && j < 2 * nb {
            Var::Vm(j - nb)
        } else if j < self.pg(ng) {
            Var::Pg(j - self.pg(0))
        } else if self.ac && j < self.qg(ng) {
            Var::Qg(j - self.qg(0))
        } else {
            Var::Y(j - self.y(0))
        }
    }

    /// Buses with a power balance constraint.
    pub fn active_buses(&self) -> Vec<usize> {
        (0..self.nb).filter(|&i| !self.isolated[i]).collect()
    }

    /// Buses with a fixed voltage angle: the reference followed by the
    /// isolated buses.
    pub fn fixed_angles(&self) -> Vec<usize> {
        let isolated = (0..self.nb).filter(|&i| self.isolated[i]);
        [self.refbus].into_iter().chain(isolated).collect()
    }

    /// Variable bounds and piecewise linear cost rows. Infinite bounds
    /// are omitted.
    pub fn limits(&self, net: &Network) -> Vec<Limit> {
        let base_mva = self.base_mva;
        let mut limits = Vec::new();
        let mut bound = |var: usize, lo: f64, hi: f64| {
            if lo.is_finite() {
                limits.push(Limit::Lower(var, lo));
            }
            if hi.is_finite() {
                limits.push(Limit::Upper(var, hi));
            }
        };

        if self.ac {
            for i in self.active_buses() {
                let b = &net.buses[i];
                bound(self.vm(i), b.v_min, b.v_max);
            }
        }
        for (k, &gi) in self.gens.iter().enumerate() {
            let g = &net.generators[gi];
            bound(self.pg(k), g.p_min / base_mva, g.p_max / base_mva);
            if self.ac {
                bound(self.qg(k), g.q_min / base_mva, g.q_max / base_mva);
            }
        }
        for (n, &k) in self.pwl.iter().enumerate() {
            for (slope, intercept) in self.costs[k].segments() {
                limits.push(Limit::Segment {
                    pg: self.pg(k),
                    y: self.y(n),
                    slope,
                    intercept,
                });
            }
        }
        limits
    }

    /// Initial point: angles and magnitudes from the bus data with
    /// generator set-points at their buses, dispatch mid-way between
    /// finite limits.
    pub fn x0(&self, net: &Network) -> Vec<f64> {
        let base_mva = self.base_mva;
        let mut x = vec![0.0; self.nx()];

        for (i, b) in net.buses.iter().enumerate() {
            x[self.va(i)] = b.v_phase * PI / 180.0;
            if self.ac {
                x[self.vm(i)] = b.v_amplitude;
            }
        }

        let start = |lo: f64, hi: f64, p: f64| match (lo.is_finite(), hi.is_finite()) {
            (true, true) => (lo + hi) / 2.0,
            (true, false) => p.max(lo),
            (false, true) => p.min(hi),
            (false, false) => p,
        };
        for (k, &gi) in self.gens.iter().enumerate() {
            let g = &net.generators[gi];
            x[self.pg(k)] = start(g.p_min, g.p_max, g.p) / base_mva;
            if self.ac {
                x[self.qg(k)] = start(g.q_min, g.q_max, g.q) / base_mva;
                if !self.isolated[g.bus] {
                    let b = &net.buses[g.bus];
                    x[self.vm(g.bus)] = g.v_amplitude.clamp(b.v_min, b.v_max);
                }
            }
        }
        for (n, &k) in self.pwl.iter().enumerate() {
            let p = x[self.pg(k)] * base_mva;
            x[self.y(n)] = self.costs[k].total_cost(p);
        }
        x
    }

    /// Total cost and its gradient with respect to `x`.
    pub fn cost(&self, x: &[f64]) -> (f64, Vec<f64>) {
        let base_mva = self.base_mva;
        let mut f = 0.0;
        let mut df = vec![0.0; x.len()];
        for (k, cost) in self.costs.iter().enumerate() {
            if cost.is_pwl() {
                continue;
            }
            let p = x[self.pg(k)] * base_mva;
            f += cost.total_cost(p);
            df[self.pg(k)] = base_mva * cost.marginal_cost(p);
        }
        for n in 0..self.pwl.len() {
            f += x[self.y(n)];
            df[self.y(n)] = 1.0;
        }
        (f, df)
    }

    /// Adds `cost_mult` times the cost Hessian.
    pub fn add_cost_hessian(&self, x: &[f64], cost_mult: f64, hess: &mut Coo<usize, f64>) {
        let base_mva = self.base_mva;
        for (k, cost) in self.costs.iter().enumerate() {
            if cost.is_pwl() {
                continue;
            }
            let d2f = cost.curvature(x[self.pg(k)] * base_mva);
            if d2f != 0.0 {
                hess.push(self.pg(k), self.pg(k), cost_mult * base_mva * base_mva * d2f);
            }
        }
    }

    /// Evaluates `limits` into rows `row0..` of `g` and `dg`.
    pub fn eval_limits(
        &self,
        limits: &[Limit],
        x: &[f64],
        row0: usize,
        g: &mut [f64],
        dg: &mut Coo<usize, f64>,
    ) {
        for (n, limit) in limits.iter().enumerate() {
            let r = row0 + n;
            match *limit {
                Limit::Upper(j, v) => {
                    g[r] = x[j] - v;
                    dg.push(r, j, 1.0);
                }
                Limit::Lower(j, v) => {
                    g[r] = v - x[j];
                    dg.push(r, j, -1.0);
                }
                Limit::Segment {
                    pg,
                    y,
                    slope,
                    intercept,
                } => {
                    g[r] = slope * self.base_mva * x[pg] + intercept - x[y];
                    dg.push(r, pg, slope * self.base_mva);
                    dg.push(r, y, -1.0);
                }
            }
        }
    }

    /// Writes the dispatch and the bound multipliers of `limits`, whose
    /// multipliers start at `mu[0]`.
    pub fn update_limits(&self, net: &mut Network, limits: &[Limit], s: &IpmSolution) {
        let base_mva = self.base_mva;
        for (k, &gi) in self.gens.iter().enumerate() {
            let g = &mut net.generators[gi];
            g.p = s.x[self.pg(k)] * base_mva;
            if self.ac {
                g.q = s.x[self.qg(k)] * base_mva;
            }
        }
        for (limit, &mu) in limits.iter().zip(&s.mu) {
            let (j, upper) = match *limit {
                Limit::Upper(j, _) => (j, true),
                Limit::Lower(j, _) => (j, false),
                Limit::Segment { .. } => continue,
            };
            match (self.var(j), upper) {
                (Var::Vm(i), true) => net.buses[i].mu_v_max = mu,
                (Var::Vm(i), false) => net.buses[i].mu_v_min = mu,
                (Var::Pg(k), true) => net.generators[self.gens[k]].mu_p_max = mu / base_mva,
                (Var::Pg(k), false) => net.generators[self.gens[k]].mu_p_min = mu / base_mva,
                (Var::Qg(k), true) => net.generators[self.gens[k]].mu_q_max = mu / base_mva,
                (Var::Qg(k), false) => net.generators[self.gens[k]].mu_q_min = mu / base_mva,
                _ => {}
            }
        }
        zero_offline(net);
    }
}

/// Shared by both formulations so `solve_opf` can treat them alike.
pub(crate) trait OpfProblem: NonlinearProgram {
    /// Writes the solution `s` back to the network.
    fn update(&self, net: &mut Network, s: &IpmSolution);
}
