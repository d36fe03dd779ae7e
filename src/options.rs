use crate::error::{PowerError, Result};
use clap::ValueEnum;
use derive_builder::Builder;

/// Network equations used by power flow and OPF.
#[derive(Debug, PartialEq, Copy, Clone, ValueEnum)]
pub enum Formulation {
    /// Full non-linear AC equations.
    AC,
    /// Linearized DC equations that assume lossless branches,
    /// 1pu voltages and small voltage angle differences.
    DC,
}

#[derive(Debug, PartialEq, Copy, Clone, ValueEnum)]
pub enum Alg {
    /// Newton's method.
    NR,
    /// Fast-Decoupled method (XB version).
    FDXB,
    /// Fast-Decoupled method (BX version).
    FDBX,
}

#[derive(Debug, PartialEq, Copy, Clone)]
pub enum GenQLimits {
    IgnoreLimits,
    /// Simultaneous bus type conversion.
    Simultaneous,
    /// One-at-a-time bus type conversion.
    OneAtATime,
}

#[derive(Debug, Clone, Builder)]
#[builder(default)]
pub struct PfOpt {
    /// AC power flow algorithm.
    pub algorithm: Alg,

    /// Termination tolerance on per unit P & Q mismatch. Default value is 1e-8.
    pub tolerance: f64,

    /// Maximum number of iterations for Newton's method. Default value is 100.
    pub max_it_nr: usize,

    /// Maximum number of iterations for fast decoupled method. Default value is 30.
    pub max_it_fd: usize,

    /// Enforce gen reactive power limits at expense of |V|.
    pub enforce_q_limits: GenQLimits,
}

impl Default for PfOpt {
    fn default() -> Self {
        Self {
            algorithm: Alg::NR,
            tolerance: 1e-8,
            max_it_nr: 100,
            max_it_fd: 30,
            enforce_q_limits: GenQLimits::OneAtATime,
        }
    }
}

impl PfOpt {
    pub fn max_it(&self) -> usize {
        match self.algorithm {
            Alg::NR => self.max_it_nr,
            Alg::FDXB | Alg::FDBX => self.max_it_fd,
        }
    }
}

/// Primal-dual interior point method parameters.
#[derive(Debug, Clone, Builder)]
#[builder(default)]
pub struct IpmOpt {
    /// Termination tolerance on feasibility, gradient and complementarity.
    pub eps: f64,

    /// Maximum number of iterations.
    pub max_it: usize,

    /// Lower bound on the barrier parameter.
    pub mumin: f64,

    /// Maximum centering parameter.
    pub sigmamax: f64,

    /// Maximum forcing number.
    pub etamax: f64,

    /// Maximum step size, fraction of the distance to the boundary.
    pub alphamax: f64,

    /// Minimum step size before the line search gives up.
    pub alphamin: f64,

    /// Backtracking granularity.
    pub beta: f64,

    /// Sufficient decrease factor.
    pub tau: f64,

    /// Scale factor applied to the objective inside the solver.
    pub cost_mult: f64,

    /// Inequality constraints with g(x) below `-feastol` are treated as
    /// slack when reporting multipliers.
    pub feastol: f64,

    /// Multipliers of slack constraints below this value are reported as zero.
    pub mu_threshold: f64,
}

impl Default for IpmOpt {
    fn default() -> Self {
        Self {
            eps: 1e-8,
            max_it: 100,
            mumin: 1e-9,
            sigmamax: 0.5,
            etamax: 0.25,
            alphamax: 0.995,
            alphamin: 1e-6,
            beta: 0.75,
            tau: 0.01,
            cost_mult: 1.0,
            feastol: 1e-6,
            mu_threshold: 1e-5,
        }
    }
}

#[derive(Debug, Clone, Default, Builder)]
#[builder(default)]
pub struct UcOpt {
    /// Seed for breaking ties between equally uneconomic generators.
    /// Seeded from entropy if `None`.
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct Options {
    pub pf: PfOpt,
    pub opf: IpmOpt,
    pub uc: UcOpt,
}

impl Options {
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("pf.tolerance", self.pf.tolerance),
            ("opf.eps", self.opf.eps),
            ("opf.mumin", self.opf.mumin),
            ("opf.alphamin", self.opf.alphamin),
            ("opf.cost_mult", self.opf.cost_mult),
        ];
        for (name, value) in positive {
            if !(value > 0.0) {
                return Err(PowerError::InvalidOption(format!(
                    "{} must be positive, got {}",
                    name, value
                )));
            }
        }
        let fractions = [
            ("opf.sigmamax", self.opf.sigmamax),
            ("opf.etamax", self.opf.etamax),
            ("opf.alphamax", self.opf.alphamax),
            ("opf.beta", self.opf.beta),
            ("opf.tau", self.opf.tau),
        ];
        for (name, value) in fractions {
            if !(value > 0.0 && value < 1.0) {
                return Err(PowerError::InvalidOption(format!(
                    "{} must lie in (0, 1), got {}",
                    name, value
                )));
            }
        }
        if self.pf.max_it() == 0 || self.opf.max_it == 0 {
            return Err(PowerError::InvalidOption(
                "iteration limits must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{format_err, Result};

    #[test]
    fn test_builders() -> Result<()> {
        let pf = PfOptBuilder::default()
            .algorithm(Alg::FDXB)
            .tolerance(1e-6)
            .build()?;
        if pf.max_it() != 30 || pf.enforce_q_limits != GenQLimits::OneAtATime {
            return Err(format_err!("unexpected defaults {:?}", pf));
        }

        let ipm = IpmOptBuilder::default().max_it(50).build()?;
        if ipm.max_it != 50 || ipm.eps != 1e-8 || ipm.alphamax != 0.995 {
            return Err(format_err!("unexpected defaults {:?}", ipm));
        }
        Ok(())
    }

    #[test]
    fn test_validate() -> Result<()> {
        let mut opt = Options::default();
        opt.validate().map_err(|err| format_err!("{}", err))?;

        opt.opf.beta = 1.5;
        match opt.validate() {
            Err(PowerError::InvalidOption(_)) => Ok(()),
            other => Err(format_err!("expected invalid option, got {:?}", other)),
        }
    }
}
