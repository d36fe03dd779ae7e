use crate::debug::format_f64_vec;
use crate::error::Result;
use crate::options::IpmOpt;
use crate::math::{dot, norm_inf};
use crate::traits::LinearSolver;
use sparsetools::coo::Coo;
use sparsetools::csr::CSR;

/// Constraint values and Jacobians at a point. Jacobian rows index
/// constraints and columns index variables.
pub struct Constraints {
    pub h: Vec<f64>,
    pub g: Vec<f64>,
    pub dh: Coo<usize, f64>,
    pub dg: Coo<usize, f64>,
}

/// Smooth nonlinear program
///
/// ```txt
///     min f(x)  subject to  h(x) = 0,  g(x) <= 0
/// ```
pub trait NonlinearProgram {
    /// Number of variables.
    fn nx(&self) -> usize;

    /// Objective value and gradient.
    fn objective(&self, x: &[f64]) -> (f64, Vec<f64>);

    fn constraints(&self, x: &[f64]) -> Constraints;

    /// Hessian of the Lagrangian `cost_mult * f(x) + lam' h(x) + mu' g(x)`,
    /// with both triangles stored.
    fn hessian(&self, x: &[f64], lam: &[f64], mu: &[f64], cost_mult: f64) -> Coo<usize, f64>;
}

/// Result of the primal-dual interior point method. The objective and
/// multipliers are in the units of the original problem.
#[derive(Debug, Clone)]
pub struct IpmSolution {
    pub x: Vec<f64>,
    pub f: f64,
    pub converged: bool,
    pub iterations: usize,

    /// Multipliers of the equality constraints.
    pub lam: Vec<f64>,

    /// Multipliers of the inequality constraints.
    pub mu: Vec<f64>,

    /// Inequality constraint values at `x`.
    pub g: Vec<f64>,

    pub feascond: f64,
    pub gradcond: f64,
    pub compcond: f64,
}

struct Point {
    x: Vec<f64>,
    z: Vec<f64>,
    lam: Vec<f64>,
    mu: Vec<f64>,
    f: f64,
    c: Constraints,
    lx: Vec<f64>,
}

impl Point {
    fn evaluate(
        nlp: &dyn NonlinearProgram,
        x: Vec<f64>,
        z: Vec<f64>,
        lam: Vec<f64>,
        mu: Vec<f64>,
        cost_mult: f64,
    ) -> Self {
        let (f, df) = nlp.objective(&x);
        let c = nlp.constraints(&x);

        // Lx = cost_mult * df + dh' lam + dg' mu
        let dh_lam = &c.dh.t().to_csr() * &lam;
        let dg_mu = &c.dg.t().to_csr() * &mu;
        let lx = (0..x.len())
            .map(|j| cost_mult * df[j] + dh_lam[j] + dg_mu[j])
            .collect();

        Self {
            f: f * cost_mult,
            x,
            z,
            lam,
            mu,
            c,
            lx,
        }
    }

    /// Squared norm of the perturbed KKT residual
    /// `[Lx; h; g + z; z .* mu - gamma]`.
    fn residual_sq(&self, gamma: f64) -> f64 {
        let sq = |v: &[f64]| dot(v, v);
        let gz: f64 = self.c.g.iter().zip(&self.z).map(|(g, z)| (g + z).powi(2)).sum();
        let zmu: f64 = self
            .z
            .iter()
            .zip(&self.mu)
            .map(|(z, mu)| (z * mu - gamma).powi(2))
            .sum();
        sq(&self.lx) + sq(&self.c.h) + gz + zmu
    }

    fn conditions(&self) -> (f64, f64, f64) {
        let niq = self.z.len();
        let max_g = self.c.g.iter().fold(f64::NEG_INFINITY, |m, &g| m.max(g));
        let norm_x = norm_inf(&self.x);

        let feascond = norm_inf(&self.c.h).max(max_g) / (1.0 + norm_x.max(norm_inf(&self.z)));
        let gradcond = norm_inf(&self.lx) / (1.0 + norm_inf(&self.lam).max(norm_inf(&self.mu)));
        let compcond = if niq == 0 {
            0.0
        } else {
            dot(&self.z, &self.mu) / niq as f64 / (1.0 + norm_x)
        };
        (feascond, gradcond, compcond)
    }
}

/// Solves a nonlinear program with a primal-dual interior point method.
///
/// Inequalities are turned into equalities with slacks `z > 0` and
/// multipliers `mu > 0`. Each iteration takes a Newton step on the
/// perturbed KKT conditions, with the barrier parameter set from the
/// centering parameter `sigma <= sigmamax` and the average
/// complementarity, and backtracks on the squared KKT residual until
/// it decreases by at least `2 tau eta alpha`.
pub fn pdipm(
    nlp: &dyn NonlinearProgram,
    x0: &[f64],
    opt: &IpmOpt,
    lin_solver: &dyn LinearSolver,
) -> Result<IpmSolution> {
    let nx = nlp.nx();
    let cm = opt.cost_mult;
    let z0 = 1.0;

    let c0 = nlp.constraints(x0);
    let (neq, niq) = (c0.h.len(), c0.g.len());
    let nv = (nx + neq + 2 * niq) as f64;

    let z: Vec<f64> = c0.g.iter().map(|&g| if g < -z0 { -g } else { z0 }).collect();
    let mu = vec![z0; niq];
    let lam = vec![0.0; neq];
    let mut pt = Point::evaluate(nlp, x0.to_vec(), z, lam, mu, cm);

    let mut converged = false;
    let mut i = 0;
    let (mut feascond, mut gradcond, mut compcond);

    log::debug!(" it    objective   step size   feascond     gradcond     compcond");
    loop {
        (feascond, gradcond, compcond) = pt.conditions();
        log::debug!(
            "{:>3}  {:>12.6e}  {:>12.4e} {:>12.4e} {:>12.4e}",
            i,
            pt.f / cm,
            feascond,
            gradcond,
            compcond
        );
        if feascond < opt.eps && gradcond < opt.eps && compcond < opt.eps {
            converged = true;
            log::info!("Converged in {} iterations.", i);
            break;
        }
        if i >= opt.max_it {
            log::info!("Did not converge in {} iterations.", i);
            break;
        }
        i += 1;

        // centering parameter, forcing number and barrier parameter
        let rnorm = pt.residual_sq(0.0).sqrt() / nv;
        let eta = opt.etamax.min(rnorm);
        let sigma = opt.sigmamax.min(rnorm.sqrt());
        let gamma = if niq > 0 {
            opt.mumin.max(sigma * dot(&pt.z, &pt.mu) / niq as f64)
        } else {
            0.0
        };

        let (dx, dlam, dz, dmu) = newton_step(nlp, &pt, gamma, cm, lin_solver)?;

        // fraction to the boundary
        let mut alpha = 1.0f64;
        for k in 0..niq {
            if dz[k] < 0.0 {
                alpha = alpha.min(-pt.z[k] / dz[k]);
            }
            if dmu[k] < 0.0 {
                alpha = alpha.min(-pt.mu[k] / dmu[k]);
            }
        }
        alpha *= opt.alphamax;

        // backtracking line search on the merit function
        let psi0 = pt.residual_sq(gamma);
        let step = |v: &[f64], dv: &[f64], a: f64| -> Vec<f64> {
            v.iter().zip(dv).map(|(v, dv)| v + a * dv).collect()
        };
        let accepted = loop {
            let trial = Point::evaluate(
                nlp,
                step(&pt.x, &dx, alpha),
                step(&pt.z, &dz, alpha),
                step(&pt.lam, &dlam, alpha),
                step(&pt.mu, &dmu, alpha),
                cm,
            );
            let psi = trial.residual_sq(gamma);
            if psi.is_finite() && psi <= psi0 * (1.0 - 2.0 * opt.tau * eta * alpha) {
                break Some(trial);
            }
            alpha *= opt.beta;
            if alpha < opt.alphamin {
                break None;
            }
        };
        match accepted {
            Some(trial) => pt = trial,
            None => {
                log::info!("Numerically failed: step size below {:e}.", opt.alphamin);
                break;
            }
        }
    }

    log::debug!("x = {}", format_f64_vec(&pt.x));

    // zero out multipliers on non-binding constraints
    let mut mu = pt.mu.clone();
    for (mu_k, &g_k) in mu.iter_mut().zip(&pt.c.g) {
        if g_k < -opt.feastol && *mu_k < opt.mu_threshold {
            *mu_k = 0.0;
        }
    }

    Ok(IpmSolution {
        f: pt.f / cm,
        converged,
        iterations: i,
        lam: pt.lam.iter().map(|l| l / cm).collect(),
        mu: mu.iter().map(|m| m / cm).collect(),
        g: pt.c.g,
        x: pt.x,
        feascond,
        gradcond,
        compcond,
    })
}

/// Solves the reduced primal-dual Newton system
///
/// ```txt
///     | M   dh' | | dx   |   | -N |
///     | dh   0  | | dlam | = | -h |
///
///     M = Lxx + dg' diag(mu ./ z) dg
///     N = Lx + dg' ((mu .* g + gamma) ./ z)
/// ```
///
/// and recovers the slack and multiplier steps.
fn newton_step(
    nlp: &dyn NonlinearProgram,
    pt: &Point,
    gamma: f64,
    cost_mult: f64,
    lin_solver: &dyn LinearSolver,
) -> Result<(Vec<f64>, Vec<f64>, Vec<f64>, Vec<f64>)> {
    let nx = pt.x.len();
    let neq = pt.lam.len();
    let niq = pt.z.len();
    let c = &pt.c;

    let dg = c.dg.to_csr();
    let dg_t = dg.t().to_csr();
    let d_mat = CSR::with_diagonal((0..niq).map(|k| pt.mu[k] / pt.z[k]).collect());
    let w: Vec<f64> = (0..niq)
        .map(|k| (pt.mu[k] * c.g[k] + gamma) / pt.z[k])
        .collect();

    let dg_d_dg = dg_t.mat_mat(&d_mat.mat_mat(&dg)?)?.to_coo();
    let mut m_mat = nlp.hessian(&pt.x, &pt.lam, &pt.mu, cost_mult);
    m_mat.extend(dg_d_dg.rowidx(), dg_d_dg.colidx(), dg_d_dg.values());

    let kkt = Coo::compose([[&m_mat, &c.dh.t()], [&c.dh, &Coo::with_size(neq, neq)]])?;

    let n_vec = dg_t.mat_vec(&w)?;
    let mut sol: Vec<f64> = (0..nx)
        .map(|j| -(pt.lx[j] + n_vec[j]))
        .chain(c.h.iter().map(|h| -h))
        .collect();
    lin_solver.solve(&kkt.to_csc(), &mut sol)?;

    let dlam = sol.split_off(nx);
    let dx = sol;

    let dg_dx = dg.mat_vec(&dx)?;
    let dz: Vec<f64> = (0..niq).map(|k| -c.g[k] - pt.z[k] - dg_dx[k]).collect();
    let dmu: Vec<f64> = (0..niq)
        .map(|k| -pt.mu[k] + (gamma - pt.mu[k] * dz[k]) / pt.z[k])
        .collect();

    Ok((dx, dlam, dz, dmu))
}
