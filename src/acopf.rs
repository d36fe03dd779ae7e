use crate::error::Result;
use crate::ipm::{Constraints, IpmSolution, NonlinearProgram};
use crate::math::positions;
use crate::network::Network;
use crate::opf::{Layout, Limit, OpfProblem};
use crate::ybus::{branch_admittance, make_ybus, BranchAdmittance};
use num_complex::Complex64;
use sparsetools::coo::Coo;
use std::f64::consts::PI;

/// Real and reactive power of one admittance term `V_i conj(y V_j)` with
/// first and second derivatives over the local variables
/// `[Va_i, Va_j, Vm_i, Vm_j]`.
#[derive(Debug, Clone, Copy, Default)]
struct Term {
    p: f64,
    q: f64,
    dp: [f64; 4],
    dq: [f64; 4],
    d2p: [[f64; 4]; 4],
    d2q: [[f64; 4]; 4],
}

impl Term {
    /// Off-diagonal term between buses `i` and `j`.
    ///
    /// ```txt
    ///     P = Vi Vj (G cos(a) + B sin(a))
    ///     Q = Vi Vj (G sin(a) - B cos(a)),    a = Va_i - Va_j
    /// ```
    fn pair(y: Complex64, va_i: f64, va_j: f64, vm_i: f64, vm_j: f64) -> Self {
        let (g, b) = (y.re, y.im);
        let (sin, cos) = (va_i - va_j).sin_cos();
        let u = g * cos + b * sin;
        let w = g * sin - b * cos;
        let vv = vm_i * vm_j;

        Self {
            p: vv * u,
            q: vv * w,
            dp: [-vv * w, vv * w, vm_j * u, vm_i * u],
            dq: [vv * u, -vv * u, vm_j * w, vm_i * w],
            d2p: [
                [-vv * u, vv * u, -vm_j * w, -vm_i * w],
                [vv * u, -vv * u, vm_j * w, vm_i * w],
                [-vm_j * w, vm_j * w, 0.0, u],
                [-vm_i * w, vm_i * w, u, 0.0],
            ],
            d2q: [
                [-vv * w, vv * w, vm_j * u, vm_i * u],
                [vv * w, -vv * w, -vm_j * u, -vm_i * u],
                [vm_j * u, -vm_j * u, 0.0, w],
                [vm_i * u, -vm_i * u, w, 0.0],
            ],
        }
    }

    /// Diagonal term `Vi^2 conj(y)`, which only depends on `Vm_i`.
    fn diag(y: Complex64, vm_i: f64) -> Self {
        let mut t = Self {
            p: vm_i * vm_i * y.re,
            q: -vm_i * vm_i * y.im,
            ..Default::default()
        };
        t.dp[2] = 2.0 * vm_i * y.re;
        t.dq[2] = -2.0 * vm_i * y.im;
        t.d2p[2][2] = 2.0 * y.re;
        t.d2q[2][2] = -2.0 * y.im;
        t
    }

    fn add(&mut self, other: &Term) {
        self.p += other.p;
        self.q += other.q;
        for a in 0..4 {
            self.dp[a] += other.dp[a];
            self.dq[a] += other.dq[a];
            for b in 0..4 {
                self.d2p[a][b] += other.d2p[a][b];
                self.d2q[a][b] += other.d2q[a][b];
            }
        }
    }
}

/// AC optimal power flow in polar coordinates.
///
/// Equality constraints are the real and reactive power balance at every
/// connected bus, followed by the fixed angles of the reference and the
/// isolated buses and the fixed magnitudes of the isolated buses.
/// Inequality constraints are the variable bounds followed by the squared
/// apparent power limits at both ends of every rated branch.
pub(crate) struct AcOpf<'a> {
    layout: &'a Layout,

    /// Stored entries of the bus admittance matrix.
    y_bus: Coo<usize, Complex64>,

    /// Fixed demand per bus (p.u.).
    s_load: Vec<Complex64>,

    va0: Vec<f64>,
    vm0: Vec<f64>,
    gen_bus: Vec<usize>,
    active: Vec<usize>,
    fixed: Vec<usize>,
    isolated: Vec<usize>,
    limits: Vec<Limit>,

    /// Rated branches: index, end buses, admittances and rating (p.u.).
    flows: Vec<(usize, usize, usize, BranchAdmittance, f64)>,

    /// Admittances of every branch, for the flow write-back.
    branch_y: Vec<BranchAdmittance>,
}

impl<'a> AcOpf<'a> {
    pub fn new(net: &Network, layout: &'a Layout) -> Result<Self> {
        let base_mva = net.base_mva;
        let (y_bus, _, _) = make_ybus(base_mva, &net.buses, &net.branches)?;

        let mut s_load = vec![Complex64::default(); net.buses.len()];
        for l in net.loads.iter().filter(|l| l.online) {
            s_load[l.bus] += Complex64::new(l.p, l.q) / base_mva;
        }

        let branch_y = net
            .branches
            .iter()
            .enumerate()
            .map(|(l, br)| branch_admittance(l, br))
            .collect::<Result<Vec<BranchAdmittance>>>()?;
        let flows = net
            .branches
            .iter()
            .enumerate()
            .filter(|(_, br)| br.online && br.s_max > 0.0)
            .map(|(l, br)| (l, br.source, br.target, branch_y[l], br.s_max / base_mva))
            .collect();

        Ok(Self {
            layout,
            y_bus: y_bus.to_coo(),
            s_load,
            va0: net.buses.iter().map(|b| b.v_phase * PI / 180.0).collect(),
            vm0: net.buses.iter().map(|b| b.v_amplitude).collect(),
            gen_bus: layout.gens.iter().map(|&k| net.generators[k].bus).collect(),
            active: layout.active_buses(),
            fixed: layout.fixed_angles(),
            isolated: (0..net.buses.len()).filter(|&i| layout.isolated[i]).collect(),
            limits: layout.limits(net),
            flows,
            branch_y,
        })
    }

    fn local(&self, i: usize, j: usize) -> [usize; 4] {
        let lay = self.layout;
        [lay.va(i), lay.va(j), lay.vm(i), lay.vm(j)]
    }

    /// Admittance term of Ybus entry `(i, j)`.
    fn bus_term(&self, x: &[f64], i: usize, j: usize, y: Complex64) -> Term {
        let lay = self.layout;
        if i == j {
            Term::diag(y, x[lay.vm(i)])
        } else {
            Term::pair(y, x[lay.va(i)], x[lay.va(j)], x[lay.vm(i)], x[lay.vm(j)])
        }
    }

    /// Power flow into the branch at bus `i`, with `j` the far end.
    fn flow_term(&self, x: &[f64], i: usize, j: usize, y_ii: Complex64, y_ij: Complex64) -> Term {
        let lay = self.layout;
        let mut t = Term::diag(y_ii, x[lay.vm(i)]);
        t.add(&Term::pair(y_ij, x[lay.va(i)], x[lay.va(j)], x[lay.vm(i)], x[lay.vm(j)]));
        t
    }

    /// Both end terms of every rated branch, as `(bus, far bus, term)`.
    fn flow_terms(&self, x: &[f64]) -> Vec<(usize, usize, Term)> {
        let mut terms = Vec::with_capacity(2 * self.flows.len());
        for &(_, f, t, y, _) in &self.flows {
            terms.push((f, t, self.flow_term(x, f, t, y.y_ff, y.y_ft)));
            terms.push((t, f, self.flow_term(x, t, f, y.y_tt, y.y_tf)));
        }
        terms
    }

    fn n_balance(&self) -> usize {
        self.active.len()
    }
}

impl<'a> NonlinearProgram for AcOpf<'a> {
    fn nx(&self) -> usize {
        self.layout.nx()
    }

    fn objective(&self, x: &[f64]) -> (f64, Vec<f64>) {
        self.layout.cost(x)
    }

    fn constraints(&self, x: &[f64]) -> Constraints {
        let lay = self.layout;
        let (nx, nb) = (lay.nx(), lay.nb);
        let na = self.n_balance();
        let nfix = self.fixed.len();

        // P balance rows 0..na, Q balance rows na..2na
        let neq = 2 * na + nfix + self.isolated.len();
        let mut h = vec![0.0; neq];
        let mut dh = Coo::with_size(neq, nx);

        let pos = positions(nb, &self.active);
        for (r, &i) in self.active.iter().enumerate() {
            h[r] = self.s_load[i].re;
            h[na + r] = self.s_load[i].im;
        }
        for (&i, &j, &y) in self.y_bus.iter() {
            let Some(r) = pos[i] else { continue };
            let t = self.bus_term(x, i, j, y);
            h[r] += t.p;
            h[na + r] += t.q;
            for (a, &col) in self.local(i, j).iter().enumerate() {
                dh.push(r, col, t.dp[a]);
                dh.push(na + r, col, t.dq[a]);
            }
        }
        for (k, &bus) in self.gen_bus.iter().enumerate() {
            if let Some(r) = pos[bus] {
                h[r] -= x[lay.pg(k)];
                h[na + r] -= x[lay.qg(k)];
                dh.push(r, lay.pg(k), -1.0);
                dh.push(na + r, lay.qg(k), -1.0);
            }
        }

        // fixed angles and isolated bus magnitudes
        for (n, &i) in self.fixed.iter().enumerate() {
            h[2 * na + n] = x[lay.va(i)] - self.va0[i];
            dh.push(2 * na + n, lay.va(i), 1.0);
        }
        for (n, &i) in self.isolated.iter().enumerate() {
            let r = 2 * na + nfix + n;
            h[r] = x[lay.vm(i)] - self.vm0[i];
            dh.push(r, lay.vm(i), 1.0);
        }

        // bounds, then |S|^2 - Smax^2 <= 0 at each branch end
        let nlim = self.limits.len();
        let niq = nlim + 2 * self.flows.len();
        let mut g = vec![0.0; niq];
        let mut dg = Coo::with_size(niq, nx);
        lay.eval_limits(&self.limits, x, 0, &mut g, &mut dg);

        for (n, (i, j, t)) in self.flow_terms(x).into_iter().enumerate() {
            let rate = self.flows[n / 2].4;
            let r = nlim + n;
            g[r] = t.p * t.p + t.q * t.q - rate * rate;
            for (a, &col) in self.local(i, j).iter().enumerate() {
                dg.push(r, col, 2.0 * (t.p * t.dp[a] + t.q * t.dq[a]));
            }
        }

        Constraints { h, g, dh, dg }
    }

    fn hessian(&self, x: &[f64], lam: &[f64], mu: &[f64], cost_mult: f64) -> Coo<usize, f64> {
        let lay = self.layout;
        let nx = lay.nx();
        let na = self.n_balance();
        let mut hess = Coo::with_size(nx, nx);
        lay.add_cost_hessian(x, cost_mult, &mut hess);

        let pos = positions(lay.nb, &self.active);
        for (&i, &j, &y) in self.y_bus.iter() {
            let Some(r) = pos[i] else { continue };
            let (lam_p, lam_q) = (lam[r], lam[na + r]);
            if lam_p == 0.0 && lam_q == 0.0 {
                continue;
            }
            let t = self.bus_term(x, i, j, y);
            let cols = self.local(i, j);
            for a in 0..4 {
                for b in 0..4 {
                    let v = lam_p * t.d2p[a][b] + lam_q * t.d2q[a][b];
                    if v != 0.0 {
                        hess.push(cols[a], cols[b], v);
                    }
                }
            }
        }

        let nlim = self.limits.len();
        for (n, (i, j, t)) in self.flow_terms(x).into_iter().enumerate() {
            let m = mu[nlim + n];
            if m == 0.0 {
                continue;
            }
            // d2F = 2 (dP dP' + P d2P + dQ dQ' + Q d2Q)
            let cols = self.local(i, j);
            for a in 0..4 {
                for b in 0..4 {
                    let v = t.dp[a] * t.dp[b]
                        + t.p * t.d2p[a][b]
                        + t.dq[a] * t.dq[b]
                        + t.q * t.d2q[a][b];
                    if v != 0.0 {
                        hess.push(cols[a], cols[b], 2.0 * m * v);
                    }
                }
            }
        }
        hess
    }
}

impl<'a> OpfProblem for AcOpf<'a> {
    fn update(&self, net: &mut Network, s: &IpmSolution) {
        let lay = self.layout;
        let base_mva = lay.base_mva;
        let na = self.n_balance();
        let x = &s.x;

        for (r, &i) in self.active.iter().enumerate() {
            let b = &mut net.buses[i];
            b.v_amplitude = x[lay.vm(i)];
            b.v_phase = x[lay.va(i)] * 180.0 / PI;
            b.p_lambda = s.lam[r] / base_mva;
            b.q_lambda = s.lam[na + r] / base_mva;
        }
        lay.update_limits(net, &self.limits, s);

        let v: Vec<Complex64> = (0..lay.nb)
            .map(|i| Complex64::from_polar(x[lay.vm(i)], x[lay.va(i)]))
            .collect();
        for (br, y) in net.branches.iter_mut().zip(&self.branch_y) {
            if !br.online {
                continue;
            }
            let (vf, vt) = (v[br.source], v[br.target]);
            let s_f = vf * (y.y_ff * vf + y.y_ft * vt).conj() * base_mva;
            let s_t = vt * (y.y_tf * vf + y.y_tt * vt).conj() * base_mva;
            br.p_source = s_f.re;
            br.q_source = s_f.im;
            br.p_target = s_t.re;
            br.q_target = s_t.im;
        }

        // dF/dS = 2 mu S for the squared limit
        let nlim = self.limits.len();
        for (n, &(l, _, _, _, rate)) in self.flows.iter().enumerate() {
            let br = &mut net.branches[l];
            br.mu_s_source = 2.0 * s.mu[nlim + 2 * n] * rate / base_mva;
            br.mu_s_target = 2.0 * s.mu[nlim + 2 * n + 1] * rate / base_mva;
        }
    }
}
