use crate::dc::make_b_dc;
use crate::error::Result;
use crate::ipm::{Constraints, IpmSolution, NonlinearProgram};
use crate::math::positions;
use crate::network::Network;
use crate::opf::{Layout, Limit, OpfProblem};
use sparsetools::coo::Coo;
use sparsetools::csr::CSR;
use std::f64::consts::PI;

/// DC optimal power flow. Bus power balance is linear in the voltage
/// angles:
///
/// ```txt
///     Bbus * Va + Pbusinj + (Gs + Pd) / baseMVA - Cg * Pg = 0
/// ```
///
/// and branch flows `Bf * Va + Pfinj` are limited in both directions.
pub(crate) struct DcOpf<'a> {
    layout: &'a Layout,
    b_bus: CSR<usize, f64>,
    b_f: CSR<usize, f64>,
    pfinj: Vec<f64>,

    /// Injection-independent part of the bus balance (p.u.).
    p_fixed: Vec<f64>,

    va0: Vec<f64>,
    gen_bus: Vec<usize>,
    active: Vec<usize>,
    fixed: Vec<usize>,
    limits: Vec<Limit>,

    /// Rated branches and their ratings (p.u.).
    flows: Vec<(usize, f64)>,
}

impl<'a> DcOpf<'a> {
    pub fn new(net: &Network, layout: &'a Layout) -> Result<Self> {
        let base_mva = net.base_mva;
        let (b_bus, b_f, pbusinj, pfinj) = make_b_dc(&net.buses, &net.branches)?;

        let mut p_fixed: Vec<f64> = net
            .buses
            .iter()
            .zip(&pbusinj)
            .map(|(b, inj)| inj + b.g_shunt / base_mva)
            .collect();
        for l in net.loads.iter().filter(|l| l.online) {
            p_fixed[l.bus] += l.p / base_mva;
        }

        let flows = net
            .branches
            .iter()
            .enumerate()
            .filter(|(_, br)| br.online && br.s_max > 0.0)
            .map(|(l, br)| (l, br.s_max / base_mva))
            .collect();

        Ok(Self {
            layout,
            b_bus,
            b_f,
            pfinj,
            p_fixed,
            va0: net.buses.iter().map(|b| b.v_phase * PI / 180.0).collect(),
            gen_bus: layout.gens.iter().map(|&k| net.generators[k].bus).collect(),
            active: layout.active_buses(),
            fixed: layout.fixed_angles(),
            limits: layout.limits(net),
            flows,
        })
    }

    fn branch_flows(&self, x: &[f64]) -> Vec<f64> {
        let pf = &self.b_f * x;
        pf.iter().zip(&self.pfinj).map(|(pf, inj)| pf + inj).collect()
    }
}

impl<'a> NonlinearProgram for DcOpf<'a> {
    fn nx(&self) -> usize {
        self.layout.nx()
    }

    fn objective(&self, x: &[f64]) -> (f64, Vec<f64>) {
        self.layout.cost(x)
    }

    fn constraints(&self, x: &[f64]) -> Constraints {
        let lay = self.layout;
        let (nx, nb) = (lay.nx(), lay.nb);
        let na = self.active.len();

        // power balance
        let neq = na + self.fixed.len();
        let mut h = vec![0.0; neq];
        let mut dh = Coo::with_size(neq, nx);

        let pos = positions(nb, &self.active);
        let p_calc = &self.b_bus * x;
        for (r, &i) in self.active.iter().enumerate() {
            h[r] = p_calc[i] + self.p_fixed[i];
        }
        let b_bus = self.b_bus.to_coo();
        for (&i, &j, &v) in b_bus.iter() {
            if let Some(r) = pos[i] {
                dh.push(r, lay.va(j), v);
            }
        }
        for (k, &bus) in self.gen_bus.iter().enumerate() {
            if let Some(r) = pos[bus] {
                h[r] -= x[lay.pg(k)];
                dh.push(r, lay.pg(k), -1.0);
            }
        }

        // reference and isolated bus angles
        for (n, &i) in self.fixed.iter().enumerate() {
            h[na + n] = x[lay.va(i)] - self.va0[i];
            dh.push(na + n, lay.va(i), 1.0);
        }

        // limits, then flow limits in both directions
        let nlim = self.limits.len();
        let niq = nlim + 2 * self.flows.len();
        let mut g = vec![0.0; niq];
        let mut dg = Coo::with_size(niq, nx);
        lay.eval_limits(&self.limits, x, 0, &mut g, &mut dg);

        let pf = self.branch_flows(x);
        let flow_pos = positions(
            pf.len(),
            &self.flows.iter().map(|&(l, _)| l).collect::<Vec<usize>>(),
        );
        for (n, &(l, rate)) in self.flows.iter().enumerate() {
            g[nlim + 2 * n] = pf[l] - rate;
            g[nlim + 2 * n + 1] = -pf[l] - rate;
        }
        let b_f = self.b_f.to_coo();
        for (&l, &j, &v) in b_f.iter() {
            if let Some(n) = flow_pos[l] {
                dg.push(nlim + 2 * n, lay.va(j), v);
                dg.push(nlim + 2 * n + 1, lay.va(j), -v);
            }
        }

        Constraints { h, g, dh, dg }
    }

    fn hessian(&self, x: &[f64], _lam: &[f64], _mu: &[f64], cost_mult: f64) -> Coo<usize, f64> {
        let mut hess = Coo::with_size(self.nx(), self.nx());
        self.layout.add_cost_hessian(x, cost_mult, &mut hess);
        hess
    }
}

impl<'a> OpfProblem for DcOpf<'a> {
    fn update(&self, net: &mut Network, s: &IpmSolution) {
        let lay = self.layout;
        let base_mva = lay.base_mva;

        for (r, &i) in self.active.iter().enumerate() {
            let b = &mut net.buses[i];
            b.v_amplitude = 1.0;
            b.v_phase = s.x[lay.va(i)] * 180.0 / PI;
            b.p_lambda = s.lam[r] / base_mva;
        }
        lay.update_limits(net, &self.limits, s);

        let pf = self.branch_flows(&s.x);
        for (l, br) in net.branches.iter_mut().enumerate() {
            if br.online {
                br.p_source = pf[l] * base_mva;
                br.p_target = -br.p_source;
            }
        }
        let nlim = self.limits.len();
        for (n, &(l, _)) in self.flows.iter().enumerate() {
            let br = &mut net.branches[l];
            br.mu_s_source = s.mu[nlim + 2 * n] / base_mva;
            br.mu_s_target = s.mu[nlim + 2 * n + 1] / base_mva;
        }
    }
}
