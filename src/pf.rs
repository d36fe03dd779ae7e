use crate::bus_types::bus_types;
use crate::dc::{dc_pf, make_b_dc};
use crate::error::Result;
use crate::fd;
use crate::network::Network;
use crate::newton::{newtonpf, LogProgress};
use crate::options::{Alg, Formulation, GenQLimits, Options};
use crate::sbus::make_sbus;
use crate::math::norm_inf;
use crate::traits::LinearSolver;
use crate::ybus::make_ybus;
use num_complex::Complex64;
use sparsetools::csr::CSR;
use std::f64::consts::PI;
use std::time::{Duration, Instant};

/// Outcome of a power flow solve.
#[derive(Debug, Clone)]
pub struct PfSolution {
    pub converged: bool,

    /// Total iterations, accumulated over reactive limit re-runs.
    pub iterations: usize,

    /// Final power mismatch infinity norm (p.u.).
    pub residual: f64,

    /// Number of PV buses converted to PQ at a reactive power limit.
    pub q_limited: usize,

    pub elapsed: Duration,
}

/// Runs a power flow on `net`.
///
/// On success the bus voltages, generator set-points of the slack and
/// voltage controlling units and the branch flows are updated. When the
/// solution does not converge, voltages are left untouched and all result
/// fields hold zero.
pub fn solve_power_flow(
    net: &mut Network,
    formulation: Formulation,
    opt: &Options,
    lin_solver: &dyn LinearSolver,
) -> Result<PfSolution> {
    net.clear_results();

    opt.validate()?;
    net.validate()?;
    let refbus = net.slack_bus()?;
    let isolated = net.isolated_buses(refbus)?;

    let t0 = Instant::now();
    let mut solution = match formulation {
        Formulation::DC => {
            log::info!("-- DC Power Flow");
            run_dc(net, &isolated, lin_solver)?
        }
        Formulation::AC => {
            log::info!("-- AC Power Flow ({:?})", opt.pf.algorithm);
            run_ac(net, &isolated, opt, lin_solver)?
        }
    };
    solution.elapsed = t0.elapsed();

    Ok(solution)
}

fn run_dc(net: &mut Network, isolated: &[bool], lin_solver: &dyn LinearSolver) -> Result<PfSolution> {
    let base_mva = net.base_mva;
    let nb = net.buses.len();
    let (refbus, pv, pq) = bus_types(net, isolated, &vec![false; nb])?;
    let pvpq = [pv, pq].concat();

    // initial state
    let va0: Vec<f64> = net.buses.iter().map(|b| b.v_phase * PI / 180.0).collect();

    // build B matrices and phase shift injections
    let (b_bus, b_f, pbusinj, pfinj) = make_b_dc(&net.buses, &net.branches)?;

    // compute complex bus power injections (generation - load)
    // adjusted for phase shifters and real shunts
    let s_bus = make_sbus(net, None);
    let p_bus: Vec<f64> = (0..nb)
        .map(|i| s_bus[i].re - pbusinj[i] - net.buses[i].g_shunt / base_mva)
        .collect();

    let (va, success) = dc_pf(&b_bus, &p_bus, &va0, refbus, &pvpq, lin_solver)?;

    let p_calc = &b_bus * &va;
    let residual = norm_inf(
        &pvpq
            .iter()
            .map(|&i| p_calc[i] - p_bus[i])
            .collect::<Vec<f64>>(),
    );

    if success {
        // update data matrices with solution
        let pf = &b_f * &va;
        for (l, br) in net.branches.iter_mut().enumerate() {
            if br.online {
                br.p_source = (pf[l] + pfinj[l]) * base_mva;
                br.p_target = -br.p_source;
            }
        }
        for (i, b) in net.buses.iter_mut().enumerate() {
            if !isolated[i] {
                b.v_amplitude = 1.0;
                b.v_phase = va[i] * 180.0 / PI;
            }
        }

        // update Pg for slack generator (1st gen at ref bus)
        // (note: other gens at ref bus are accounted for in Pbus)
        //      Pg = Pinj + Pload + Gs
        //      newPg = oldPg + newPinj - oldPinj
        if let Some(g) = net
            .generators
            .iter_mut()
            .find(|g| g.online && g.bus == refbus)
        {
            g.p += (p_calc[refbus] - p_bus[refbus]) * base_mva;
        }
        zero_offline(net);
    } else {
        log::info!("DC power flow failed: voltage angles out of range");
    }

    Ok(PfSolution {
        converged: success,
        iterations: 1,
        residual,
        q_limited: 0,
        elapsed: Duration::default(),
    })
}

fn run_ac(
    net: &mut Network,
    isolated: &[bool],
    opt: &Options,
    lin_solver: &dyn LinearSolver,
) -> Result<PfSolution> {
    let base_mva = net.base_mva;
    let (nb, ng) = (net.buses.len(), net.generators.len());
    let alg = opt.pf.algorithm;
    let qlim = opt.pf.enforce_q_limits != GenQLimits::IgnoreLimits;

    // build admittance matrices
    let (y_bus, y_f, y_t) = make_ybus(base_mva, &net.buses, &net.branches)?;
    let fd_mats = match alg {
        Alg::NR => None,
        Alg::FDXB | Alg::FDBX => Some(fd::make_b(base_mva, &net.buses, &net.branches, alg)?),
    };

    // initial state
    let mut v: Vec<Complex64> = net
        .buses
        .iter()
        .map(|b| Complex64::from_polar(b.v_amplitude, b.v_phase * PI / 180.0))
        .collect();
    for g in net.generators.iter().filter(|g| g.online) {
        if !isolated[g.bus] {
            v[g.bus] = Complex64::from_polar(g.v_amplitude, v[g.bus].arg());
        }
    }

    let mut pq_forced = vec![false; nb];
    let mut fixed_q: Vec<Option<f64>> = vec![None; ng]; // Qg of gens at Q limits
    let mut q_limited = 0;
    let mut its = 0; // total iterations
    let progress = LogProgress {};

    loop {
        let (refbus, pv, pq) = bus_types(net, isolated, &pq_forced)?;

        let sg: Vec<Complex64> = net
            .generators
            .iter()
            .zip(&fixed_q)
            .map(|(g, q)| Complex64::new(g.p, q.unwrap_or(g.q)) / base_mva)
            .collect();
        let s_bus = make_sbus(net, Some(&sg));

        let (v_new, converged, iterations, norm_f) = match &fd_mats {
            None => newtonpf(
                &y_bus,
                &s_bus,
                &v,
                &pv,
                &pq,
                lin_solver,
                &opt.pf,
                Some(&progress),
            )?,
            Some((b_p, b_pp)) => fd::fdpf(
                &y_bus,
                &s_bus,
                &v,
                b_p,
                b_pp,
                &pv,
                &pq,
                lin_solver,
                &opt.pf,
                Some(&progress),
            )?,
        };
        its += iterations;

        if !converged {
            return Ok(PfSolution {
                converged: false,
                iterations: its,
                residual: norm_f,
                q_limited,
                elapsed: Duration::default(),
            });
        }
        v = v_new;

        let qg = reactive_dispatch(net, &y_bus, &v, refbus, &pv, &fixed_q);

        // find gens with violated Q constraints
        let mut violations = Vec::new();
        if qlim {
            let tol = opt.pf.tolerance * base_mva;
            let mut is_pv = vec![false; nb];
            pv.iter().for_each(|&i| is_pv[i] = true);

            for (k, g) in net.generators.iter().enumerate() {
                if !g.online || !is_pv[g.bus] {
                    continue;
                }
                if qg[k] > g.q_max + tol {
                    violations.push((k, qg[k] - g.q_max, g.q_max));
                } else if qg[k] < g.q_min - tol {
                    violations.push((k, g.q_min - qg[k], g.q_min));
                }
            }
            if opt.pf.enforce_q_limits == GenQLimits::OneAtATime {
                let worst = violations
                    .iter()
                    .copied()
                    .fold(None, |worst: Option<(usize, f64, f64)>, c| match worst {
                        Some(w) if w.1 >= c.1 => Some(w),
                        _ => Some(c),
                    });
                violations = worst.into_iter().collect();
            }
        }

        if violations.is_empty() {
            pfsoln(net, &y_bus, &y_f, &y_t, &v, isolated, refbus, &qg);
            return Ok(PfSolution {
                converged: true,
                iterations: its,
                residual: norm_f,
                q_limited,
                elapsed: Duration::default(),
            });
        }

        // fix Q of violating gens at their limit and convert their buses to PQ
        for (k, excess, limit) in violations {
            let bus = net.generators[k].bus;
            log::warn!(
                "gen {} at bus {} exceeds its reactive limit by {:.4} MVAr, converting to PQ",
                k,
                net.buses[bus].id,
                excess
            );
            pq_forced[bus] = true;
            fixed_q[k] = Some(limit);
            for (j, g) in net.generators_at(bus) {
                if g.online && fixed_q[j].is_none() {
                    fixed_q[j] = Some(qg[j]);
                }
            }
            q_limited += 1;
        }
    }
}

/// Reactive output of every generator (MVAr). Units at the slack and PV
/// buses share the bus injection in proportion to their reactive range.
/// Units with a fixed output keep it.
fn reactive_dispatch(
    net: &Network,
    y_bus: &CSR<usize, Complex64>,
    v: &[Complex64],
    refbus: usize,
    pv: &[usize],
    fixed_q: &[Option<f64>],
) -> Vec<f64> {
    let base_mva = net.base_mva;
    let i_bus = y_bus * v;

    let mut qg: Vec<f64> = net
        .generators
        .iter()
        .zip(fixed_q)
        .map(|(g, q)| if g.online { q.unwrap_or(g.q) } else { 0.0 })
        .collect();

    for &i in [refbus].iter().chain(pv) {
        let gens: Vec<usize> = net
            .generators_at(i)
            .filter(|(k, g)| g.online && fixed_q[*k].is_none())
            .map(|(k, _)| k)
            .collect();
        if gens.is_empty() {
            continue;
        }
        let qd: f64 = net.loads_at(i).filter(|(_, l)| l.online).map(|(_, l)| l.q).sum();
        let qg_tot = (v[i] * i_bus[i].conj()).im * base_mva + qd; // inj Q + local Qd

        let limits: Vec<(f64, f64)> = gens
            .iter()
            .map(|&k| (net.generators[k].q_min, net.generators[k].q_max))
            .collect();
        for (&k, q) in gens.iter().zip(split_reactive(qg_tot, &limits)) {
            qg[k] = q;
        }
    }
    qg
}

/// Divides the total reactive output at a bus between its generators in
/// proportion to their reactive range. Infinite limits are replaced with
/// a proxy of the summed magnitudes of the finite data.
fn split_reactive(qg_tot: f64, limits: &[(f64, f64)]) -> Vec<f64> {
    let n = limits.len();
    if n == 1 {
        return vec![qg_tot];
    }
    let m: f64 = limits
        .iter()
        .map(|&(qmin, qmax)| {
            let mut mg = (qg_tot / n as f64).abs();
            if qmax.is_finite() {
                mg += qmax.abs();
            }
            if qmin.is_finite() {
                mg += qmin.abs();
            }
            mg
        })
        .sum();
    let proxy = |q: f64| {
        if q.is_infinite() {
            m.copysign(q)
        } else {
            q
        }
    };
    let qmin: Vec<f64> = limits.iter().map(|&(q, _)| proxy(q)).collect();
    let qmax: Vec<f64> = limits.iter().map(|&(_, q)| proxy(q)).collect();
    let qg_min: f64 = qmin.iter().sum(); // Minimum total Qg at the bus.
    let qg_max: f64 = qmax.iter().sum(); // Maximum total Qg at the bus.

    if (qg_max - qg_min).abs() > 1e-13 {
        let q = (qg_tot - qg_min) / (qg_max - qg_min);
        (0..n).map(|k| qmin[k] + q * (qmax[k] - qmin[k])).collect()
    } else {
        // Zero Qg range at bus. Qg set such that all generators
        // at the bus violate their limits by the same amount.
        let mis = (qg_tot - qg_min) / n as f64;
        qmin.iter().map(|q| q + mis).collect()
    }
}

/// Updates bus, gen and branch data with the AC power flow solution.
fn pfsoln(
    net: &mut Network,
    y_bus: &CSR<usize, Complex64>,
    y_f: &CSR<usize, Complex64>,
    y_t: &CSR<usize, Complex64>,
    v: &[Complex64],
    isolated: &[bool],
    refbus: usize,
    qg: &[f64],
) {
    let base_mva = net.base_mva;

    for (i, b) in net.buses.iter_mut().enumerate() {
        if !isolated[i] {
            b.v_amplitude = v[i].norm();
            b.v_phase = v[i].arg() * 180.0 / PI;
        }
    }
    for (g, &q) in net.generators.iter_mut().zip(qg) {
        if g.online {
            g.q = q;
        }
    }

    // update Pg for slack gen(s)
    let i_bus = y_bus * v;
    let s_ref = v[refbus] * i_bus[refbus].conj();
    let pd: f64 = net
        .loads_at(refbus)
        .filter(|(_, l)| l.online)
        .map(|(_, l)| l.p)
        .sum();
    let ref_gens: Vec<usize> = net
        .generators_at(refbus)
        .filter(|(_, g)| g.online)
        .map(|(k, _)| k)
        .collect();
    if let Some((&first, others)) = ref_gens.split_first() {
        let others_p: f64 = others.iter().map(|&k| net.generators[k].p).sum();
        net.generators[first].p = s_ref.re * base_mva + pd - others_p; // inj P + local Pd
    }

    // complex power at "from" and "to" bus
    let i_f = y_f * v;
    let i_t = y_t * v;
    for (l, br) in net.branches.iter_mut().enumerate() {
        if !br.online {
            continue;
        }
        let s_f = v[br.source] * i_f[l].conj() * base_mva;
        let s_t = v[br.target] * i_t[l].conj() * base_mva;
        br.p_source = s_f.re;
        br.q_source = s_f.im;
        br.p_target = s_t.re;
        br.q_target = s_t.im;
    }

    zero_offline(net);
}

/// Zero out result fields of out-of-service gens.
pub(crate) fn zero_offline(net: &mut Network) {
    for g in net.generators.iter_mut().filter(|g| !g.online) {
        g.p = 0.0;
        g.q = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{format_err, Result};

    #[test]
    fn test_split_reactive() -> Result<()> {
        let q = split_reactive(30.0, &[(0.0, 10.0), (0.0, 50.0)]);
        if (q[0] - 5.0).abs() > 1e-12 || (q[1] - 25.0).abs() > 1e-12 {
            return Err(format_err!("split {:?}", q));
        }
        let q = split_reactive(12.0, &[(f64::NEG_INFINITY, f64::INFINITY), (-1.0, 1.0)]);
        if (q.iter().sum::<f64>() - 12.0).abs() > 1e-12 {
            return Err(format_err!("split {:?} does not add up", q));
        }
        let q = split_reactive(7.0, &[(2.0, 2.0), (3.0, 3.0)]);
        if (q[0] - 3.0).abs() > 1e-12 || (q[1] - 4.0).abs() > 1e-12 {
            return Err(format_err!("split {:?}", q));
        }
        Ok(())
    }
}
