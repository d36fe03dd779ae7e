use crate::debug::format_polar_vec;
use crate::error::Result;
use crate::options::PfOpt;
use crate::sbus::d_sbus_d_v;
use crate::math::norm_inf;
use crate::traits::LinearSolver;
use num_complex::Complex64;
use sparsetools::coo::Coo;
use sparsetools::csr::{CCSR, CSR};

pub trait ProgressMonitor {
    fn update(&self, i: usize, norm_f: f64);
}

/// Logs the mismatch norm of each iteration at debug level.
pub struct LogProgress {}

impl ProgressMonitor for LogProgress {
    fn update(&self, i: usize, norm_f: f64) {
        log::debug!("{:>3} {:>12.4e}", i, norm_f);
    }
}

/// Power balance mismatch `[P(pv;pq); Q(pq)]` at voltage `v`.
pub(crate) fn mismatch(
    y_bus: &CSR<usize, Complex64>,
    s_bus: &[Complex64],
    v: &[Complex64],
    pv_pq: &[usize],
    pq: &[usize],
) -> Vec<f64> {
    let i_bus = y_bus * v;
    let mis: Vec<Complex64> = v
        .iter()
        .zip(i_bus)
        .zip(s_bus)
        .map(|((v, i), s)| v * i.conj() - s)
        .collect();
    pv_pq
        .iter()
        .map(|&i| mis[i].re)
        .chain(pq.iter().map(|&i| mis[i].im))
        .collect()
}

/// Solves power flow using full Newton's method (power/polar).
///
/// Returns the final voltage, a convergence flag, the number of
/// iterations and the final mismatch norm.
pub(crate) fn newtonpf(
    y_bus: &CSR<usize, Complex64>,
    s_bus: &[Complex64],
    v0: &[Complex64],
    pv: &[usize],
    pq: &[usize],
    lin_solver: &dyn LinearSolver,
    pfopt: &PfOpt,
    progress: Option<&dyn ProgressMonitor>,
) -> Result<(Vec<Complex64>, bool, usize, f64)> {
    let pv_pq = [pv, pq].concat();

    let tol = pfopt.tolerance;
    let max_it = pfopt.max_it_nr;

    let mut converged = false;
    let mut i = 0;
    let mut v = v0.to_vec();
    let mut va: Vec<f64> = v.iter().map(|v| v.arg()).collect();
    let mut vm: Vec<f64> = v.iter().map(|v| v.norm()).collect();

    // set up indexing for updating V
    let npv = pv.len();
    let npq = pq.len();
    let (j1, j2) = (0, npv); // j1:j2 - V angle of pv buses
    let (j3, j4) = (j2, j2 + npq); // j3:j4 - V angle of pq buses
    let (j5, j6) = (j4, j4 + npq); // j5:j6 - V mag of pq buses

    // evaluate F(x0)
    let mut f = mismatch(y_bus, s_bus, &v, &pv_pq, pq);

    // check tolerance
    let mut norm_f = norm_inf(&f);
    if let Some(pm) = progress {
        pm.update(i, norm_f);
    }
    if norm_f < tol {
        converged = true;
        log::info!("Newton's method power flow converged with initial voltages.");
    }

    // do Newton iterations
    while !converged && i < max_it {
        i += 1;

        // evaluate Jacobian
        let (d_sbus_d_va, d_sbus_d_vm) = d_sbus_d_v(y_bus, &v)?;

        let j11 = d_sbus_d_va.select(Some(&pv_pq), Some(&pv_pq))?.real();
        let j12 = d_sbus_d_vm.select(Some(&pv_pq), Some(pq))?.real();
        let j21 = d_sbus_d_va.select(Some(pq), Some(&pv_pq))?.imag();
        let j22 = d_sbus_d_vm.select(Some(pq), Some(pq))?.imag();

        let jac = Coo::compose([
            [&j11.to_coo(), &j12.to_coo()],
            [&j21.to_coo(), &j22.to_coo()],
        ])?;

        // compute update step
        let mut dx: Vec<f64> = f.iter().map(|f_i| -f_i).collect();
        lin_solver.solve(&jac.to_csc(), &mut dx)?;

        // update voltage
        pv.iter().zip(j1..j2).for_each(|(&i, j)| va[i] += dx[j]);
        pq.iter().zip(j3..j4).for_each(|(&i, j)| va[i] += dx[j]);
        pq.iter().zip(j5..j6).for_each(|(&i, j)| vm[i] += dx[j]);

        // update Vm and Va again in case we wrapped around with a negative Vm
        v = vm
            .iter()
            .zip(&va)
            .map(|(&m, &a)| Complex64::from_polar(m, a))
            .collect();
        va = v.iter().map(|v| v.arg()).collect();
        vm = v.iter().map(|v| v.norm()).collect();

        // evalute F(x)
        f = mismatch(y_bus, s_bus, &v, &pv_pq, pq);

        // check for convergence
        norm_f = norm_inf(&f);
        if let Some(pm) = progress {
            pm.update(i, norm_f);
        }
        if norm_f < tol {
            converged = true;
            log::info!(
                "Newton's method power flow (power balance, polar) converged in {} iterations.",
                i
            );
        }
    }

    if !converged {
        log::info!(
            "Newton's method power flow (power balance, polar) did not converge in {} iterations.",
            i
        );
    }
    log::debug!("V = {}", format_polar_vec(&v));

    Ok((v, converged, i, norm_f))
}
