use crate::error::Result;
use crate::network::{Branch, Bus};
use crate::newton::ProgressMonitor;
use crate::options::{Alg, PfOpt};
use crate::math::norm_inf;
use crate::traits::LinearSolver;
use crate::ybus::make_ybus;
use num_complex::Complex64;
use sparsetools::csr::{CCSR, CSR};

/// Builds the two matrices B prime and B double prime used in the fast
/// decoupled power flow.
pub(crate) fn make_b(
    base_mva: f64,
    bus: &[Bus],
    branch: &[Branch],
    alg: Alg,
) -> Result<(CSR<usize, f64>, CSR<usize, f64>)> {
    // Form Bp (B prime).
    let mut bus = bus.to_vec(); // modify a copy of bus
    for b in bus.iter_mut() {
        b.g_shunt = 0.0;
        b.b_shunt = 0.0; // zero out shunts at buses
    }

    let b_p = {
        let mut branch = branch.to_vec(); // modify a copy of branch
        for br in branch.iter_mut() {
            br.b = 0.0; // zero out line charging shunts
            br.ratio = 1.0; // cancel out taps
            if alg == Alg::FDXB {
                br.r = 0.0; // zero out line resistance
            }
        }
        let (y_p, _, _) = make_ybus(base_mva, &bus, &branch)?;
        -y_p.imag()
    };

    let b_pp = {
        let mut branch = branch.to_vec(); // modify a copy of branch
        for br in branch.iter_mut() {
            br.phase_shift = 0.0; // zero out phase shifters
            if alg == Alg::FDBX {
                br.r = 0.0; // zero out line resistance
            }
        }
        let (y_pp, _, _) = make_ybus(base_mva, &bus, &branch)?;
        -y_pp.imag()
    };

    Ok((b_p, b_pp))
}

/// Mismatch `(V .* conj(Ybus * V) - Sbus) ./ abs(V)`, split into
/// `P(pv;pq)` and `Q(pq)`.
fn fd_mismatch(
    y_bus: &CSR<usize, Complex64>,
    s_bus: &[Complex64],
    v: &[Complex64],
    pv_pq: &[usize],
    pq: &[usize],
) -> (Vec<f64>, Vec<f64>) {
    let i_bus = y_bus * v;
    let mis: Vec<Complex64> = (0..v.len())
        .map(|i| (v[i] * i_bus[i].conj() - s_bus[i]) / v[i].norm())
        .collect();
    (
        pv_pq.iter().map(|&i| mis[i].re).collect(),
        pq.iter().map(|&i| mis[i].im).collect(),
    )
}

/// Solves the power flow using a fast decoupled method.
///
/// Returns the final voltage, a convergence flag, the number of
/// iterations and the final mismatch norm.
pub(crate) fn fdpf(
    y_bus: &CSR<usize, Complex64>,
    s_bus: &[Complex64],
    v0: &[Complex64],
    b_p: &CSR<usize, f64>,
    b_pp: &CSR<usize, f64>,
    pv: &[usize],
    pq: &[usize],
    lin_solver: &dyn LinearSolver,
    pfopt: &PfOpt,
    progress: Option<&dyn ProgressMonitor>,
) -> Result<(Vec<Complex64>, bool, usize, f64)> {
    let pv_pq = [pv, pq].concat();

    let tol = pfopt.tolerance;
    let max_it = pfopt.max_it_fd;

    let mut converged = false;
    let mut i = 0;
    let mut v = v0.to_vec();
    let mut va: Vec<f64> = v.iter().map(|v| v.arg()).collect();
    let mut vm: Vec<f64> = v.iter().map(|v| v.norm()).collect();

    // evaluate initial mismatch
    let (mut p, mut q) = fd_mismatch(y_bus, s_bus, &v, &pv_pq, pq);

    // check tolerance
    let mut norm_p = norm_inf(&p);
    let mut norm_q = norm_inf(&q);
    if let Some(pm) = progress {
        pm.update(i, f64::max(norm_p, norm_q));
    }
    if norm_p < tol && norm_q < tol {
        converged = true;
        log::info!("Fast-decoupled power flow converged with initial voltages.");
    }

    // reduce B matrices
    let b_p = if converged {
        None
    } else {
        Some(b_p.select(Some(&pv_pq), Some(&pv_pq))?.to_csc())
    };
    let b_pp = if converged || pq.is_empty() {
        None
    } else {
        Some(b_pp.select(Some(pq), Some(pq))?.to_csc())
    };

    let polar = |vm: &[f64], va: &[f64]| -> Vec<Complex64> {
        vm.iter()
            .zip(va)
            .map(|(&m, &a)| Complex64::from_polar(m, a))
            .collect()
    };

    // do P and Q iterations
    while !converged && i < max_it {
        i += 1;

        // -----  do P iteration, update Va  -----
        let mut dva: Vec<f64> = p.iter().map(|p| -p).collect();
        if let Some(b_p) = &b_p {
            lin_solver.solve(b_p, &mut dva)?;
        }

        pv_pq.iter().zip(&dva).for_each(|(&k, dva)| va[k] += dva);
        v = polar(&vm, &va);

        (p, q) = fd_mismatch(y_bus, s_bus, &v, &pv_pq, pq);
        norm_p = norm_inf(&p);
        norm_q = norm_inf(&q);
        if norm_p < tol && norm_q < tol {
            converged = true;
            break;
        }

        // -----  do Q iteration, update Vm  -----
        if let Some(b_pp) = &b_pp {
            let mut dvm: Vec<f64> = q.iter().map(|q| -q).collect();
            lin_solver.solve(b_pp, &mut dvm)?;

            pq.iter().zip(&dvm).for_each(|(&k, dvm)| vm[k] += dvm);
            v = polar(&vm, &va);

            (p, q) = fd_mismatch(y_bus, s_bus, &v, &pv_pq, pq);
            norm_p = norm_inf(&p);
            norm_q = norm_inf(&q);
        }
        if let Some(pm) = progress {
            pm.update(i, f64::max(norm_p, norm_q));
        }
        if norm_p < tol && norm_q < tol {
            converged = true;
        }
    }

    if converged {
        log::info!("Fast-decoupled power flow converged in {} P-iterations.", i);
    } else {
        log::info!(
            "Fast-decoupled power flow did not converge in {} iterations.",
            i
        );
    }

    Ok((v, converged, i, f64::max(norm_p, norm_q)))
}
