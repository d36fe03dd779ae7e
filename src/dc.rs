use crate::error::{PowerError, Result};
use crate::network::{Branch, Bus};
use crate::math::norm_inf;
use crate::traits::LinearSolver;
use sparsetools::coo::Coo;
use sparsetools::csr::CSR;
use std::f64::consts::PI;

/// Solves a DC power flow.
///
/// Solves for the bus voltage angles at all but the reference bus,
/// given the full system B matrix and the vector of bus real power injections,
/// the initial vector of bus voltage angles (in radians), the reference bus
/// and the list of buses with unknown angle. Returns a vector of bus voltage
/// angles in radians.
pub(crate) fn dc_pf(
    b_mat: &CSR<usize, f64>,
    p_bus: &[f64],
    va0: &[f64],
    ref_: usize,
    pvpq: &[usize],
    lin_solver: &dyn LinearSolver,
) -> Result<(Vec<f64>, bool)> {
    let va_threshold = 1e5; // arbitrary threshold on |Va| for declaring failure

    let mut va = va0.to_vec();
    if pvpq.is_empty() {
        return Ok((va, true));
    }

    // Va([pv; pq]) = B([pv; pq], [pv; pq]) \ (Pbus([pv; pq]) - B([pv; pq], ref) * Va0(ref))
    let b_pvpq = b_mat.select(Some(pvpq), Some(pvpq))?;
    let b_ref = b_mat.select(Some(pvpq), Some(&[ref_][..]))?;
    let va_ref = vec![va0[ref_]];

    let mut rhs: Vec<f64> = pvpq
        .iter()
        .zip(&b_ref * &va_ref)
        .map(|(&i, p_ref)| p_bus[i] - p_ref)
        .collect();

    lin_solver.solve(&b_pvpq.to_csc(), &mut rhs)?;

    pvpq.iter().zip(&rhs).for_each(|(&j, &va_j)| va[j] = va_j);

    let success = norm_inf(&va) <= va_threshold;
    Ok((va, success))
}

/// Builds the B matrices and phase shift injections for DC power flow.
///
/// Returns the B matrices and phase shift injection vectors needed for
/// a DC power flow. The bus real power injections are related to bus
/// voltage angles by
///     P = BBUS * Va + PBUSINJ
/// The real power flows at the from end the lines are related to the bus
/// voltage angles by
///     Pf = BF * Va + PFINJ
pub fn make_b_dc(
    bus: &[Bus],
    branch: &[Branch],
) -> Result<(CSR<usize, f64>, CSR<usize, f64>, Vec<f64>, Vec<f64>)> {
    let (nl, nb) = (branch.len(), bus.len());

    // Build Bf such that Bf * Va is the vector of real branch powers injected
    // at each branch's "from" bus.
    let mut b_f = Coo::with_capacity(nl, nb, 2 * nl);
    // Build connection matrix Cft = Cf - Ct for line and from - to buses.
    let mut c_ft = Coo::with_capacity(nl, nb, 2 * nl);
    let mut pfinj = vec![0.0; nl];

    for (l, br) in branch.iter().enumerate() {
        if !br.online {
            continue;
        }
        if br.x == 0.0 {
            return Err(PowerError::ZeroImpedance(l));
        }
        let tap = if br.ratio == 0.0 { 1.0 } else { br.ratio }; // default tap ratio = 1
        let b = 1.0 / br.x / tap; // series susceptance

        let (f, t) = (br.source, br.target);

        b_f.push(l, f, b);
        b_f.push(l, t, -b);

        c_ft.push(l, f, 1.0);
        c_ft.push(l, t, -1.0);

        pfinj[l] = -b * br.phase_shift * PI / 180.0; // injected at the from bus ...
    }
    let b_f = b_f.to_csr();
    let c_ft = c_ft.to_csr();

    let b_bus = (&c_ft.t() * &b_f).to_csr();
    let pbusinj = &c_ft.t() * &pfinj; // ... and extracted at the to bus

    Ok((b_bus, b_f, pbusinj, pfinj))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{format_err, Result};
    use spsolve::rlu::RLU;

    #[test]
    fn test_make_b_dc() -> Result<()> {
        let bus = vec![Bus::default(), Bus::default()];
        let branch = vec![Branch {
            source: 0,
            target: 1,
            r: 0.01,
            x: 0.1,
            phase_shift: -10.0,
            ..Default::default()
        }];
        let (b_bus, b_f, pbusinj, pfinj) =
            make_b_dc(&bus, &branch).map_err(|err| format_err!("{}", err))?;
        if b_bus.get(0, 0) != 10.0 || b_bus.get(0, 1) != -10.0 || b_f.get(0, 1) != -10.0 {
            return Err(format_err!("B = {}", b_bus.to_table()));
        }
        let expected = 10.0 * 10.0 * PI / 180.0;
        if (pfinj[0] - expected).abs() > 1e-12 || (pbusinj[1] + expected).abs() > 1e-12 {
            return Err(format_err!("injections {:?} {:?}", pfinj, pbusinj));
        }
        Ok(())
    }

    #[test]
    fn test_dc_pf() -> Result<()> {
        let bus = vec![Bus::default(), Bus::default(), Bus::default()];
        let branch = vec![
            Branch {
                source: 0,
                target: 1,
                x: 0.1,
                ..Default::default()
            },
            Branch {
                source: 1,
                target: 2,
                x: 0.2,
                ..Default::default()
            },
        ];
        let (b_bus, _, _, _) = make_b_dc(&bus, &branch).map_err(|err| format_err!("{}", err))?;
        let p_bus = [0.0, 0.5, -1.0];
        let (va, success) = dc_pf(&b_bus, &p_bus, &[0.0; 3], 0, &[1, 2], &RLU::default())
            .map_err(|err| format_err!("{}", err))?;
        if !success {
            return Err(format_err!("dc power flow failed"));
        }
        // radial: flow 0->1 is 0.5, flow 1->2 is 1.0
        let expected = [0.0, -0.05, -0.25];
        for (a, b) in va.iter().zip(expected) {
            if (a - b).abs() > 1e-10 {
                return Err(format_err!("Va = {:?}", va));
            }
        }
        Ok(())
    }
}
