use crate::error::{PowerError, Result};
use crate::network::{Branch, Bus};
use num_complex::Complex64;
use sparsetools::coo::Coo;
use sparsetools::csr::CSR;
use std::f64::consts::PI;

/// Elements of the branch admittance matrix where:
///
/// ```txt
///      | If |   | Yff  Yft |   | Vf |
///      |    | = |          | * |    |
///      | It |   | Ytf  Ytt |   | Vt |
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BranchAdmittance {
    pub y_ff: Complex64,
    pub y_ft: Complex64,
    pub y_tf: Complex64,
    pub y_tt: Complex64,
}

/// Pi-model admittances of branch `l`. Out-of-service branches give zero.
pub fn branch_admittance(l: usize, br: &Branch) -> Result<BranchAdmittance> {
    if !br.online {
        return Ok(BranchAdmittance::default());
    }
    if br.r == 0.0 && br.x == 0.0 {
        return Err(PowerError::ZeroImpedance(l));
    }
    let y_s = Complex64::new(1.0, 0.0) / Complex64::new(br.r, br.x); // series admittance
    let t = if br.ratio == 0.0 { 1.0 } else { br.ratio }; // default tap ratio = 1
    let tap = Complex64::from_polar(t, br.phase_shift * PI / 180.0); // add phase shifters

    let y_tt = y_s + Complex64::new(0.0, br.b / 2.0);
    Ok(BranchAdmittance {
        y_ff: y_tt / (tap * tap.conj()),
        y_ft: -y_s / tap.conj(),
        y_tf: -y_s / tap,
        y_tt,
    })
}

/// Builds the bus admittance matrix and branch admittance matrices.
///
/// Returns `(Ybus, Yf, Yt)` where `Yf * V` and `Yt * V` are the complex
/// currents injected at the source and target end of each branch.
pub fn make_ybus(
    base_mva: f64,
    bus: &[Bus],
    branch: &[Branch],
) -> Result<(
    CSR<usize, Complex64>,
    CSR<usize, Complex64>,
    CSR<usize, Complex64>,
)> {
    let nb = bus.len();
    let nl = branch.len();

    let mut y_bus = Coo::with_capacity(nb, nb, 4 * nl + nb);
    let mut y_f = Coo::with_capacity(nl, nb, 2 * nl);
    let mut y_t = Coo::with_capacity(nl, nb, 2 * nl);

    for (l, br) in branch.iter().enumerate() {
        if !br.online {
            continue;
        }
        let y = branch_admittance(l, br)?;
        let (f, t) = (br.source, br.target);

        y_f.push(l, f, y.y_ff);
        y_f.push(l, t, y.y_ft);
        y_t.push(l, f, y.y_tf);
        y_t.push(l, t, y.y_tt);

        y_bus.push(f, f, y.y_ff);
        y_bus.push(f, t, y.y_ft);
        y_bus.push(t, f, y.y_tf);
        y_bus.push(t, t, y.y_tt);
    }

    // Psh - j Qsh = V * conj(Ysh * V) = conj(Ysh) = Gs - j Bs at V = 1.0 p.u.
    for (i, b) in bus.iter().enumerate() {
        if b.g_shunt != 0.0 || b.b_shunt != 0.0 {
            y_bus.push(i, i, Complex64::new(b.g_shunt, b.b_shunt) / base_mva);
        }
    }

    // duplicates summed
    Ok((y_bus.to_csr(), y_f.to_csr(), y_t.to_csr()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{format_err, Result};

    fn close(a: Complex64, b: Complex64) -> bool {
        (a - b).norm() < 1e-12
    }

    #[test]
    fn test_make_ybus() -> Result<()> {
        let bus = vec![
            Bus {
                id: 1,
                ..Default::default()
            },
            Bus {
                id: 2,
                b_shunt: 10.0,
                ..Default::default()
            },
        ];
        let branch = vec![
            Branch {
                source: 0,
                target: 1,
                r: 0.0,
                x: 0.5,
                b: 0.2,
                ..Default::default()
            },
            Branch {
                source: 0,
                target: 1,
                x: 0.1,
                online: false,
                ..Default::default()
            },
        ];
        let (y_bus, y_f, _) = make_ybus(100.0, &bus, &branch).map_err(|err| format_err!("{}", err))?;

        // y_s = 1/(j0.5) = -j2
        let expected = [
            [Complex64::new(0.0, -1.9), Complex64::new(0.0, 2.0)],
            [Complex64::new(0.0, 2.0), Complex64::new(0.0, -1.8)],
        ];
        for i in 0..2 {
            for j in 0..2 {
                let y = y_bus.get(i, j);
                if !close(y, expected[i][j]) {
                    return Err(format_err!("Y[{}][{}] = {} != {}", i, j, y, expected[i][j]));
                }
            }
        }
        let if_ = &y_f * &vec![Complex64::new(1.0, 0.0); 2];
        if !close(if_[0], Complex64::new(0.0, 0.1)) || if_[1] != Complex64::default() {
            return Err(format_err!("branch currents {:?}", if_));
        }
        Ok(())
    }

    #[test]
    fn test_transformer() -> Result<()> {
        let br = Branch {
            x: 0.1,
            ratio: 2.0,
            phase_shift: 90.0,
            ..Default::default()
        };
        let y = branch_admittance(0, &br).map_err(|err| format_err!("{}", err))?;
        // tap = 2∠90° = j2, y_s = -j10
        if !close(y.y_ff, Complex64::new(0.0, -2.5))
            || !close(y.y_ft, Complex64::new(-5.0, 0.0))
            || !close(y.y_tf, Complex64::new(5.0, 0.0))
        {
            return Err(format_err!("{:?}", y));
        }
        Ok(())
    }

    #[test]
    fn test_zero_impedance() -> Result<()> {
        let br = Branch::default();
        match branch_admittance(3, &br) {
            Err(PowerError::ZeroImpedance(3)) => Ok(()),
            other => Err(format_err!("expected zero impedance error, got {:?}", other)),
        }
    }
}
