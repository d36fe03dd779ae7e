use crate::error::Result;
use crate::math::J;
use crate::network::Network;
use num_complex::Complex64;
use sparsetools::csr::{CCSR, CSR};

/// Builds the vector of complex bus power injections.
///
/// Returns the vector of complex bus power injections, that is, generation
/// minus load. Power is expressed in per unit. If `sg` is provided, it
/// holds the complex generator injections in p.u. and overrides the `p`
/// and `q` fields of the generators, which are then used only for
/// connectivity information.
pub fn make_sbus(net: &Network, sg: Option<&[Complex64]>) -> Vec<Complex64> {
    let base_mva = net.base_mva;
    let mut s_bus = vec![Complex64::default(); net.buses.len()];

    for (k, g) in net.generators.iter().enumerate().filter(|(_, g)| g.online) {
        s_bus[g.bus] += match sg {
            Some(sg) => sg[k],
            None => Complex64::new(g.p, g.q) / base_mva,
        };
    }
    for l in net.loads.iter().filter(|l| l.online) {
        s_bus[l.bus] -= Complex64::new(l.p, l.q) / base_mva;
    }
    s_bus
}

/// Computes partial derivatives of power injection w.r.t. voltage
/// angle and magnitude.
///
/// ```txt
/// dSbus/dVa = j * diag(V) * conj(diag(Ibus) - Ybus * diag(V))
/// dSbus/dVm = diag(V) * conj(Ybus * diag(V./abs(V))) + conj(diag(Ibus)) * diag(V./abs(V))
/// ```
/// Both matrices are returned in canonical form.
pub fn d_sbus_d_v(
    y_bus: &CSR<usize, Complex64>,
    v: &[Complex64],
) -> Result<(CSR<usize, Complex64>, CSR<usize, Complex64>)> {
    let i_bus = y_bus * v;

    let diag_v = CSR::<usize, Complex64>::with_diagonal(v.to_vec());
    let diag_i_bus = CSR::<usize, Complex64>::with_diagonal(i_bus);

    let v_norm = v.iter().map(|v| v / v.norm()).collect();
    let diag_v_norm = CSR::<usize, Complex64>::with_diagonal(v_norm);

    let mut d_sbus_d_va = &diag_v * (&diag_i_bus - y_bus * &diag_v).conj() * J;
    let mut d_sbus_d_vm =
        &diag_v * (y_bus * &diag_v_norm).conj() + diag_i_bus.conj() * &diag_v_norm;

    d_sbus_d_va.sum_duplicates()?;
    d_sbus_d_vm.sum_duplicates()?;

    Ok((d_sbus_d_va, d_sbus_d_vm))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{Branch, Bus};
    use crate::ybus::make_ybus;
    use anyhow::{format_err, Result};

    /// Compares the analytical derivatives against central differences.
    #[test]
    fn test_d_sbus_d_v() -> Result<()> {
        let bus = vec![Bus::default(), Bus::default(), Bus::default()];
        let branch = vec![
            Branch {
                source: 0,
                target: 1,
                r: 0.02,
                x: 0.1,
                b: 0.05,
                ..Default::default()
            },
            Branch {
                source: 1,
                target: 2,
                r: 0.01,
                x: 0.08,
                ratio: 1.05,
                phase_shift: 3.0,
                ..Default::default()
            },
        ];
        let (y_bus, _, _) = make_ybus(100.0, &bus, &branch).map_err(|err| format_err!("{}", err))?;

        let vm = [1.02, 0.98, 1.01];
        let va = [0.0, -0.05, 0.03];
        let polar = |vm: &[f64], va: &[f64]| -> Vec<Complex64> {
            vm.iter()
                .zip(va)
                .map(|(&m, &a)| Complex64::from_polar(m, a))
                .collect()
        };
        let s_of = |v: &[Complex64]| -> Vec<Complex64> {
            let i = &y_bus * v;
            v.iter().zip(&i).map(|(v, i)| v * i.conj()).collect()
        };

        let (d_va, d_vm) =
            d_sbus_d_v(&y_bus, &polar(&vm, &va)).map_err(|err| format_err!("{}", err))?;

        let h = 1e-6;
        for j in 0..3 {
            let (mut va_p, mut va_m) = (va.to_vec(), va.to_vec());
            va_p[j] += h;
            va_m[j] -= h;
            let (mut vm_p, mut vm_m) = (vm.to_vec(), vm.to_vec());
            vm_p[j] += h;
            vm_m[j] -= h;

            let (sa_p, sa_m) = (s_of(&polar(&vm, &va_p)), s_of(&polar(&vm, &va_m)));
            let (sm_p, sm_m) = (s_of(&polar(&vm_p, &va)), s_of(&polar(&vm_m, &va)));
            for i in 0..3 {
                let fd_a = (sa_p[i] - sa_m[i]) / (2.0 * h);
                let fd_m = (sm_p[i] - sm_m[i]) / (2.0 * h);
                if (fd_a - d_va.get(i, j)).norm() > 1e-6 || (fd_m - d_vm.get(i, j)).norm() > 1e-6 {
                    return Err(format_err!("derivative mismatch at ({}, {})", i, j));
                }
            }
        }
        Ok(())
    }
}
