use crate::network::Network;
use num_complex::Complex64;
use pretty_dtoa::{dtoa, FmtFloatConfig};
use std::f64::consts::PI;
use std::fmt::Write;

const FLOAT_CONFIG: FmtFloatConfig = FmtFloatConfig::default()
    .add_point_zero(false)
    .max_significant_digits(9);

const TABLE_CONFIG: FmtFloatConfig = FmtFloatConfig::default()
    .add_point_zero(true)
    .max_significant_digits(7);

pub fn format_f64_vec(v: &[f64]) -> String {
    let a: Vec<String> = v.iter().map(|f| dtoa(*f, FLOAT_CONFIG)).collect();
    format!("[{}]", a.join(", "))
}

fn format_polar(z: &Complex64) -> String {
    format!(
        "{}\u{2220}{}\u{00B0}",
        dtoa(z.norm(), FLOAT_CONFIG),
        dtoa(z.arg() * 180.0 / PI, FLOAT_CONFIG)
    )
}

pub fn format_polar_vec(v: &[Complex64]) -> String {
    let a: Vec<String> = v.iter().map(format_polar).collect();
    format!("[{}]", a.join(", "))
}

/// Bus voltages and prices followed by generator dispatch and limit
/// multipliers, one row per element.
pub fn format_summary(net: &Network) -> String {
    let num = |v: f64| dtoa(v, TABLE_CONFIG);
    let mut s = String::new();

    let _ = writeln!(s, "{:>6} {:>12} {:>12} {:>12}", "bus", "|V| (pu)", "ang (deg)", "lambda");
    for b in &net.buses {
        let _ = writeln!(
            s,
            "{:>6} {:>12} {:>12} {:>12}",
            b.id,
            num(b.v_amplitude),
            num(b.v_phase),
            num(b.p_lambda)
        );
    }

    let _ = writeln!(
        s,
        "{:>6} {:>6} {:>12} {:>12} {:>12} {:>12}",
        "gen", "bus", "P (MW)", "Q (MVAr)", "mu Pmin", "mu Pmax"
    );
    for (k, g) in net.generators.iter().enumerate() {
        let status = if g.online { "" } else { " off" };
        let _ = writeln!(
            s,
            "{:>6} {:>6} {:>12} {:>12} {:>12} {:>12}{}",
            k,
            net.buses.get(g.bus).map_or(g.bus, |b| b.id),
            num(g.p),
            num(g.q),
            num(g.mu_p_min),
            num(g.mu_p_max),
            status
        );
    }
    s
}
