use super::assert_close;
use crate::cases::{case3, case5};
use crate::error::PowerError;
use crate::network::CostModel;
use crate::opf::solve_opf;
use crate::options::{Formulation, Options};
use crate::total_load::{total_generation, total_load, total_losses, LoadType};
use anyhow::{format_err, Result};
use spsolve::rlu::RLU;

#[test]
fn test_dc_opf_case3() -> Result<()> {
    let mut net = case3();
    let s = solve_opf(&mut net, Formulation::DC, &Options::default(), &RLU::default())?;
    if !s.converged {
        return Err(format_err!("DC OPF did not converge in {} iterations", s.iterations));
    }
    assert_close("objective", s.objective, 1700.0, 1e-6)?;
    assert_close("G1", net.generators[0].p, 70.0, 1e-4)?;
    assert_close("G2", net.generators[1].p, 50.0, 1e-4)?;
    for b in &net.buses {
        assert_close("lambda", b.p_lambda, 10.0, 1e-4)?;
    }
    assert_close("mu_p_min G2", net.generators[1].mu_p_min, 10.0, 1e-4)?;
    assert_close("mu_p_min G1", net.generators[0].mu_p_min, 0.0, 1e-4)?;
    assert_close("mu_p_max G2", net.generators[1].mu_p_max, 0.0, 1e-4)?;
    Ok(())
}

#[test]
fn test_dc_opf_congestion() -> Result<()> {
    let mut net = case3();
    net.branches[1].s_max = 60.0;
    let s = solve_opf(&mut net, Formulation::DC, &Options::default(), &RLU::default())?;
    if !s.converged {
        return Err(format_err!("DC OPF did not converge"));
    }
    assert_close("objective", s.objective, 1800.0, 1e-6)?;
    assert_close("G1", net.generators[0].p, 60.0, 1e-4)?;
    assert_close("G2", net.generators[1].p, 60.0, 1e-4)?;
    assert_close("flow 1-3", net.branches[1].p_source, 60.0, 1e-4)?;

    for (b, lmp) in net.buses.iter().zip([10.0, 20.0, 30.0]) {
        assert_close("LMP", b.p_lambda, lmp, 1e-4)?;
    }
    // relieving 1 MW of the limit moves 3 MW from G2 to G1
    assert_close("mu_s", net.branches[1].mu_s_source, 30.0, 1e-4)?;
    assert_close("mu_s reverse", net.branches[1].mu_s_target, 0.0, 1e-4)?;
    Ok(())
}

#[test]
fn test_relaxation_cannot_increase_cost() -> Result<()> {
    let mut tight = case3();
    tight.generators[0].p_max = 60.0;
    let mut wide = case3();

    let opt = Options::default();
    let s_tight = solve_opf(&mut tight, Formulation::DC, &opt, &RLU::default())?;
    let s_wide = solve_opf(&mut wide, Formulation::DC, &opt, &RLU::default())?;
    if !s_tight.converged || !s_wide.converged {
        return Err(format_err!("OPF did not converge"));
    }
    assert_close("tight objective", s_tight.objective, 1800.0, 1e-6)?;
    if s_wide.objective > s_tight.objective {
        return Err(format_err!(
            "wider limits cost {} > {}",
            s_wide.objective,
            s_tight.objective
        ));
    }
    assert_close("mu_p_max G1", tight.generators[0].mu_p_max, 10.0, 1e-4)?;
    Ok(())
}

#[test]
fn test_piecewise_linear_cost() -> Result<()> {
    let mut net = case3();
    net.generators[0].cost = CostModel::PiecewiseLinear(vec![(0.0, 0.0), (100.0, 1000.0), (200.0, 4000.0)]);
    let s = solve_opf(&mut net, Formulation::DC, &Options::default(), &RLU::default())?;
    if !s.converged {
        return Err(format_err!("DC OPF did not converge"));
    }
    assert_close("objective", s.objective, 1700.0, 1e-6)?;
    assert_close("G1", net.generators[0].p, 70.0, 1e-4)?;

    // G1 on its second segment is dearer than G2
    net.loads[0].p = 180.0;
    let s = solve_opf(&mut net, Formulation::DC, &Options::default(), &RLU::default())?;
    if !s.converged {
        return Err(format_err!("DC OPF did not converge"));
    }
    assert_close("G1", net.generators[0].p, 100.0, 1e-4)?;
    assert_close("G2", net.generators[1].p, 80.0, 1e-4)?;
    assert_close("objective", s.objective, 2600.0, 1e-6)?;
    assert_close("lambda", net.buses[2].p_lambda, 20.0, 1e-4)?;
    Ok(())
}

#[test]
fn test_dc_opf_case5() -> Result<()> {
    let mut net = case5();
    let s = solve_opf(&mut net, Formulation::DC, &Options::default(), &RLU::default())?;
    if !s.converged {
        return Err(format_err!("DC OPF did not converge"));
    }
    assert_close("balance", total_generation(&net), 1000.0, 1e-4)?;
    for br in &net.branches {
        if br.s_max > 0.0 && br.p_source.abs() > br.s_max + 1e-4 {
            return Err(format_err!("branch {} overloaded: {}", br.name, br.p_source));
        }
    }
    Ok(())
}

#[test]
fn test_ac_opf() -> Result<()> {
    for (mut net, slack) in [(case3(), 0), (case5(), 3)] {
        let s = solve_opf(&mut net, Formulation::AC, &Options::default(), &RLU::default())?;
        if !s.converged {
            return Err(format_err!("{}: AC OPF did not converge in {} iterations", net.name, s.iterations));
        }
        let load = total_load(&net, LoadType::Fixed, false);
        assert_close(
            &net.name,
            total_generation(&net),
            load + total_losses(&net),
            1e-4,
        )?;
        for b in &net.buses {
            if b.v_amplitude > b.v_max + 1e-6 || b.v_amplitude < b.v_min - 1e-6 {
                return Err(format_err!("bus {} voltage {} out of limits", b.id, b.v_amplitude));
            }
        }
        for g in &net.generators {
            if g.p > g.p_max + 1e-4 || g.p < g.p_min - 1e-4 {
                return Err(format_err!("{} output {} out of limits", g.name, g.p));
            }
        }
        if net.buses[slack].p_lambda <= 0.0 {
            return Err(format_err!("{}: no price at the slack bus", net.name));
        }
    }
    Ok(())
}

#[test]
fn test_ac_opf_case3_prices() -> Result<()> {
    let mut net = case3();
    let s = solve_opf(&mut net, Formulation::AC, &Options::default(), &RLU::default())?;
    if !s.converged {
        return Err(format_err!("AC OPF did not converge"));
    }
    assert_close("slack price", net.buses[0].p_lambda, 10.0, 1e-4)?;
    assert_close("G2", net.generators[1].p, 50.0, 1e-4)?;
    if net.generators[1].mu_p_min <= 0.0 {
        return Err(format_err!("G2 lower limit not binding"));
    }
    // losses are served from the slack unit
    if s.objective <= 1700.0 || net.generators[0].p <= 70.0 {
        return Err(format_err!("objective {} without losses", s.objective));
    }
    Ok(())
}

#[test]
fn test_failed_opf_leaves_sentinels() -> Result<()> {
    let mut net = case3();
    let mut opt = Options::default();
    opt.opf.max_it = 1;
    let s = solve_opf(&mut net, Formulation::DC, &opt, &RLU::default())?;
    if s.converged || s.iterations != 1 {
        return Err(format_err!("expected failure after one iteration"));
    }
    if net.buses.iter().any(|b| b.p_lambda != 0.0 || b.v_phase != 0.0) {
        return Err(format_err!("results written by a failed solve"));
    }
    if net.generators.iter().any(|g| g.mu_p_min != 0.0) {
        return Err(format_err!("multipliers written by a failed solve"));
    }
    Ok(())
}

#[test]
fn test_ac_opf_low_cost() -> Result<()> {
    let mut full = case3();
    let s_full = solve_opf(&mut full, Formulation::AC, &Options::default(), &RLU::default())?;

    let mut low = case3();
    for g in low.generators.iter_mut() {
        if let CostModel::Polynomial(c) = &mut g.cost {
            c.iter_mut().for_each(|ck| *ck *= 0.01);
        }
    }
    let s_low = solve_opf(&mut low, Formulation::AC, &Options::default(), &RLU::default())?;
    if !s_full.converged || !s_low.converged {
        return Err(format_err!(
            "AC OPF did not converge: {} and {} iterations",
            s_full.iterations,
            s_low.iterations
        ));
    }
    assert_close("objective", s_low.objective, 0.01 * s_full.objective, 1e-3)?;
    assert_close("slack price", low.buses[0].p_lambda, 0.1, 1e-4)?;
    for (g_low, g_full) in low.generators.iter().zip(&full.generators) {
        assert_close(&g_low.name, g_low.p, g_full.p, 1e-3)?;
    }
    Ok(())
}

#[test]
fn test_error_clears_previous_results() -> Result<()> {
    let mut net = case3();
    let s = solve_opf(&mut net, Formulation::DC, &Options::default(), &RLU::default())?;
    if !s.converged || net.buses.iter().all(|b| b.p_lambda == 0.0) {
        return Err(format_err!("expected prices from the first solve"));
    }

    net.buses[0].slack = false;
    match solve_opf(&mut net, Formulation::DC, &Options::default(), &RLU::default()) {
        Err(PowerError::NoSlackBus) => {}
        other => return Err(format_err!("expected NoSlackBus, got {:?}", other)),
    }
    if net.buses.iter().any(|b| b.p_lambda != 0.0) {
        return Err(format_err!("stale prices after a rejected solve"));
    }
    if net.generators.iter().any(|g| g.mu_p_min != 0.0 || g.mu_p_max != 0.0) {
        return Err(format_err!("stale multipliers after a rejected solve"));
    }
    Ok(())
}
