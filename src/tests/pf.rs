use super::assert_close;
use crate::cases::{case3, case5};
use crate::error::PowerError;
use crate::network::{Generator, Load};
use crate::options::{Alg, Formulation, GenQLimits, Options};
use crate::pf::solve_power_flow;
use crate::total_load::{total_generation, total_load, total_losses, LoadType};
use anyhow::{format_err, Result};
use spsolve::rlu::RLU;

#[test]
fn test_dc_pf_case3() -> Result<()> {
    let mut net = case3();
    net.generators[0].p = 0.0;
    let s = solve_power_flow(&mut net, Formulation::DC, &Options::default(), &RLU::default())?;
    if !s.converged {
        return Err(format_err!("DC power flow failed"));
    }
    assert_close("slack output", net.generators[0].p, 70.0, 1e-9)?;
    assert_close("flow 1-2", net.branches[0].p_source, 20.0 / 3.0, 1e-9)?;
    assert_close("flow 1-3", net.branches[1].p_source, 190.0 / 3.0, 1e-9)?;
    assert_close("flow 2-3", net.branches[2].p_source, 170.0 / 3.0, 1e-9)?;
    assert_close("losses", total_losses(&net), 0.0, 1e-9)?;
    Ok(())
}

#[test]
fn test_dc_pf_no_slack() -> Result<()> {
    let mut net = case3();
    net.buses[0].slack = false;
    match solve_power_flow(&mut net, Formulation::DC, &Options::default(), &RLU::default()) {
        Err(PowerError::NoSlackBus) => Ok(()),
        other => Err(format_err!("expected missing slack bus error, got {:?}", other)),
    }
}

#[test]
fn test_ac_pf_power_balance() -> Result<()> {
    for mut net in [case3(), case5()] {
        let s = solve_power_flow(&mut net, Formulation::AC, &Options::default(), &RLU::default())?;
        if !s.converged {
            return Err(format_err!("{}: power flow did not converge", net.name));
        }
        let load = total_load(&net, LoadType::Fixed, false);
        assert_close(
            &net.name,
            total_generation(&net),
            load + total_losses(&net),
            1e-3,
        )?;
        if total_losses(&net) <= 0.0 {
            return Err(format_err!("{}: lossy branches but no losses", net.name));
        }
    }
    Ok(())
}

fn without_q_limits() -> Options {
    let mut opt = Options::default();
    opt.pf.enforce_q_limits = GenQLimits::IgnoreLimits;
    opt
}

#[test]
fn test_fast_decoupled() -> Result<()> {
    let mut nr = case5();
    solve_power_flow(&mut nr, Formulation::AC, &without_q_limits(), &RLU::default())?;

    for alg in [Alg::FDXB, Alg::FDBX] {
        let mut net = case5();
        let mut opt = without_q_limits();
        opt.pf.algorithm = alg;
        let s = solve_power_flow(&mut net, Formulation::AC, &opt, &RLU::default())?;
        if !s.converged {
            return Err(format_err!("{:?} did not converge", alg));
        }
        for (b, b_nr) in net.buses.iter().zip(&nr.buses) {
            assert_close("|V|", b.v_amplitude, b_nr.v_amplitude, 1e-6)?;
            assert_close("angle", b.v_phase, b_nr.v_phase, 1e-5)?;
        }
    }
    Ok(())
}

#[test]
fn test_resolve_converged() -> Result<()> {
    let mut net = case5();
    let opt = without_q_limits();
    solve_power_flow(&mut net, Formulation::AC, &opt, &RLU::default())?;
    let first = net.clone();

    let s = solve_power_flow(&mut net, Formulation::AC, &opt, &RLU::default())?;
    if !s.converged || s.iterations > 2 {
        return Err(format_err!("re-solve took {} iterations", s.iterations));
    }
    for (b, b0) in net.buses.iter().zip(&first.buses) {
        assert_close("|V|", b.v_amplitude, b0.v_amplitude, 1e-9)?;
        assert_close("angle", b.v_phase, b0.v_phase, 1e-7)?;
    }
    Ok(())
}

#[test]
fn test_reactive_limit() -> Result<()> {
    let mut net = case3();
    net.generators[1].v_amplitude = 1.05;
    net.generators[1].q_max = 5.0;
    net.loads[0].q = 0.0;
    net.add_load(Load {
        bus: 1,
        q: 20.0,
        ..Default::default()
    });

    let mut opt = without_q_limits();
    let mut free = net.clone();
    solve_power_flow(&mut free, Formulation::AC, &opt, &RLU::default())?;
    if free.generators[1].q <= 5.0 {
        return Err(format_err!("limit not exceeded, q = {}", free.generators[1].q));
    }

    for mode in [GenQLimits::OneAtATime, GenQLimits::Simultaneous] {
        let mut net = net.clone();
        opt.pf.enforce_q_limits = mode;
        let s = solve_power_flow(&mut net, Formulation::AC, &opt, &RLU::default())?;
        if !s.converged || s.q_limited != 1 {
            return Err(format_err!("{:?}: {} units limited", mode, s.q_limited));
        }
        assert_close("q at limit", net.generators[1].q, 5.0, 1e-9)?;
        if net.buses[1].v_amplitude >= 1.05 {
            return Err(format_err!("voltage held at {}", net.buses[1].v_amplitude));
        }
    }
    Ok(())
}

#[test]
fn test_ac_dc_agreement() -> Result<()> {
    let mut net = case3();
    for br in net.branches.iter_mut() {
        br.r = 0.0;
    }
    net.add_generator(Generator {
        bus: 2,
        ..Default::default()
    });
    let mut ac = net.clone();

    let opt = without_q_limits();
    let s_ac = solve_power_flow(&mut ac, Formulation::AC, &opt, &RLU::default())?;
    let s_dc = solve_power_flow(&mut net, Formulation::DC, &opt, &RLU::default())?;
    if !s_ac.converged || !s_dc.converged {
        return Err(format_err!("power flow did not converge"));
    }

    for (br_ac, br_dc) in ac.branches.iter().zip(&net.branches) {
        assert_close(&br_ac.name, br_ac.p_source, br_dc.p_source, 0.5)?;
    }
    Ok(())
}

#[test]
fn test_failed_pf_keeps_voltages() -> Result<()> {
    let mut net = case5();
    let mut opt = Options::default();
    opt.pf.max_it_nr = 1;
    let s = solve_power_flow(&mut net, Formulation::AC, &opt, &RLU::default())?;
    if s.converged || s.iterations != 1 {
        return Err(format_err!("expected failure after one iteration"));
    }
    if net.buses.iter().any(|b| b.v_amplitude != 1.0 || b.v_phase != 0.0) {
        return Err(format_err!("voltages changed by a failed solve"));
    }
    if net.branches.iter().any(|br| br.p_source != 0.0) {
        return Err(format_err!("flows written by a failed solve"));
    }
    Ok(())
}
