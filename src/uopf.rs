use crate::error::{PowerError, Result};
use crate::network::Network;
use crate::opf::{solve_opf, OpfSolution};
use crate::options::{Formulation, Options};
use crate::total_load::{total_load, LoadType};
use crate::traits::LinearSolver;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::time::{Duration, Instant};

/// Result of the unit decommitment search. The network holds the dispatch
/// and prices of the returned commitment.
#[derive(Debug, Clone)]
pub struct UnitCommitment {
    pub converged: bool,

    /// Total generation cost of the best commitment ($/hr).
    pub objective: f64,

    pub elapsed: Duration,

    /// Online status per generator, indexed like `Network::generators`.
    pub commitment: Vec<bool>,

    /// Number of stages that shut down a unit.
    pub stages: usize,

    /// Final OPF solve with the best commitment.
    pub opf: OpfSolution,
}

/// Returns the index and value of the largest element of `values`. Ties
/// between equal maxima are broken uniformly at random.
pub fn fair_max<R: Rng + ?Sized>(values: &[f64], rng: &mut R) -> Option<(usize, f64)> {
    let max = values
        .iter()
        .copied()
        .filter(|v| !v.is_nan())
        .fold(None, |m: Option<f64>, v| Some(m.map_or(v, |m| m.max(v))))?;
    let ties: Vec<usize> = (0..values.len()).filter(|&i| values[i] == max).collect();
    ties.choose(rng).map(|&i| (i, max))
}

/// Solves a combined unit decommitment and optimal power flow problem.
///
/// Units are first shut down, most expensive average cost at minimum
/// output first, until the total minimum generation fits within the load.
/// Each following stage then tries shutting down, one at a time, every
/// online unit held at a binding lower limit, starting from the best
/// commitment of the previous stage. The single best improvement is kept
/// and the search stops when a stage finds none.
pub fn solve_unit_commitment(
    net: &mut Network,
    formulation: Formulation,
    opt: &Options,
    lin_solver: &dyn LinearSolver,
) -> Result<UnitCommitment> {
    opt.validate()?;
    net.validate()?;

    let t0 = Instant::now();
    let mut rng = opt
        .uc
        .seed
        .map(StdRng::seed_from_u64)
        .unwrap_or_else(StdRng::from_entropy);

    decommit_min_generation(net, &mut rng)?;

    // initial OPF with the feasible commitment
    let opf = solve_opf(net, formulation, opt, lin_solver)?;
    if !opf.converged {
        return Err(PowerError::OpfFailed {
            stage: 0,
            iterations: opf.iterations,
        });
    }

    let mut best = net.clone(); // overall best
    let mut best_cost = opf.objective;
    let mut stage_best = best.clone();
    let mut stages = 0;

    loop {
        let candidates: Vec<usize> = stage_best
            .generators
            .iter()
            .enumerate()
            .filter(|(_, g)| g.online && round4(g.mu_p_min) > 0.0 && g.p_min > 0.0)
            .map(|(k, _)| k)
            .collect();
        if candidates.is_empty() {
            break;
        }
        log::info!(
            "stage {}: trying to shut down generators {:?}",
            stages + 1,
            candidates
        );

        let mut improved = false;
        let stage_commitment = stage_best.commitment();
        for k in candidates {
            let mut commitment = stage_commitment.clone();
            commitment[k] = false;
            *net = stage_best.clone();
            net.set_commitment(&commitment);

            let s = match solve_opf(net, formulation, opt, lin_solver) {
                Ok(s) => s,
                Err(err) => {
                    *net = stage_best;
                    return Err(err);
                }
            };
            if !s.converged {
                log::info!("  gen {}: OPF did not converge, skipping", k);
                continue;
            }
            log::debug!("  gen {}: objective {:.4}", k, s.objective);
            if s.objective < best_cost {
                best = net.clone();
                best_cost = s.objective;
                improved = true;
            }
        }
        if !improved {
            break;
        }
        stages += 1;
        log::info!("stage {}: objective {:.4}", stages, best_cost);
        stage_best = best.clone();
    }

    // restore the best commitment and its solution
    *net = best;
    let opf = solve_opf(net, formulation, opt, lin_solver)?;
    if !opf.converged {
        return Err(PowerError::OpfFailed {
            stage: stages,
            iterations: opf.iterations,
        });
    }

    Ok(UnitCommitment {
        converged: true,
        objective: opf.objective,
        elapsed: t0.elapsed(),
        commitment: net.commitment(),
        stages,
        opf,
    })
}

/// Shuts down units until the total minimum output of the online
/// generators no longer exceeds the load capacity.
fn decommit_min_generation<R: Rng + ?Sized>(net: &mut Network, rng: &mut R) -> Result<()> {
    let capacity = total_load(net, LoadType::Both, true);

    loop {
        let on: Vec<usize> = (0..net.generators.len())
            .filter(|&k| net.generators[k].online && !net.generators[k].is_load())
            .collect();
        let p_min: f64 = on.iter().map(|&k| net.generators[k].p_min).sum();
        if on.is_empty() && capacity > 0.0 {
            return Err(PowerError::InfeasibleCommitment { p_min, capacity });
        }
        if p_min <= capacity {
            return Ok(());
        }

        let candidates: Vec<usize> = on
            .into_iter()
            .filter(|&k| net.generators[k].p_min > 0.0)
            .collect();
        let avg_cost: Vec<f64> = candidates
            .iter()
            .map(|&k| net.generators[k].average_cost_at_p_min())
            .collect();
        let Some((i, cost)) = fair_max(&avg_cost, rng) else {
            return Err(PowerError::InfeasibleCommitment { p_min, capacity });
        };
        let k = candidates[i];
        log::info!(
            "minimum generation {:.3} MW exceeds load capacity {:.3} MW, shutting down gen {} (average cost {:.4} at p_min)",
            p_min,
            capacity,
            k,
            cost
        );
        net.generators[k].online = false;
    }
}

fn round4(v: f64) -> f64 {
    (v * 1e4).round() / 1e4
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{format_err, Result};

    #[test]
    fn test_fair_max() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(7);
        if fair_max(&[1.0, 3.0, 2.0], &mut rng) != Some((1, 3.0)) {
            return Err(format_err!("wrong maximum"));
        }
        if fair_max(&[], &mut rng).is_some() {
            return Err(format_err!("maximum of nothing"));
        }

        let ties = [5.0, 1.0, 5.0, 5.0];
        let pick = |seed: u64| fair_max(&ties, &mut StdRng::seed_from_u64(seed));
        if pick(11) != pick(11) {
            return Err(format_err!("same seed gave different choices"));
        }
        let mut seen = [false; 4];
        for seed in 0..64 {
            match pick(seed) {
                Some((i, v)) if v == 5.0 => seen[i] = true,
                other => return Err(format_err!("unexpected choice {:?}", other)),
            }
        }
        if seen != [true, false, true, true] {
            return Err(format_err!("tied indices chosen {:?}", seen));
        }
        Ok(())
    }

    #[test]
    fn test_round4() -> Result<()> {
        if round4(0.00004) != 0.0 || round4(0.00006) != 0.0001 {
            return Err(format_err!("rounding"));
        }
        Ok(())
    }
}
