use crate::network::Network;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoadType {
    /// Sum both fixed and dispatchable loads.
    Both,
    /// Sum only fixed loads.
    Fixed,
    /// Sum only dispatchable loads.
    Dispatchable,
}

/// Returns the total real power demand (MW) of the online loads.
///
/// `nominal` - use the nominal capacity (`-p_min`) of dispatchable loads.
/// Otherwise the realized demand (`-p`) is used.
pub fn total_load(net: &Network, load_type: LoadType, nominal: bool) -> f64 {
    let want_fixed = matches!(load_type, LoadType::Both | LoadType::Fixed);
    let want_disp = matches!(load_type, LoadType::Both | LoadType::Dispatchable);

    let p_df: f64 = if want_fixed {
        net.loads.iter().filter(|l| l.online).map(|l| l.p).sum()
    } else {
        0.0
    };
    let p_dd: f64 = if want_disp {
        net.generators
            .iter()
            .filter(|g| g.online && g.is_load())
            .map(|g| if nominal { -g.p_min } else { -g.p })
            .sum()
    } else {
        0.0
    };
    p_df + p_dd
}

/// Total real power output (MW) of the online generators, excluding
/// dispatchable loads.
pub fn total_generation(net: &Network) -> f64 {
    net.generators
        .iter()
        .filter(|g| g.online && !g.is_load())
        .map(|g| g.p)
        .sum()
}

/// Total real power losses (MW) in the online branches, from the flows
/// written by the last solve.
pub fn total_losses(net: &Network) -> f64 {
    net.branches
        .iter()
        .filter(|br| br.online)
        .map(|br| br.p_source + br.p_target)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{Branch, Bus, Generator, Load};
    use anyhow::{format_err, Result};

    #[test]
    fn test_totals() -> Result<()> {
        let mut net = Network::new("totals", 100.0);
        net.add_bus(Bus::default());
        net.add_load(Load {
            p: 80.0,
            ..Default::default()
        });
        net.add_load(Load {
            p: 15.0,
            online: false,
            ..Default::default()
        });
        net.add_generator(Generator {
            p: 60.0,
            ..Default::default()
        });
        net.add_generator(Generator {
            p: -12.0,
            p_min: -20.0,
            p_max: 0.0,
            ..Default::default()
        });
        net.add_branch(Branch {
            p_source: 30.0,
            p_target: -29.5,
            ..Default::default()
        });

        let cases = [
            (LoadType::Fixed, true, 80.0),
            (LoadType::Dispatchable, true, 20.0),
            (LoadType::Dispatchable, false, 12.0),
            (LoadType::Both, true, 100.0),
        ];
        for (load_type, nominal, want) in cases {
            let got = total_load(&net, load_type, nominal);
            if (got - want).abs() > 1e-12 {
                return Err(format_err!("{:?} load {} != {}", load_type, got, want));
            }
        }
        if total_generation(&net) != 60.0 || (total_losses(&net) - 0.5).abs() > 1e-12 {
            return Err(format_err!(
                "generation {} losses {}",
                total_generation(&net),
                total_losses(&net)
            ));
        }
        Ok(())
    }
}
