use crate::error::Result;
use crate::network::Network;

/// Builds index lists for each type of bus (REF, PV, PQ).
///
/// A bus with an online generator is PV unless it is the slack bus or
/// flagged in `pq_forced`. Isolated buses belong to no list.
pub fn bus_types(
    net: &Network,
    isolated: &[bool],
    pq_forced: &[bool],
) -> Result<(usize, Vec<usize>, Vec<usize>)> {
    let refbus = net.slack_bus()?;

    let mut bus_gen_status = vec![false; net.buses.len()];
    for g in net.generators.iter().filter(|g| g.online) {
        bus_gen_status[g.bus] = true;
    }

    let (mut pv, mut pq) = (Vec::new(), Vec::new());
    for i in (0..net.buses.len()).filter(|&i| i != refbus && !isolated[i]) {
        if bus_gen_status[i] && !pq_forced[i] {
            pv.push(i);
        } else {
            pq.push(i);
        }
    }
    if !bus_gen_status[refbus] {
        log::warn!("slack bus {} has no online generator", net.buses[refbus].id);
    }

    Ok((refbus, pv, pq))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{Bus, Generator};
    use anyhow::{format_err, Result};

    #[test]
    fn test_bus_types() -> Result<()> {
        let mut net = Network::new("types", 100.0);
        for id in 1..=4 {
            net.add_bus(Bus {
                id,
                slack: id == 2,
                ..Default::default()
            });
        }
        for bus in [1, 2, 3] {
            net.add_generator(Generator {
                bus,
                ..Default::default()
            });
        }
        net.generators[2].online = false;

        let (refbus, pv, pq) = bus_types(&net, &[false; 4], &[false; 4])
            .map_err(|err| format_err!("{}", err))?;
        if refbus != 1 || pv != vec![2] || pq != vec![0, 3] {
            return Err(format_err!("ref {} pv {:?} pq {:?}", refbus, pv, pq));
        }

        let (_, pv, pq) = bus_types(&net, &[false, false, false, true], &[false, false, true, false])
            .map_err(|err| format_err!("{}", err))?;
        if !pv.is_empty() || pq != vec![0, 2] {
            return Err(format_err!("pv {:?} pq {:?}", pv, pq));
        }
        Ok(())
    }
}
