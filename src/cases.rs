use crate::network::{Branch, Bus, CostModel, Generator, Load, Network};

/// Three buses in a triangle on a 100 MVA base. A cheap unit at the slack
/// bus, a mid-merit unit with a 50 MW minimum output at bus 2 and a
/// 120 MW load at bus 3.
pub fn case3() -> Network {
    let mut net = Network::new("case3", 100.0);
    for id in 1..=3 {
        net.add_bus(Bus {
            id,
            name: format!("Bus {}", id),
            slack: id == 1,
            ..Default::default()
        });
    }
    for (source, target) in [(0, 1), (0, 2), (1, 2)] {
        net.add_branch(Branch {
            name: format!("{}-{}", source + 1, target + 1),
            source,
            target,
            r: 0.01,
            x: 0.1,
            ..Default::default()
        });
    }
    net.add_generator(Generator {
        name: "G1".to_string(),
        bus: 0,
        p: 70.0,
        p_min: 0.0,
        p_max: 200.0,
        q_min: -100.0,
        q_max: 100.0,
        cost: CostModel::Polynomial(vec![10.0, 0.0]),
        ..Default::default()
    });
    net.add_generator(Generator {
        name: "G2".to_string(),
        bus: 1,
        p: 50.0,
        p_min: 50.0,
        p_max: 100.0,
        q_min: -100.0,
        q_max: 100.0,
        cost: CostModel::Polynomial(vec![20.0, 0.0]),
        ..Default::default()
    });
    net.add_load(Load {
        name: "L3".to_string(),
        bus: 2,
        p: 120.0,
        q: 20.0,
        ..Default::default()
    });
    net
}

/// PJM 5-bus system with linear generator costs.
pub fn case5() -> Network {
    let mut net = Network::new("case5", 100.0);
    for id in 1..=5 {
        net.add_bus(Bus {
            id,
            name: format!("Bus {}", id),
            slack: id == 4,
            ..Default::default()
        });
    }

    let branches = [
        (0, 1, 0.00281, 0.0281, 0.00712, 400.0),
        (0, 3, 0.00304, 0.0304, 0.00658, 0.0),
        (0, 4, 0.00064, 0.0064, 0.03126, 0.0),
        (1, 2, 0.00108, 0.0108, 0.01852, 0.0),
        (2, 3, 0.00297, 0.0297, 0.00674, 0.0),
        (3, 4, 0.00297, 0.0297, 0.00674, 240.0),
    ];
    for (source, target, r, x, b, s_max) in branches {
        net.add_branch(Branch {
            name: format!("{}-{}", source + 1, target + 1),
            source,
            target,
            r,
            x,
            b,
            s_max,
            ..Default::default()
        });
    }

    // bus, p, q limit, p_max, cost
    let gens = [
        (0, 40.0, 30.0, 40.0, 14.0),
        (0, 170.0, 127.5, 170.0, 15.0),
        (2, 323.49, 390.0, 520.0, 30.0),
        (3, 0.0, 150.0, 200.0, 40.0),
        (4, 466.51, 450.0, 600.0, 10.0),
    ];
    for (n, (bus, p, q_lim, p_max, c1)) in gens.into_iter().enumerate() {
        net.add_generator(Generator {
            name: format!("G{}", n + 1),
            bus,
            p,
            p_max,
            q_min: -q_lim,
            q_max: q_lim,
            cost: CostModel::Polynomial(vec![c1, 0.0]),
            ..Default::default()
        });
    }

    for (bus, p, q) in [(1, 300.0, 98.61), (2, 300.0, 98.61), (3, 400.0, 131.47)] {
        net.add_load(Load {
            name: format!("L{}", bus + 1),
            bus,
            p,
            q,
            ..Default::default()
        });
    }
    net
}
