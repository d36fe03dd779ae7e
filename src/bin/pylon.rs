use anyhow::{format_err, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use pylon::debug::format_summary;
use pylon::{
    cases, solve_opf, solve_power_flow, solve_unit_commitment, Alg, Formulation, GenQLimits,
    Network, Options,
};
use spsolve::rlu::RLU;

/// Power flow, optimal power flow and unit decommitment.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Power Flow
    #[clap(name = "pf")]
    PowerFlow(SolveArgs),

    /// Optimal Power Flow
    #[clap(name = "opf")]
    OPF(SolveArgs),

    /// Unit Decommitment with Optimal Power Flow
    #[clap(name = "uc")]
    UC(SolveArgs),
}

#[derive(Copy, Clone, ValueEnum)]
enum Case {
    Case3,
    Case5,
}

#[derive(Args)]
struct SolveArgs {
    /// Built-in network.
    #[arg(value_enum, default_value_t = Case::Case3)]
    case: Case,

    /// Linearized DC formulation.
    #[arg(long, default_value_t = false)]
    pub dc: bool,

    /// AC power flow algorithm.
    #[arg(long)]
    pub alg: Option<Alg>,

    /// Termination tolerance on per unit P & Q mismatch.
    #[arg(long)]
    pub tol: Option<f64>,

    /// Maximum number of iterations.
    #[arg(long)]
    pub max_it: Option<usize>,

    /// Enforce gen reactive power limits at expense of |V|.
    #[arg(long, default_value_t = false)]
    pub qlim: bool,

    /// Seed for breaking ties between shutdown candidates.
    #[arg(long)]
    pub seed: Option<u64>,
}

fn main() {
    env_logger::Builder::from_default_env()
        .format_level(false)
        .format_target(false)
        .format_timestamp(None)
        .init();

    let cli = Cli::parse();

    match execute(&cli) {
        Ok(_) => {
            std::process::exit(0);
        }
        Err(err) => {
            eprintln!("error: {}", err);
            std::process::exit(2);
        }
    }
}

fn options(args: &SolveArgs) -> Options {
    let mut opt = Options::default();
    if let Some(alg) = args.alg {
        opt.pf.algorithm = alg;
    }
    if let Some(tol) = args.tol {
        opt.pf.tolerance = tol;
    }
    if let Some(max_it) = args.max_it {
        match opt.pf.algorithm {
            Alg::NR => opt.pf.max_it_nr = max_it,
            Alg::FDXB | Alg::FDBX => opt.pf.max_it_fd = max_it,
        }
        opt.opf.max_it = max_it;
    }
    opt.pf.enforce_q_limits = if args.qlim {
        GenQLimits::OneAtATime
    } else {
        GenQLimits::IgnoreLimits
    };
    opt.uc.seed = args.seed;
    opt
}

fn execute(cli: &Cli) -> Result<()> {
    let args = match &cli.command {
        Commands::PowerFlow(args) | Commands::OPF(args) | Commands::UC(args) => args,
    };
    let mut net: Network = match args.case {
        Case::Case3 => cases::case3(),
        Case::Case5 => cases::case5(),
    };
    let formulation = if args.dc {
        Formulation::DC
    } else {
        Formulation::AC
    };
    let opt = options(args);
    let solver = RLU::default();

    match &cli.command {
        Commands::PowerFlow(_) => {
            let s = solve_power_flow(&mut net, formulation, &opt, &solver)?;
            if !s.converged {
                return Err(format_err!(
                    "power flow did not converge in {} iterations (mismatch {:e})",
                    s.iterations,
                    s.residual
                ));
            }
            println!("Converged in {} iterations, {:?}.", s.iterations, s.elapsed);
        }
        Commands::OPF(_) => {
            let s = solve_opf(&mut net, formulation, &opt, &solver)?;
            if !s.converged {
                return Err(format_err!(
                    "OPF did not converge in {} iterations",
                    s.iterations
                ));
            }
            println!("Objective {:.4} $/hr, {} iterations.", s.objective, s.iterations);
        }
        Commands::UC(_) => {
            let s = solve_unit_commitment(&mut net, formulation, &opt, &solver)?;
            println!(
                "Objective {:.4} $/hr after {} stages, {:?}.",
                s.objective, s.stages, s.elapsed
            );
        }
    }
    print!("{}", format_summary(&net));

    Ok(())
}
