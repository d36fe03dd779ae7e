mod acopf;
mod bus_types;
mod dc;
mod dcopf;
mod error;
mod fd;
mod ipm;
mod math;
mod network;
mod newton;
mod opf;
mod options;
mod pf;
mod sbus;
mod traits;
mod uopf;
mod ybus;

pub mod cases;
pub mod debug;
pub mod total_load;

#[cfg(test)]
mod tests;

pub use bus_types::*;
pub use dc::*;
pub use error::*;
pub use ipm::*;
pub use network::*;
pub use newton::{LogProgress, ProgressMonitor};
pub use opf::{solve_opf, OpfSolution};
pub use options::*;
pub use pf::*;
pub use sbus::*;
pub use traits::*;
pub use uopf::*;
pub use ybus::*;
