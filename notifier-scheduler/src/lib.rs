pub mod poller;
pub mod sweeps;

pub use poller::{run, run_once};
pub use sweeps::{SweepReport, Sweeper};
