pub mod basic;
pub mod error;
pub mod testcases;
pub mod prelude {
    use crate::basic;
    pub use basic::config::{Integration, PfSolver, PowerFlowSettings, Routine, Settings, TimeDomainSettings};
    pub use basic::elements::*;
    pub use basic::model::{BranchFlow, Device, Model};
    pub use basic::powerflow::{BusSolution, PowerFlowReport};
    pub use basic::system::PowerSystem;
    pub use basic::timedomain::TimeDomainReport;
    pub use basic::varout::{CsvSink, MemorySink, NameTable, Sink};

    pub use crate::error::{SolveError, SolveResult};
}
