pub mod address;
pub mod config;
pub mod dae;
pub mod dispatch;
pub mod elements;
pub mod model;
pub mod powerflow;
pub mod solver;
pub mod sparse;
pub mod system;
pub mod timedomain;
pub mod topology;
pub mod varout;
