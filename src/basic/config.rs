use std::{path::Path, str::FromStr};

use derive_more::Display;

use crate::error::{SolveError, SolveResult};

/// Power flow algorithm.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Display)]
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PfSolver {
    #[default]
    #[display("NR")]
    Newton,
    #[display("FDXB")]
    FastDecoupledXB,
    #[display("FDBX")]
    FastDecoupledBX,
    #[display("FDPF")]
    FastDecoupled,
}

/// Which resistance the fast-decoupled B matrices drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdVariant {
    /// B' ignores resistance.
    XB,
    /// B'' ignores resistance.
    BX,
}

impl PfSolver {
    pub fn fd_variant(self) -> Option<FdVariant> {
        match self {
            PfSolver::Newton => None,
            PfSolver::FastDecoupledXB | PfSolver::FastDecoupled => Some(FdVariant::XB),
            PfSolver::FastDecoupledBX => Some(FdVariant::BX),
        }
    }
}

impl FromStr for PfSolver {
    type Err = SolveError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NR" | "NEWTON" => Ok(PfSolver::Newton),
            "FDXB" => Ok(PfSolver::FastDecoupledXB),
            "FDBX" => Ok(PfSolver::FastDecoupledBX),
            "FDPF" => Ok(PfSolver::FastDecoupled),
            other => Err(SolveError::Config {
                what: format!("unknown power flow solver `{other}`"),
            }),
        }
    }
}

impl TryFrom<String> for PfSolver {
    type Error = SolveError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PfSolver> for String {
    fn from(value: PfSolver) -> Self {
        value.to_string()
    }
}

/// Implicit integration rule, expressed through the θ weight.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Display)]
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Integration {
    #[display("euler")]
    ImplicitEuler,
    #[default]
    #[display("trapezoidal")]
    Trapezoidal,
}

impl Integration {
    pub fn theta(self) -> f64 {
        match self {
            Integration::ImplicitEuler => 1.0,
            Integration::Trapezoidal => 0.5,
        }
    }
}

impl FromStr for Integration {
    type Err = SolveError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "euler" | "implicit_euler" | "be" => Ok(Integration::ImplicitEuler),
            "trapezoidal" | "trap" | "tr" => Ok(Integration::Trapezoidal),
            other => Err(SolveError::Config {
                what: format!("unknown integration method `{other}`"),
            }),
        }
    }
}

impl TryFrom<String> for Integration {
    type Error = SolveError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Integration> for String {
    fn from(value: Integration) -> Self {
        value.to_string()
    }
}

/// Top level routine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Routine {
    #[display("power flow")]
    PowerFlow,
    #[display("time domain")]
    TimeDomain,
}

impl FromStr for Routine {
    type Err = SolveError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pf" | "powerflow" | "power_flow" => Ok(Routine::PowerFlow),
            "td" | "tds" | "timedomain" | "time_domain" => Ok(Routine::TimeDomain),
            other => Err(SolveError::Config {
                what: format!("unknown routine `{other}`"),
            }),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct PowerFlowSettings {
    pub solver: PfSolver,
    pub flatstart: bool,
    pub maxit: usize,
    pub tol: f64,
    /// Seed for the flat start angle perturbation.
    pub seed: u64,
}

impl Default for PowerFlowSettings {
    fn default() -> Self {
        Self {
            solver: PfSolver::Newton,
            flatstart: false,
            maxit: 100,
            tol: 1e-6,
            seed: 0,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct TimeDomainSettings {
    pub method: Integration,
    pub fixt: bool,
    pub tstep: f64,
    pub t0: f64,
    pub tf: f64,
    pub maxit: usize,
    pub tol: f64,
    /// Accepted steps needing at least this many iterations shrink `h`.
    pub slow_iterations: usize,
    /// Accepted steps needing at most this many iterations grow `h`.
    pub fast_iterations: usize,
    pub shrink: f64,
    pub grow: f64,
    /// Convert constant power loads to constant impedance before integrating.
    pub pq2z: bool,
}

impl Default for TimeDomainSettings {
    fn default() -> Self {
        Self {
            method: Integration::Trapezoidal,
            fixt: false,
            tstep: 1.0 / 30.0,
            t0: 0.0,
            tf: 20.0,
            maxit: 30,
            tol: 1e-4,
            slow_iterations: 15,
            fast_iterations: 10,
            shrink: 0.9,
            grow: 1.2,
            pq2z: true,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Nominal system frequency in Hz.
    pub freq: f64,
    /// System power base in MVA.
    pub mva: f64,
    pub pf: PowerFlowSettings,
    pub td: TimeDomainSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            freq: 60.0,
            mva: 100.0,
            pf: PowerFlowSettings::default(),
            td: TimeDomainSettings::default(),
        }
    }
}

impl Settings {
    pub fn from_json_str(s: &str) -> SolveResult<Self> {
        let settings: Settings = serde_json::from_str(s)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> SolveResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Base angular frequency in rad/s.
    pub fn wb(&self) -> f64 {
        2.0 * std::f64::consts::PI * self.freq
    }

    pub fn validate(&self) -> SolveResult<()> {
        let bad = |what: &str| {
            Err(SolveError::Config {
                what: what.to_string(),
            })
        };
        if self.freq <= 0.0 {
            return bad("freq must be positive");
        }
        if self.pf.maxit == 0 || self.td.maxit == 0 {
            return bad("maxit must be positive");
        }
        if self.pf.tol <= 0.0 || self.td.tol <= 0.0 {
            return bad("tol must be positive");
        }
        if self.td.tf <= self.td.t0 {
            return bad("tf must be greater than t0");
        }
        if !(0.0 < self.td.shrink && self.td.shrink < 1.0) || self.td.grow <= 1.0 {
            return bad("step shrink must lie in (0, 1) and grow above 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solver_names_are_case_insensitive() {
        assert_eq!("fdxb".parse::<PfSolver>().unwrap(), PfSolver::FastDecoupledXB);
        assert_eq!("Nr".parse::<PfSolver>().unwrap(), PfSolver::Newton);
        assert_eq!(PfSolver::FastDecoupled.fd_variant(), Some(FdVariant::XB));
        assert_eq!(PfSolver::FastDecoupledBX.fd_variant(), Some(FdVariant::BX));
        assert!("gauss".parse::<PfSolver>().is_err());
    }

    #[test]
    fn routine_aliases() {
        assert_eq!("TD".parse::<Routine>().unwrap(), Routine::TimeDomain);
        assert_eq!(" pf ".parse::<Routine>().unwrap(), Routine::PowerFlow);
        assert!("cpf".parse::<Routine>().is_err());
    }

    #[test]
    fn json_with_partial_fields() {
        let s = Settings::from_json_str(
            r#"{"pf": {"solver": "fdbx", "flatstart": true}, "td": {"method": "Euler", "tf": 2.0}}"#,
        )
        .unwrap();
        assert_eq!(s.pf.solver, PfSolver::FastDecoupledBX);
        assert!(s.pf.flatstart);
        assert_eq!(s.pf.maxit, 100);
        assert_eq!(s.td.method, Integration::ImplicitEuler);
        assert_eq!(s.td.method.theta(), 1.0);
        assert_eq!(s.td.tf, 2.0);
    }

    #[test]
    fn invalid_settings_rejected() {
        let r = Settings::from_json_str(r#"{"td": {"t0": 1.0, "tf": 1.0}}"#);
        assert!(matches!(r, Err(SolveError::Config { .. })));
        let r = Settings::from_json_str(r#"{"pf": {"solver": "bogus"}}"#);
        assert!(matches!(r, Err(SolveError::Json(_))));
    }
}
