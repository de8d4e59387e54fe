use tracing::warn;

use crate::basic::config::TimeDomainSettings;

/// Step size bounds and the adaptation rule applied after each step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepControl {
    pub h: f64,
    pub hmin: f64,
    pub hmax: f64,
    /// Upper bound in fixed step mode.
    pub fixed: Option<f64>,
    slow: usize,
    fast: usize,
    shrink: f64,
    grow: f64,
}

impl StepControl {
    /// Initial step from the dominant frequency `freq` (Hz-like, 1/s) of the
    /// linearized system and the simulated `span`.
    pub fn first_step(freq: f64, span: f64, td: &TimeDomainSettings) -> Self {
        let tcycle = 1.0 / freq;
        let mut hmax = (5.0 * tcycle).min(span / 100.0);
        let mut h = tcycle.min(span / 100.0);
        let mut hmin = (tcycle / 64.0).min(hmax / 20.0);

        let fixed = match (td.fixt, td.tstep > 0.0) {
            (true, true) => Some(td.tstep),
            (true, false) => {
                warn!("fixed step requested with tstep = {}, using adaptive steps", td.tstep);
                None
            }
            _ => None,
        };
        if let Some(tstep) = fixed {
            h = tstep;
            hmax = tstep;
            hmin = hmin.min(tstep);
        }
        Self {
            h,
            hmin,
            hmax,
            fixed,
            slow: td.slow_iterations,
            fast: td.fast_iterations,
            shrink: td.shrink,
            grow: td.grow,
        }
    }

    /// Adapts `h` after a converged step that took `niter` iterations.
    pub fn on_converged(&mut self, niter: usize) {
        if niter >= self.slow {
            self.h *= self.shrink;
        } else if niter <= self.fast {
            self.h *= self.grow;
        }
        self.h = self.h.clamp(self.hmin, self.hmax);
        if let Some(tstep) = self.fixed {
            self.h = self.h.min(tstep);
        }
    }

    /// Halves `h` after a rejected step. False once `h` drops below `hmin`.
    pub fn on_diverged(&mut self) -> bool {
        self.h *= 0.5;
        self.h >= self.hmin
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn control() -> StepControl {
        // 1 Hz dominant mode over 20 s
        StepControl::first_step(1.0, 20.0, &TimeDomainSettings::default())
    }

    #[test]
    fn first_step_bounds() {
        let c = control();
        assert_eq!(c.hmax, 0.2);
        assert_eq!(c.h, 0.2);
        assert_eq!(c.hmin, 0.01);
        assert!(c.fixed.is_none());
    }

    #[test]
    fn slow_steps_shrink_fast_steps_grow() {
        let mut c = control();
        c.h = 0.1;
        c.on_converged(15);
        assert!((c.h - 0.09).abs() < 1e-12);
        c.on_converged(10);
        assert!((c.h - 0.108).abs() < 1e-12);
        c.on_converged(12);
        assert!((c.h - 0.108).abs() < 1e-12);
    }

    #[test]
    fn growth_is_clamped() {
        let mut c = control();
        for _ in 0..50 {
            c.on_converged(1);
        }
        assert_eq!(c.h, c.hmax);
        for _ in 0..200 {
            c.on_converged(20);
        }
        assert_eq!(c.h, c.hmin);
    }

    #[test]
    fn halving_underflows() {
        let mut c = control();
        c.h = 0.015;
        assert!(!c.on_diverged());
        c.h = 0.05;
        assert!(c.on_diverged());
        assert_eq!(c.h, 0.025);
    }

    #[test]
    fn fixed_step_caps_growth() {
        let td = TimeDomainSettings {
            fixt: true,
            tstep: 0.01,
            ..Default::default()
        };
        let mut c = StepControl::first_step(1.0, 20.0, &td);
        assert_eq!(c.h, 0.01);
        c.on_converged(1);
        assert_eq!(c.h, 0.01);

        let td = TimeDomainSettings {
            fixt: true,
            tstep: 0.0,
            ..Default::default()
        };
        assert!(StepControl::first_step(1.0, 20.0, &td).fixed.is_none());
    }
}
