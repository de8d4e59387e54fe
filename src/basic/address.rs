use std::ops::Range;

use crate::error::AddressingError;

/// Global offsets owned by one model.
///
/// Variable `k` of element `i` lives at `base + k * count + i`, so each
/// variable occupies a contiguous run across the model's elements.
#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Addresses {
    pub count: usize,
    pub nx: usize,
    pub ny: usize,
    pub x_base: usize,
    pub y_base: usize,
}

impl Addresses {
    #[inline]
    pub fn x(&self, var: usize, element: usize) -> usize {
        debug_assert!(var < self.nx && element < self.count);
        self.x_base + var * self.count + element
    }

    #[inline]
    pub fn y(&self, var: usize, element: usize) -> usize {
        debug_assert!(var < self.ny && element < self.count);
        self.y_base + var * self.count + element
    }

    pub fn x_range(&self, var: usize) -> Range<usize> {
        let start = self.x_base + var * self.count;
        start..start + self.count
    }

    pub fn y_range(&self, var: usize) -> Range<usize> {
        let start = self.y_base + var * self.count;
        start..start + self.count
    }

    /// Every algebraic address of one element.
    pub fn element_y(&self, element: usize) -> impl Iterator<Item = usize> + '_ {
        (0..self.ny).map(move |k| self.y(k, element))
    }

    pub fn x_span(&self) -> Range<usize> {
        self.x_base..self.x_base + self.nx * self.count
    }

    pub fn y_span(&self) -> Range<usize> {
        self.y_base..self.y_base + self.ny * self.count
    }
}

/// Hands out global offsets into `x` and `y`, once per model.
#[derive(Debug, Default, Clone)]
pub struct VariableRegistry {
    n: usize,
    m: usize,
    assigned: Vec<(String, Addresses)>,
    frozen: bool,
}

impl VariableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves `count * nx` differential and `count * ny` algebraic slots.
    pub fn assign(
        &mut self,
        model: &str,
        count: usize,
        nx: usize,
        ny: usize,
    ) -> Result<Addresses, AddressingError> {
        if self.frozen {
            return Err(AddressingError::LateMutation {
                model: model.to_string(),
            });
        }
        if self.assigned.iter().any(|(name, _)| name == model) {
            return Err(AddressingError::Duplicate {
                model: model.to_string(),
            });
        }
        let addr = Addresses {
            count,
            nx,
            ny,
            x_base: self.n,
            y_base: self.m,
        };
        self.n += count * nx;
        self.m += count * ny;
        self.assigned.push((model.to_string(), addr.clone()));
        Ok(addr)
    }

    /// Ends the addressing phase and returns `(n, m)`.
    pub fn finalize(&mut self) -> (usize, usize) {
        self.frozen = true;
        (self.n, self.m)
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Fails once addressing is final; used to guard element edits.
    pub fn check_mutable(&self, model: &str) -> Result<(), AddressingError> {
        if self.frozen {
            Err(AddressingError::LateMutation {
                model: model.to_string(),
            })
        } else {
            Ok(())
        }
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn m(&self) -> usize {
        self.m
    }

    pub fn get(&self, model: &str) -> Option<&Addresses> {
        self.assigned
            .iter()
            .find(|(name, _)| name == model)
            .map(|(_, a)| a)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Addresses)> {
        self.assigned.iter().map(|(n, a)| (n.as_str(), a))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn bus_angles_then_magnitudes() {
        let mut reg = VariableRegistry::new();
        let bus = reg.assign("Bus", 4, 0, 2).unwrap();
        assert_eq!(bus.y_range(0), 0..4);
        assert_eq!(bus.y_range(1), 4..8);
        let syn = reg.assign("Syn2", 2, 2, 10).unwrap();
        assert_eq!(syn.x(1, 0), 2);
        assert_eq!(syn.y(0, 1), 9);
        assert_eq!(reg.finalize(), (4, 28));
    }

    #[test]
    fn second_assignment_is_rejected() {
        let mut reg = VariableRegistry::new();
        reg.assign("PQ", 3, 0, 0).unwrap();
        assert_eq!(
            reg.assign("PQ", 3, 0, 0),
            Err(AddressingError::Duplicate { model: "PQ".into() })
        );
    }

    #[test]
    fn frozen_registry_rejects_changes() {
        let mut reg = VariableRegistry::new();
        reg.assign("Bus", 1, 0, 2).unwrap();
        reg.finalize();
        assert!(matches!(
            reg.assign("Line", 1, 0, 0),
            Err(AddressingError::LateMutation { .. })
        ));
        assert!(reg.check_mutable("Bus").is_err());
    }

    proptest! {
        #[test]
        fn addresses_are_unique_and_dense(
            models in prop::collection::vec((0usize..20, 0usize..4, 0usize..6), 0..12)
        ) {
            let mut reg = VariableRegistry::new();
            let mut all = Vec::new();
            for (k, (count, nx, ny)) in models.iter().enumerate() {
                all.push(reg.assign(&format!("M{k}"), *count, *nx, *ny).unwrap());
            }
            let (n, m) = reg.finalize();
            let n_expected: usize = models.iter().map(|(c, nx, _)| c * nx).sum();
            let m_expected: usize = models.iter().map(|(c, _, ny)| c * ny).sum();
            prop_assert_eq!(n, n_expected);
            prop_assert_eq!(m, m_expected);

            let mut seen_x = vec![false; n];
            let mut seen_y = vec![false; m];
            for a in &all {
                for e in 0..a.count {
                    for k in 0..a.nx {
                        let i = a.x(k, e);
                        prop_assert!(i < n && !seen_x[i]);
                        seen_x[i] = true;
                    }
                    for k in 0..a.ny {
                        let i = a.y(k, e);
                        prop_assert!(i < m && !seen_y[i]);
                        seen_y[i] = true;
                    }
                }
            }
            prop_assert!(seen_x.iter().all(|&s| s));
            prop_assert!(seen_y.iter().all(|&s| s));
        }
    }
}
