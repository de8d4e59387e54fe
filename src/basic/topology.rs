use std::collections::BTreeSet;

use nalgebra_sparse::{CooMatrix, CsrMatrix};
use tracing::{debug, warn};

use crate::error::{SolveError, SolveResult};

/// Connectivity of the bus/branch graph.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Topology {
    pub n_bus: usize,
    pub reference: usize,
    /// Buses without any in-service branch, the reference bus excepted.
    pub isolated: BTreeSet<usize>,
    /// Multi-bus components that do not contain the reference bus.
    pub islands: Vec<BTreeSet<usize>>,
    /// Every connected component, including the anchored one.
    pub components: Vec<BTreeSet<usize>>,
}

impl Topology {
    pub fn is_degenerate(&self) -> bool {
        !self.isolated.is_empty() || !self.islands.is_empty()
    }

    /// Buses whose equations must be neutralized.
    pub fn neutralized_buses(&self) -> BTreeSet<usize> {
        let mut buses = self.isolated.clone();
        for island in &self.islands {
            buses.extend(island.iter().copied());
        }
        buses
    }
}

/// Finds connected components through the reachability closure of `I + A`.
///
/// `branches` holds in-service terminal pairs as internal bus indices.
pub fn analyze(n_bus: usize, branches: &[(usize, usize)], reference: usize) -> SolveResult<Topology> {
    if n_bus == 0 {
        return Ok(Topology::default());
    }
    if reference >= n_bus {
        return Err(SolveError::Topology {
            what: format!("reference bus {reference} is out of range for {n_bus} buses"),
        });
    }

    let mut degree = vec![0usize; n_bus];
    let mut coo = CooMatrix::new(n_bus, n_bus);
    for i in 0..n_bus {
        coo.push(i, i, 1.0);
    }
    for &(from, to) in branches {
        if from >= n_bus || to >= n_bus {
            return Err(SolveError::Topology {
                what: format!("branch ({from}, {to}) references a missing bus"),
            });
        }
        if from == to {
            continue;
        }
        degree[from] += 1;
        degree[to] += 1;
        coo.push(from, to, 1.0);
        coo.push(to, from, 1.0);
    }

    let mut reach = CsrMatrix::from(&coo);
    reach.values_mut().fill(1.0);
    let mut squarings = 0;
    loop {
        let mut next = &reach * &reach;
        next.values_mut().fill(1.0);
        squarings += 1;
        let stable = next.nnz() == reach.nnz();
        reach = next;
        if stable {
            break;
        }
    }

    let mut seen = vec![false; n_bus];
    let mut components = Vec::new();
    for i in 0..n_bus {
        if seen[i] {
            continue;
        }
        let row = reach.row(i);
        let comp: BTreeSet<usize> = row.col_indices().iter().copied().collect();
        for &b in &comp {
            seen[b] = true;
        }
        components.push(comp);
    }

    let isolated: BTreeSet<usize> = (0..n_bus)
        .filter(|&b| degree[b] == 0 && b != reference)
        .collect();
    let islands: Vec<BTreeSet<usize>> = components
        .iter()
        .filter(|c| c.len() > 1 && !c.contains(&reference))
        .cloned()
        .collect();

    debug!(
        "topology: {} components after {} squarings",
        components.len(),
        squarings
    );
    if !isolated.is_empty() {
        warn!("isolated buses: {:?}", isolated);
    }
    for island in &islands {
        warn!("island without reference bus: {:?}", island);
    }

    Ok(Topology {
        n_bus,
        reference,
        isolated,
        islands,
        components,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_component() {
        let topo = analyze(4, &[(0, 1), (1, 2), (2, 3)], 0).unwrap();
        assert_eq!(topo.components.len(), 1);
        assert!(!topo.is_degenerate());
    }

    #[test]
    fn unanchored_island_and_isolated_bus() {
        // 0-1-2 anchored, 3-4 floating, 5 alone
        let topo = analyze(6, &[(0, 1), (1, 2), (3, 4)], 0).unwrap();
        assert_eq!(topo.isolated, BTreeSet::from([5]));
        assert_eq!(topo.islands, vec![BTreeSet::from([3, 4])]);
        assert_eq!(topo.neutralized_buses(), BTreeSet::from([3, 4, 5]));
        assert_eq!(topo.components.len(), 3);
    }

    #[test]
    fn no_branches_every_bus_isolated() {
        let topo = analyze(3, &[], 1).unwrap();
        assert_eq!(topo.isolated, BTreeSet::from([0, 2]));
        assert!(topo.islands.is_empty());
        assert_eq!(topo.components.len(), 3);
    }

    #[test]
    fn long_chain_closes() {
        let branches: Vec<(usize, usize)> = (0..63).map(|i| (i, i + 1)).collect();
        let topo = analyze(64, &branches, 10).unwrap();
        assert_eq!(topo.components.len(), 1);
        assert_eq!(topo.components[0].len(), 64);
    }

    #[test]
    fn bad_reference_is_an_error() {
        assert!(matches!(
            analyze(2, &[(0, 1)], 2),
            Err(SolveError::Topology { .. })
        ));
        assert_eq!(analyze(0, &[], 0).unwrap(), Topology::default());
    }
}
