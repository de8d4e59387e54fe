use nalgebra_sparse::{CooMatrix, CscMatrix};

/// Triplet accumulator for Jacobian blocks.
///
/// Duplicate entries are summed on conversion. Zeroed entries stay in the
/// pattern, so a block built by the same sequence of pushes always converts
/// to the same sparsity structure.
#[derive(Debug, Clone, PartialEq)]
pub struct TripletMatrix {
    nrows: usize,
    ncols: usize,
    rows: Vec<usize>,
    cols: Vec<usize>,
    vals: Vec<f64>,
}

impl TripletMatrix {
    pub fn new(nrows: usize, ncols: usize) -> Self {
        Self {
            nrows,
            ncols,
            rows: Vec::new(),
            cols: Vec::new(),
            vals: Vec::new(),
        }
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn nnz(&self) -> usize {
        self.vals.len()
    }

    #[inline]
    pub fn push(&mut self, row: usize, col: usize, val: f64) {
        debug_assert!(row < self.nrows && col < self.ncols, "triplet out of bounds");
        self.rows.push(row);
        self.cols.push(col);
        self.vals.push(val);
    }

    /// Drops every entry, keeping the shape.
    pub fn clear(&mut self) {
        self.rows.clear();
        self.cols.clear();
        self.vals.clear();
    }

    /// Replaces the content with a copy of `other`.
    pub fn copy_from(&mut self, other: &TripletMatrix) {
        debug_assert_eq!((self.nrows, self.ncols), (other.nrows, other.ncols));
        self.rows.clone_from(&other.rows);
        self.cols.clone_from(&other.cols);
        self.vals.clone_from(&other.vals);
    }

    /// Appends `scale * other` shifted by `(row_off, col_off)`.
    pub fn extend_scaled(&mut self, other: &TripletMatrix, scale: f64, row_off: usize, col_off: usize) {
        debug_assert!(row_off + other.nrows <= self.nrows && col_off + other.ncols <= self.ncols);
        self.rows.extend(other.rows.iter().map(|r| r + row_off));
        self.cols.extend(other.cols.iter().map(|c| c + col_off));
        self.vals.extend(other.vals.iter().map(|v| v * scale));
    }

    /// Sum of every entry stored at `(row, col)`.
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.iter()
            .filter(|&(r, c, _)| r == row && c == col)
            .map(|(_, _, v)| v)
            .sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        self.rows
            .iter()
            .zip(&self.cols)
            .zip(&self.vals)
            .map(|((&r, &c), &v)| (r, c, v))
    }

    /// Zeroes every entry whose row is flagged in `mask`.
    pub fn zero_rows(&mut self, mask: &[bool]) {
        for (r, v) in self.rows.iter().zip(self.vals.iter_mut()) {
            if mask[*r] {
                *v = 0.0;
            }
        }
    }

    /// Zeroes every entry whose column is flagged in `mask`.
    pub fn zero_cols(&mut self, mask: &[bool]) {
        for (c, v) in self.cols.iter().zip(self.vals.iter_mut()) {
            if mask[*c] {
                *v = 0.0;
            }
        }
    }

    /// Clears the flagged rows and columns of a square block and puts `diag`
    /// on their diagonal.
    pub fn neutralize(&mut self, mask: &[bool], diag: f64) {
        debug_assert_eq!(self.nrows, self.ncols);
        for ((r, c), v) in self.rows.iter().zip(&self.cols).zip(self.vals.iter_mut()) {
            if mask[*r] || mask[*c] {
                *v = 0.0;
            }
        }
        for (i, _) in mask.iter().enumerate().filter(|(_, m)| **m) {
            self.push(i, i, diag);
        }
    }

    pub fn to_csc(&self) -> CscMatrix<f64> {
        let mut coo = CooMatrix::new(self.nrows, self.ncols);
        for (r, c, v) in self.iter() {
            coo.push(r, c, v);
        }
        CscMatrix::from(&coo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicates_are_summed() {
        let mut t = TripletMatrix::new(2, 2);
        t.push(0, 0, 1.0);
        t.push(0, 0, 2.5);
        t.push(1, 0, -1.0);
        let csc = t.to_csc();
        assert_eq!(csc.nnz(), 2);
        assert_eq!(t.get(0, 0), 3.5);
    }

    #[test]
    fn zeroed_entries_keep_pattern() {
        let mut t = TripletMatrix::new(3, 3);
        t.push(0, 1, 4.0);
        t.push(1, 1, 2.0);
        t.push(2, 2, 1.0);
        let before = t.to_csc();
        t.zero_rows(&[true, false, false]);
        let after = t.to_csc();
        assert_eq!(before.pattern(), after.pattern());
        assert_eq!(t.get(0, 1), 0.0);
    }

    #[test]
    fn neutralize_leaves_only_diagonal() {
        let mut t = TripletMatrix::new(3, 3);
        t.push(0, 1, 4.0);
        t.push(1, 0, 4.0);
        t.push(1, 2, 3.0);
        t.push(2, 2, 1.0);
        t.neutralize(&[false, true, false], 1e-6);
        assert_eq!(t.get(1, 1), 1e-6);
        assert_eq!(t.get(0, 1), 0.0);
        assert_eq!(t.get(1, 2), 0.0);
        assert_eq!(t.get(2, 2), 1.0);
    }

    #[test]
    fn extend_with_offsets() {
        let mut a = TripletMatrix::new(1, 1);
        a.push(0, 0, 2.0);
        let mut big = TripletMatrix::new(3, 3);
        big.extend_scaled(&a, -0.5, 2, 1);
        assert_eq!(big.get(2, 1), -1.0);
    }
}
