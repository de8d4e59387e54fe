//! Column naming and time series output.

use std::io::Write;

use nalgebra::DVector;

use super::model::Model;
use crate::error::SolveResult;

/// Column names of `x` and `y`, formatted as `"<var> <element>"`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct NameTable {
    pub x: Vec<String>,
    pub y: Vec<String>,
}

impl NameTable {
    /// Collects names from addressed models.
    pub fn build(models: &[Box<dyn Model>], n: usize, m: usize) -> Self {
        let mut x = vec![String::new(); n];
        let mut y = vec![String::new(); m];
        for model in models {
            let Some(addr) = model.addresses() else {
                continue;
            };
            let elements = model.element_names();
            for (k, var) in model.states().iter().enumerate() {
                for (slot, el) in addr.x_range(k).zip(&elements) {
                    x[slot] = format!("{var} {el}");
                }
            }
            for (k, var) in model.algebs().iter().enumerate() {
                for (slot, el) in addr.y_range(k).zip(&elements) {
                    y[slot] = format!("{var} {el}");
                }
            }
        }
        Self { x, y }
    }

    pub fn len(&self) -> usize {
        self.x.len() + self.y.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Receives the time series of a simulation.
pub trait Sink {
    /// Called once after addressing, before the first sample.
    fn open(&mut self, names: &NameTable) -> SolveResult<()>;
    fn store(&mut self, t: f64, x: &DVector<f64>, y: &DVector<f64>) -> SolveResult<()>;
    fn finish(&mut self) -> SolveResult<()> {
        Ok(())
    }
}

/// Keeps every sample in memory.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    pub names: NameTable,
    pub t: Vec<f64>,
    pub x: Vec<DVector<f64>>,
    pub y: Vec<DVector<f64>>,
}

impl MemorySink {
    pub fn len(&self) -> usize {
        self.t.len()
    }

    pub fn is_empty(&self) -> bool {
        self.t.is_empty()
    }

    /// Time series of a named column, looked up in `x` then `y`.
    pub fn series(&self, name: &str) -> Option<Vec<f64>> {
        if let Some(k) = self.names.x.iter().position(|n| n == name) {
            return Some(self.x.iter().map(|x| x[k]).collect());
        }
        let k = self.names.y.iter().position(|n| n == name)?;
        Some(self.y.iter().map(|y| y[k]).collect())
    }
}

impl Sink for MemorySink {
    fn open(&mut self, names: &NameTable) -> SolveResult<()> {
        self.names = names.clone();
        self.t.clear();
        self.x.clear();
        self.y.clear();
        Ok(())
    }

    fn store(&mut self, t: f64, x: &DVector<f64>, y: &DVector<f64>) -> SolveResult<()> {
        self.t.push(t);
        self.x.push(x.clone());
        self.y.push(y.clone());
        Ok(())
    }
}

/// Writes one CSV row per sample: `t`, then `x`, then `y`.
pub struct CsvSink<W: Write> {
    writer: csv::Writer<W>,
    row: Vec<String>,
}

impl<W: Write> CsvSink<W> {
    pub fn new(inner: W) -> Self {
        Self {
            writer: csv::WriterBuilder::new().from_writer(inner),
            row: Vec::new(),
        }
    }

    pub fn into_inner(self) -> SolveResult<W> {
        self.writer
            .into_inner()
            .map_err(|e| std::io::Error::other(e.to_string()).into())
    }
}

impl CsvSink<std::fs::File> {
    pub fn create<P: AsRef<std::path::Path>>(path: P) -> SolveResult<Self> {
        Ok(Self::new(std::fs::File::create(path)?))
    }
}

impl<W: Write> Sink for CsvSink<W> {
    fn open(&mut self, names: &NameTable) -> SolveResult<()> {
        let header = std::iter::once("t")
            .chain(names.x.iter().map(String::as_str))
            .chain(names.y.iter().map(String::as_str));
        self.writer.write_record(header)?;
        Ok(())
    }

    fn store(&mut self, t: f64, x: &DVector<f64>, y: &DVector<f64>) -> SolveResult<()> {
        self.row.clear();
        self.row.push(t.to_string());
        self.row.extend(x.iter().chain(y.iter()).map(|v| v.to_string()));
        self.writer.write_record(&self.row)?;
        Ok(())
    }

    fn finish(&mut self) -> SolveResult<()> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names() -> NameTable {
        NameTable {
            x: vec!["delta Syn2_1".into()],
            y: vec!["theta Bus_1".into(), "vm Bus_1".into()],
        }
    }

    #[test]
    fn csv_rows_follow_header() {
        let mut sink = CsvSink::new(Vec::new());
        sink.open(&names()).unwrap();
        sink.store(0.0, &DVector::from_vec(vec![0.5]), &DVector::from_vec(vec![0.0, 1.0]))
            .unwrap();
        sink.finish().unwrap();
        let text = String::from_utf8(sink.into_inner().unwrap()).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("t,delta Syn2_1,theta Bus_1,vm Bus_1"));
        assert_eq!(lines.next(), Some("0,0.5,0,1"));
    }

    #[test]
    fn memory_series_lookup() {
        let mut sink = MemorySink::default();
        sink.open(&names()).unwrap();
        for k in 0..3 {
            let t = k as f64;
            sink.store(t, &DVector::from_vec(vec![t]), &DVector::from_vec(vec![0.0, 1.0 + t]))
                .unwrap();
        }
        assert_eq!(sink.series("vm Bus_1"), Some(vec![1.0, 2.0, 3.0]));
        assert_eq!(sink.series("delta Syn2_1"), Some(vec![0.0, 1.0, 2.0]));
        assert!(sink.series("omega Syn2_1").is_none());
    }
}
