//! Named-dimension datasets.
//!
//! Fetched result arrays are assembled into a [`Dataset`]: variables over
//! named dimensions with coordinate vectors, supporting the selection and
//! reduction the analysis code needs (per-qubit slices, averaging over a
//! sequence axis, standard deviations). The first dimension is always the
//! qubit (or pair) axis; the sweep axes follow outermost to innermost.

use std::collections::BTreeMap;

use ndarray::{ArrayD, Axis};

use crate::error::{FitError, FitResult};

/// Coordinate values along one dimension.
#[derive(Debug, Clone, PartialEq)]
pub enum Coord {
    /// String labels (the qubit axis).
    Labels(Vec<String>),
    /// Numeric coordinates (sweep axes).
    Values(Vec<f64>),
}

impl Coord {
    /// Number of coordinates.
    pub fn len(&self) -> usize {
        match self {
            Coord::Labels(l) => l.len(),
            Coord::Values(v) => v.len(),
        }
    }

    /// True when the coordinate list is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Numeric values, if this is a numeric coordinate.
    pub fn values(&self) -> Option<&[f64]> {
        match self {
            Coord::Values(v) => Some(v),
            Coord::Labels(_) => None,
        }
    }
}

/// Variables over shared named dimensions.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    dims: Vec<String>,
    coords: BTreeMap<String, Coord>,
    vars: BTreeMap<String, ArrayD<f64>>,
}

impl Dataset {
    /// Create an empty dataset over the given dimensions.
    pub fn new(dims: Vec<(String, Coord)>) -> Self {
        let order = dims.iter().map(|(n, _)| n.clone()).collect();
        let coords = dims.into_iter().collect();
        Self {
            dims: order,
            coords,
            vars: BTreeMap::new(),
        }
    }

    /// Assemble per-qubit numbered streams into variables.
    ///
    /// Streams named `state1`, `state2`, ... (any base name followed by a
    /// 1-based index) are stacked into a variable `state` with dimensions
    /// `[qubit, axes...]`. Unnumbered streams (progress counters) are
    /// skipped. Every fetched array must match the axis lengths.
    pub fn assemble(
        results: &BTreeMap<String, ArrayD<f64>>,
        qubits: &[String],
        axes: &[(String, Vec<f64>)],
    ) -> FitResult<Self> {
        let mut dims = vec![(
            "qubit".to_string(),
            Coord::Labels(qubits.to_vec()),
        )];
        for (name, values) in axes {
            dims.push((name.clone(), Coord::Values(values.clone())));
        }
        let mut ds = Dataset::new(dims);

        let want: Vec<usize> = axes.iter().map(|(_, v)| v.len()).collect();
        let mut grouped: BTreeMap<String, Vec<(usize, &ArrayD<f64>)>> = BTreeMap::new();
        for (name, array) in results {
            let Some((base, index)) = split_numbered(name) else {
                continue;
            };
            if index == 0 || index > qubits.len() {
                return Err(FitError::StreamIndex(name.clone()));
            }
            grouped.entry(base).or_default().push((index - 1, array));
        }

        for (base, mut members) in grouped {
            members.sort_by_key(|(i, _)| *i);
            if members.len() != qubits.len()
                || members.iter().enumerate().any(|(k, (i, _))| *i != k)
            {
                return Err(FitError::StreamCount {
                    name: base,
                    got: members.len(),
                    want: qubits.len(),
                });
            }
            let mut data = Vec::new();
            for (_, array) in &members {
                let got: Vec<usize> = array.shape().to_vec();
                // Scalars fetched as [1] count as matching empty axes.
                let matches = got == want || (want.is_empty() && array.len() == 1);
                if !matches {
                    return Err(FitError::AssemblyShape {
                        name: base.clone(),
                        got,
                        want: want.clone(),
                    });
                }
                data.extend(array.iter().copied());
            }
            let mut shape = vec![members.len()];
            shape.extend(&want);
            let stacked = ArrayD::from_shape_vec(shape, data).expect("stacked shape");
            ds.vars.insert(base, stacked);
        }
        Ok(ds)
    }

    /// Dimension names, in axis order.
    pub fn dims(&self) -> &[String] {
        &self.dims
    }

    /// Coordinate vector of a dimension.
    pub fn coord(&self, dim: &str) -> FitResult<&Coord> {
        self.coords
            .get(dim)
            .ok_or_else(|| FitError::UnknownDim(dim.to_string()))
    }

    /// Numeric coordinate values of a dimension.
    pub fn coord_values(&self, dim: &str) -> FitResult<&[f64]> {
        self.coord(dim)?
            .values()
            .ok_or_else(|| FitError::UnknownDim(dim.to_string()))
    }

    /// Variable names.
    pub fn var_names(&self) -> Vec<&str> {
        self.vars.keys().map(String::as_str).collect()
    }

    /// Borrow a variable.
    pub fn var(&self, name: &str) -> FitResult<&ArrayD<f64>> {
        self.vars
            .get(name)
            .ok_or_else(|| FitError::UnknownVariable(name.to_string()))
    }

    /// Insert or replace a variable.
    ///
    /// The array must span all dataset dimensions.
    pub fn insert_var(&mut self, name: impl Into<String>, array: ArrayD<f64>) {
        self.vars.insert(name.into(), array);
    }

    fn dim_index(&self, dim: &str) -> FitResult<usize> {
        self.dims
            .iter()
            .position(|d| d == dim)
            .ok_or_else(|| FitError::UnknownDim(dim.to_string()))
    }

    /// Select one qubit by label, dropping the qubit axis.
    pub fn sel_qubit(&self, label: &str) -> FitResult<Dataset> {
        let Coord::Labels(labels) = self.coord("qubit")? else {
            return Err(FitError::UnknownDim("qubit".to_string()));
        };
        let index = labels
            .iter()
            .position(|l| l == label)
            .ok_or_else(|| FitError::UnknownLabel {
                dim: "qubit".to_string(),
                label: label.to_string(),
            })?;
        self.sel_index("qubit", index)
    }

    /// Select one index along a dimension, dropping it.
    pub fn sel_index(&self, dim: &str, index: usize) -> FitResult<Dataset> {
        let axis = self.dim_index(dim)?;
        let mut out = self.without_dim(dim);
        for (name, array) in &self.vars {
            out.vars
                .insert(name.clone(), array.index_axis(Axis(axis), index).to_owned());
        }
        Ok(out)
    }

    /// Mean over a dimension, dropping it.
    pub fn mean(&self, dim: &str) -> FitResult<Dataset> {
        let axis = self.dim_index(dim)?;
        let mut out = self.without_dim(dim);
        for (name, array) in &self.vars {
            out.vars.insert(
                name.clone(),
                array.mean_axis(Axis(axis)).expect("non-empty axis"),
            );
        }
        Ok(out)
    }

    /// Standard deviation over a dimension, dropping it.
    pub fn std(&self, dim: &str) -> FitResult<Dataset> {
        let axis = self.dim_index(dim)?;
        let mut out = self.without_dim(dim);
        for (name, array) in &self.vars {
            out.vars
                .insert(name.clone(), array.std_axis(Axis(axis), 0.0));
        }
        Ok(out)
    }

    /// Apply a scalar function to one variable in place.
    pub fn map_var(&mut self, name: &str, f: impl Fn(f64) -> f64) -> FitResult<()> {
        let array = self
            .vars
            .get_mut(name)
            .ok_or_else(|| FitError::UnknownVariable(name.to_string()))?;
        array.mapv_inplace(f);
        Ok(())
    }

    /// 1-D view of a variable in a fully reduced dataset.
    pub fn values_1d(&self, name: &str) -> FitResult<Vec<f64>> {
        Ok(self.var(name)?.iter().copied().collect())
    }

    fn without_dim(&self, dim: &str) -> Dataset {
        let dims: Vec<String> = self.dims.iter().filter(|d| *d != dim).cloned().collect();
        let coords = dims
            .iter()
            .map(|d| (d.clone(), self.coords[d].clone()))
            .collect();
        Dataset {
            dims,
            coords,
            vars: BTreeMap::new(),
        }
    }

    /// Serialize into a JSON value for run records.
    pub fn to_json(&self) -> serde_json::Value {
        let coords: serde_json::Map<String, serde_json::Value> = self
            .dims
            .iter()
            .map(|d| {
                let value = match &self.coords[d] {
                    Coord::Labels(l) => serde_json::json!(l),
                    Coord::Values(v) => serde_json::json!(v),
                };
                (d.clone(), value)
            })
            .collect();
        let vars: serde_json::Map<String, serde_json::Value> = self
            .vars
            .iter()
            .map(|(name, array)| {
                (
                    name.clone(),
                    serde_json::json!({
                        "shape": array.shape(),
                        "data": array.iter().copied().collect::<Vec<f64>>(),
                    }),
                )
            })
            .collect();
        serde_json::json!({
            "dims": self.dims,
            "coords": coords,
            "vars": vars,
        })
    }

    /// Rebuild from the JSON produced by [`Dataset::to_json`].
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        let dims: Vec<String> = serde_json::from_value(value.get("dims")?.clone()).ok()?;
        let mut coords = BTreeMap::new();
        for dim in &dims {
            let raw = value.get("coords")?.get(dim)?;
            let coord = if raw.as_array()?.first().is_some_and(|v| v.is_string()) {
                Coord::Labels(serde_json::from_value(raw.clone()).ok()?)
            } else {
                Coord::Values(serde_json::from_value(raw.clone()).ok()?)
            };
            coords.insert(dim.clone(), coord);
        }
        let mut vars = BTreeMap::new();
        for (name, entry) in value.get("vars")?.as_object()? {
            let shape: Vec<usize> = serde_json::from_value(entry.get("shape")?.clone()).ok()?;
            let data: Vec<f64> = serde_json::from_value(entry.get("data")?.clone()).ok()?;
            vars.insert(name.clone(), ArrayD::from_shape_vec(shape, data).ok()?);
        }
        Some(Self { dims, coords, vars })
    }
}

/// Split `state12` into `("state", 12)`.
fn split_numbered(name: &str) -> Option<(String, usize)> {
    let digits = name.chars().rev().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 || digits == name.len() {
        return None;
    }
    let (base, index) = name.split_at(name.len() - digits);
    Some((base.to_string(), index.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn results() -> BTreeMap<String, ArrayD<f64>> {
        let mut out = BTreeMap::new();
        out.insert(
            "state1".to_string(),
            ArrayD::from_shape_vec(vec![2, 3], vec![0.0, 0.1, 0.2, 0.3, 0.4, 0.5]).unwrap(),
        );
        out.insert(
            "state2".to_string(),
            ArrayD::from_shape_vec(vec![2, 3], vec![1.0, 1.1, 1.2, 1.3, 1.4, 1.5]).unwrap(),
        );
        out.insert(
            "n".to_string(),
            ArrayD::from_shape_vec(vec![1], vec![100.0]).unwrap(),
        );
        out
    }

    fn axes() -> Vec<(String, Vec<f64>)> {
        vec![
            ("sign".to_string(), vec![-1.0, 1.0]),
            ("idle_time".to_string(), vec![16.0, 32.0, 48.0]),
        ]
    }

    #[test]
    fn test_assemble_stacks_qubits() {
        let ds = Dataset::assemble(&results(), &["q1".into(), "q2".into()], &axes()).unwrap();
        assert_eq!(ds.dims(), &["qubit", "sign", "idle_time"]);
        let state = ds.var("state").unwrap();
        assert_eq!(state.shape(), &[2, 2, 3]);
        assert_eq!(state[[1, 0, 0]], 1.0);
        // Progress counter is not a variable.
        assert!(ds.var("n").is_err());
    }

    #[test]
    fn test_assemble_rejects_wrong_shape() {
        let mut bad = results();
        bad.insert(
            "state1".to_string(),
            ArrayD::from_shape_vec(vec![3, 2], vec![0.0; 6]).unwrap(),
        );
        let err = Dataset::assemble(&bad, &["q1".into(), "q2".into()], &axes()).unwrap_err();
        assert!(matches!(err, FitError::AssemblyShape { .. }));
    }

    #[test]
    fn test_assemble_rejects_stray_index() {
        let ds = Dataset::assemble(&results(), &["q1".into()], &axes());
        assert!(matches!(ds, Err(FitError::StreamIndex(_))));
    }

    #[test]
    fn test_assemble_rejects_missing_member() {
        let mut partial = results();
        partial.remove("state2");
        let ds = Dataset::assemble(&partial, &["q1".into(), "q2".into()], &axes());
        assert!(matches!(ds, Err(FitError::StreamCount { got: 1, .. })));
    }

    #[test]
    fn test_sel_qubit_drops_axis() {
        let ds = Dataset::assemble(&results(), &["q1".into(), "q2".into()], &axes()).unwrap();
        let q2 = ds.sel_qubit("q2").unwrap();
        assert_eq!(q2.dims(), &["sign", "idle_time"]);
        assert_eq!(q2.var("state").unwrap()[[0, 2]], 1.2);
        assert!(ds.sel_qubit("q9").is_err());
    }

    #[test]
    fn test_mean_and_std() {
        let ds = Dataset::assemble(&results(), &["q1".into(), "q2".into()], &axes()).unwrap();
        let mean = ds.mean("sign").unwrap();
        assert_eq!(mean.var("state").unwrap().shape(), &[2, 3]);
        assert!((mean.var("state").unwrap()[[0, 0]] - 0.15).abs() < 1e-12);
        let std = ds.std("sign").unwrap();
        assert!((std.var("state").unwrap()[[0, 0]] - 0.15).abs() < 1e-12);
    }

    #[test]
    fn test_split_numbered() {
        assert_eq!(split_numbered("state12"), Some(("state".to_string(), 12)));
        assert_eq!(split_numbered("adcI1"), Some(("adcI".to_string(), 1)));
        assert_eq!(split_numbered("n"), None);
        assert_eq!(split_numbered("123"), None);
    }

    #[test]
    fn test_json_roundtrip() {
        let ds = Dataset::assemble(&results(), &["q1".into(), "q2".into()], &axes()).unwrap();
        let json = ds.to_json();
        let back = Dataset::from_json(&json).unwrap();
        assert_eq!(back, ds);
    }
}
