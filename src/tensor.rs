use anyhow::{bail, Result};
use std::collections::BTreeMap;

/// Coordinate-format sparse tensor with three modes.
///
/// Entries are kept in insertion order and may repeat a coordinate; every read
/// treats repeated coordinates as summed.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseTensor3 {
    shape: [usize; 3],
    coords: Vec<[usize; 3]>,
    data: Vec<f64>,
}

impl SparseTensor3 {
    pub fn new(shape: [usize; 3]) -> Self {
        SparseTensor3 {
            shape,
            coords: Vec::new(),
            data: Vec::new(),
        }
    }

    pub fn from_entries(shape: [usize; 3], coords: Vec<[usize; 3]>, data: Vec<f64>) -> Result<Self> {
        let mut tensor = SparseTensor3::new(shape);
        tensor.extend(coords, data)?;
        Ok(tensor)
    }

    pub fn push(&mut self, coord: [usize; 3], value: f64) -> Result<()> {
        for (mode, (&i, &dim)) in coord.iter().zip(self.shape.iter()).enumerate() {
            if i >= dim {
                bail!("Coordinate {coord:?} out of bounds for mode {mode} of shape {:?}", self.shape);
            }
        }
        self.coords.push(coord);
        self.data.push(value);
        Ok(())
    }

    pub fn extend(&mut self, coords: Vec<[usize; 3]>, data: Vec<f64>) -> Result<()> {
        if coords.len() != data.len() {
            bail!(
                "{} coordinates given for {} values",
                coords.len(),
                data.len()
            );
        }
        for (coord, value) in coords.into_iter().zip(data) {
            self.push(coord, value)?;
        }
        Ok(())
    }

    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }

    /// Number of stored entries, repeated coordinates included.
    pub fn nnz(&self) -> usize {
        self.coords.len()
    }

    pub fn coords(&self) -> &[[usize; 3]] {
        &self.coords
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn entries(&self) -> impl Iterator<Item = ([usize; 3], f64)> + '_ {
        self.coords.iter().copied().zip(self.data.iter().copied())
    }

    pub fn get(&self, coord: [usize; 3]) -> f64 {
        self.entries()
            .filter(|(c, _)| *c == coord)
            .map(|(_, v)| v)
            .sum()
    }

    /// Entries with repeated coordinates summed, in lexicographic coordinate order.
    pub fn canonical_entries(&self) -> Vec<([usize; 3], f64)> {
        let mut merged: BTreeMap<[usize; 3], f64> = BTreeMap::new();
        for (coord, value) in self.entries() {
            *merged.entry(coord).or_insert(0.) += value;
        }
        merged.into_iter().collect()
    }

    pub fn frobenius_norm(&self) -> f64 {
        self.canonical_entries()
            .iter()
            .map(|(_, v)| v * v)
            .sum::<f64>()
            .sqrt()
    }
}
