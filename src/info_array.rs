//! Axis-labelled N-dimensional results

use std::fmt;

use ndarray::{ArrayD, IxDyn};
use serde::Serialize;

use crate::RadsimError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InfoArray {
    data: ArrayD<f64>,
    axis_names: Vec<String>,
    axis_values: Vec<Vec<f64>>,
}

impl InfoArray {
    pub fn new(
        data: ArrayD<f64>,
        axis_names: Vec<String>,
        axis_values: Vec<Vec<f64>>,
    ) -> Result<Self, RadsimError> {
        if axis_names.len() != axis_values.len() || axis_names.len() != data.ndim() {
            return Err(RadsimError::InvalidInfoArray(format!(
                "{} axis names and {} coordinate vectors for a {}-dimensional array",
                axis_names.len(),
                axis_values.len(),
                data.ndim()
            )));
        }
        for ((name, values), &len) in axis_names.iter().zip(&axis_values).zip(data.shape()) {
            if values.len() != len {
                return Err(RadsimError::InvalidInfoArray(format!(
                    "axis '{name}' has {} coordinates but the data dimension is {len}",
                    values.len()
                )));
            }
        }
        Ok(Self {
            data,
            axis_names,
            axis_values,
        })
    }

    /// NaN-filled array shaped by the coordinate vectors
    pub fn nan(axis_names: Vec<String>, axis_values: Vec<Vec<f64>>) -> Result<Self, RadsimError> {
        let shape: Vec<usize> = axis_values.iter().map(Vec::len).collect();
        Self::new(ArrayD::from_elem(IxDyn(&shape), f64::NAN), axis_names, axis_values)
    }

    /// One-axis array from a trace of values
    pub fn from_trace(axis_name: String, axis_values: Vec<f64>, data: Vec<f64>) -> Result<Self, RadsimError> {
        let len = data.len();
        let data = ArrayD::from_shape_vec(IxDyn(&[len]), data)
            .map_err(|err| RadsimError::InvalidInfoArray(err.to_string()))?;
        Self::new(data, vec![axis_name], vec![axis_values])
    }

    pub fn data(&self) -> &ArrayD<f64> {
        &self.data
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn axis_names(&self) -> &[String] {
        &self.axis_names
    }

    pub fn axis_values(&self) -> &[Vec<f64>] {
        &self.axis_values
    }

    pub fn get(&self, index: &[usize]) -> Option<f64> {
        if index.len() != self.data.ndim() {
            return None;
        }
        self.data.get(index).copied()
    }

    pub fn set(&mut self, index: &[usize], value: f64) -> Result<(), RadsimError> {
        let shape = self.data.shape().to_vec();
        let cell = if index.len() == shape.len() {
            self.data.get_mut(index)
        } else {
            None
        };
        match cell {
            Some(cell) => {
                *cell = value;
                Ok(())
            }
            None => Err(RadsimError::InvalidInfoArray(format!(
                "index {index:?} out of bounds for shape {shape:?}"
            ))),
        }
    }

    pub fn count_nan(&self) -> usize {
        self.data.iter().filter(|v| v.is_nan()).count()
    }
}

impl fmt::Display for InfoArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Data :")?;
        writeln!(f, "{}", self.data)?;
        writeln!(f, "Attributes:")?;
        for (name, values) in self.axis_names.iter().zip(&self.axis_values) {
            writeln!(f, "{name} : {values:?}")?;
        }
        Ok(())
    }
}
