//! Observation and action space descriptions.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Element type of a box space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Uint8,
    Int32,
    Int64,
    Float32,
    Float64,
}

/// Shape and bounds of the values an environment produces or accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Space {
    /// Bounded n-dimensional array. `low`/`high` hold one bound per element.
    Box {
        low: Vec<f64>,
        high: Vec<f64>,
        shape: Vec<usize>,
        dtype: DType,
    },
    /// Integers in `0..n`.
    Discrete { n: u64 },
    /// Named sub-spaces.
    Dict { spaces: BTreeMap<String, Space> },
}

impl Space {
    /// Box space with the same bounds on every element.
    pub fn uniform(low: f64, high: f64, shape: &[usize], dtype: DType) -> Self {
        let len = shape.iter().product();
        Space::Box {
            low: vec![low; len],
            high: vec![high; len],
            shape: shape.to_vec(),
            dtype,
        }
    }

    /// Number of scalar elements, `None` for dict spaces.
    pub fn flat_len(&self) -> Option<usize> {
        match self {
            Space::Box { shape, .. } => Some(shape.iter().product()),
            Space::Discrete { .. } => Some(1),
            Space::Dict { .. } => None,
        }
    }
}
