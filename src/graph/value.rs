use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Rank plus per-axis extents. Rank 0 is a scalar.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Shape(Vec<usize>);

impl Shape {
    pub fn scalar() -> Self {
        Self(Vec::new())
    }

    pub fn vector(len: usize) -> Self {
        Self(vec![len])
    }

    pub fn new(dims: impl Into<Vec<usize>>) -> Self {
        Self(dims.into())
    }

    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    /// Number of elements (1 for scalars).
    pub fn size(&self) -> usize {
        self.0.iter().product()
    }

    pub fn is_scalar(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "scalar");
        }
        let dims: Vec<String> = self.0.iter().map(|d| d.to_string()).collect();
        write!(f, "[{}]", dims.join(", "))
    }
}

/// A shaped block of `f64` elements in row-major order.
///
/// Equality and hashing compare element bits, so a literal is identical
/// only to a literal with the same bit pattern.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Value {
    shape: Shape,
    data: Vec<f64>,
}

impl Value {
    pub fn new(shape: Shape, data: Vec<f64>) -> Result<Self> {
        if shape.size() != data.len() {
            return Err(EngineError::shape(format!(
                "shape {} holds {} elements, got {}",
                shape,
                shape.size(),
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    pub fn scalar(value: f64) -> Self {
        Self {
            shape: Shape::scalar(),
            data: vec![value],
        }
    }

    pub fn vector(data: Vec<f64>) -> Self {
        Self {
            shape: Shape::vector(data.len()),
            data,
        }
    }

    /// A value of `shape` with every element set to `fill`.
    pub fn filled(shape: Shape, fill: f64) -> Self {
        let data = vec![fill; shape.size()];
        Self { shape, data }
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<f64> {
        self.data
    }

    pub fn as_scalar(&self) -> Option<f64> {
        if self.data.len() == 1 && self.shape.is_scalar() {
            Some(self.data[0])
        } else {
            None
        }
    }

    /// Element `i` of the flat data; scalars broadcast to every index.
    pub fn element(&self, i: usize) -> f64 {
        if self.data.len() == 1 {
            self.data[0]
        } else {
            self.data[i]
        }
    }

    pub fn map(&self, f: impl Fn(f64) -> f64) -> Value {
        Value {
            shape: self.shape.clone(),
            data: self.data.iter().map(|&x| f(x)).collect(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.shape == other.shape
            && self.data.len() == other.data.len()
            && self
                .data
                .iter()
                .zip(&other.data)
                .all(|(a, b)| a.to_bits() == b.to_bits())
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.shape.hash(state);
        for x in &self.data {
            x.to_bits().hash(state);
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(x) = self.as_scalar() {
            return write!(f, "{}", format_float(x));
        }
        let items: Vec<String> = self.data.iter().map(|&x| format_float(x)).collect();
        write!(f, "[{}]", items.join(", "))
    }
}

/// Format a float so it always reads back as a float literal.
pub fn format_float(x: f64) -> String {
    if x.is_nan() {
        "nan".to_string()
    } else if x.is_infinite() {
        if x > 0.0 { "inf" } else { "-inf" }.to_string()
    } else if x.fract() == 0.0 && x.abs() < 1e15 {
        format!("{:.1}", x)
    } else {
        format!("{:?}", x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_size_and_display() {
        assert_eq!(Shape::scalar().size(), 1);
        assert_eq!(Shape::new(vec![2, 3]).size(), 6);
        assert_eq!(Shape::scalar().to_string(), "scalar");
        assert_eq!(Shape::vector(3).to_string(), "[3]");
        assert_eq!(Shape::new(vec![2, 3]).to_string(), "[2, 3]");
    }

    #[test]
    fn test_value_rejects_wrong_length() {
        assert!(Value::new(Shape::vector(3), vec![1.0, 2.0]).is_err());
        assert!(Value::new(Shape::vector(2), vec![1.0, 2.0]).is_ok());
    }

    #[test]
    fn test_bitwise_equality() {
        assert_eq!(Value::scalar(f64::NAN), Value::scalar(f64::NAN));
        assert_ne!(Value::scalar(0.0), Value::scalar(-0.0));
        assert_ne!(Value::scalar(1.0), Value::vector(vec![1.0]));
    }

    #[test]
    fn test_format_float() {
        assert_eq!(format_float(5.0), "5.0");
        assert_eq!(format_float(-2.0), "-2.0");
        assert_eq!(format_float(0.25), "0.25");
        assert_eq!(format_float(f64::INFINITY), "inf");
    }
}
