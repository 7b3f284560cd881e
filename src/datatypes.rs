use nalgebra::DMatrix;

use crate::error::ParticipantError;

/// Vertex identifier handed out by the coupling collaborator
pub type VertexId = i32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantIdentity {
    pub name: String,
    pub rank: usize,
    pub size: usize,
}

/// A per-vertex vector field. Row `i` holds the vector of the `i`-th vertex of
/// the id slice it was read for or will be written to; columns are the spatial
/// components.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorField {
    values: DMatrix<f64>,
}

impl VectorField {
    pub fn zeros(vertex_count: usize, dimensions: usize) -> Self {
        VectorField {
            values: DMatrix::zeros(vertex_count, dimensions),
        }
    }

    /// Builds a field from row vectors
    ///
    /// # Arguments
    /// * `dimensions` - Expected number of components in every row
    /// * `rows` - One vector per vertex
    ///
    /// # Returns
    /// The field, or a FieldShape error if any row has the wrong length
    pub fn from_rows(dimensions: usize, rows: &[Vec<f64>]) -> Result<Self, ParticipantError> {
        if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != dimensions) {
            return Err(ParticipantError::FieldShape(format!(
                "row {i} has {} components, expected {dimensions}",
                row.len()
            )));
        }

        Ok(VectorField {
            values: DMatrix::from_fn(rows.len(), dimensions, |i, j| rows[i][j]),
        })
    }

    pub fn vertex_count(&self) -> usize {
        self.values.nrows()
    }

    pub fn dimensions(&self) -> usize {
        self.values.ncols()
    }

    pub fn shape(&self) -> (usize, usize) {
        self.values.shape()
    }

    pub fn is_empty(&self) -> bool {
        self.values.nrows() == 0
    }

    pub fn row(&self, i: usize) -> Vec<f64> {
        self.values.row(i).iter().copied().collect()
    }

    pub fn rows(&self) -> Vec<Vec<f64>> {
        (0..self.vertex_count()).map(|i| self.row(i)).collect()
    }

    /// Builds a field from a flat buffer laid out vertex after vertex, the
    /// layout the coupling library reads into and writes from
    pub fn from_row_major(
        vertex_count: usize,
        dimensions: usize,
        values: &[f64],
    ) -> Result<Self, ParticipantError> {
        if values.len() != vertex_count * dimensions {
            return Err(ParticipantError::FieldShape(format!(
                "{} values cannot fill {vertex_count} vertices of {dimensions} components",
                values.len()
            )));
        }

        Ok(VectorField {
            values: DMatrix::from_row_slice(vertex_count, dimensions, values),
        })
    }

    /// Flattens the field vertex after vertex
    pub fn to_row_major(&self) -> Vec<f64> {
        self.values.transpose().iter().copied().collect()
    }

    /// Overwrites the vector of vertex `i`
    ///
    /// # Returns
    /// A FieldShape error if `i` is out of range or `values` does not have one
    /// entry per component
    pub fn set_row(&mut self, i: usize, values: &[f64]) -> Result<(), ParticipantError> {
        if i >= self.vertex_count() {
            return Err(ParticipantError::FieldShape(format!(
                "vertex {i} is out of range for {} vertices",
                self.vertex_count()
            )));
        }
        if values.len() != self.dimensions() {
            return Err(ParticipantError::FieldShape(format!(
                "row for vertex {i} has {} components, expected {}",
                values.len(),
                self.dimensions()
            )));
        }

        for (j, v) in values.iter().enumerate() {
            self.values[(i, j)] = *v;
        }
        Ok(())
    }

    /// Largest component over all vertices, None for an empty field
    pub fn max(&self) -> Option<f64> {
        self.values.iter().copied().reduce(f64::max)
    }

    /// Smallest component over all vertices, None for an empty field
    pub fn min(&self) -> Option<f64> {
        self.values.iter().copied().reduce(f64::min)
    }

    pub fn scaled(&self, factor: f64) -> Self {
        VectorField {
            values: &self.values * factor,
        }
    }
}
