use crate::datatypes::VectorField;

/// Coefficient of the default force to stress relation
pub const DEFAULT_STRESS_FACTOR: f64 = 0.5;

/// Maps a force field read from the peer onto the stress field sent back.
///
/// Implementations must return a field with the same shape as the input and
/// keep the row order.
pub trait StressRelation {
    fn stress(&self, force: &VectorField) -> VectorField;
}

/// Stress as a constant multiple of force, component by component
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaledForce {
    pub factor: f64,
}

impl Default for ScaledForce {
    fn default() -> Self {
        ScaledForce {
            factor: DEFAULT_STRESS_FACTOR,
        }
    }
}

impl StressRelation for ScaledForce {
    fn stress(&self, force: &VectorField) -> VectorField {
        force.scaled(self.factor)
    }
}

/// Applies the default relation, `stress = 0.5 * force`
pub fn compute_stress(force: &VectorField) -> VectorField {
    ScaledForce::default().stress(force)
}
