use crate::{
    datatypes::{VectorField, VertexId},
    error::ParticipantError,
};

/// The calls a participant makes into a coupling collaborator.
///
/// Every call blocks until the collaborator answers. Time-window control,
/// checkpoint bookkeeping and vertex ownership all live behind this trait;
/// the participant only observes them. Construction is backend specific and
/// is expected to fail with `ParticipantError::Configuration`. The
/// production backend is `PreciceSession` (feature `precice`).
pub trait CouplingSession {
    /// Spatial dimensionality of a mesh declared in the coupling configuration
    fn mesh_dimensions(&self, mesh_name: &str) -> Result<usize, ParticipantError>;

    /// One-time handshake; establishes the first time window
    fn initialize(&mut self) -> Result<(), ParticipantError>;

    fn is_coupling_ongoing(&self) -> Result<bool, ParticipantError>;

    /// Largest step the participant may take in the current window
    fn max_time_step_size(&self) -> Result<f64, ParticipantError>;

    /// Asking counts as acknowledging: a `true` answer is not repeated
    fn requires_reading_checkpoint(&mut self) -> Result<bool, ParticipantError>;

    fn requires_writing_checkpoint(&mut self) -> Result<bool, ParticipantError>;

    /// Vertex ids of `mesh_name` currently owned by this rank, possibly none
    fn vertex_ids(&self, mesh_name: &str) -> Result<Vec<VertexId>, ParticipantError>;

    fn read_vector_data(
        &self,
        mesh_name: &str,
        data_name: &str,
        vertex_ids: &[VertexId],
        relative_read_time: f64,
    ) -> Result<VectorField, ParticipantError>;

    fn write_vector_data(
        &mut self,
        mesh_name: &str,
        data_name: &str,
        vertex_ids: &[VertexId],
        values: &VectorField,
    ) -> Result<(), ParticipantError>;

    fn advance(&mut self, dt: f64) -> Result<(), ParticipantError>;

    fn finalize(&mut self) -> Result<(), ParticipantError>;
}
