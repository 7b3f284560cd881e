use tracing::{debug, info, warn};

use crate::{
    datatypes::VectorField,
    error::ParticipantError,
    relation::{ScaledForce, StressRelation},
    session::CouplingSession,
};

pub const FORCE_DATA: &str = "Force";
pub const STRESS_DATA: &str = "Stress";

/// Counters collected over one run of the coupling loop
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub advances: usize,
    pub exchanges: usize,
    pub empty_steps: usize,
    pub checkpoint_reads: usize,
    pub checkpoint_writes: usize,
}

/// Placeholder participant: reads Force from the peer and answers with Stress
pub struct DummyParticipant<R: StressRelation = ScaledForce> {
    mesh_name: String,
    relation: R,
}

impl DummyParticipant<ScaledForce> {
    pub fn new(mesh_name: &str) -> Self {
        DummyParticipant::with_relation(mesh_name, ScaledForce::default())
    }
}

impl<R: StressRelation> DummyParticipant<R> {
    pub fn with_relation(mesh_name: &str, relation: R) -> Self {
        DummyParticipant {
            mesh_name: mesh_name.to_owned(),
            relation,
        }
    }

    pub fn mesh_name(&self) -> &str {
        &self.mesh_name
    }

    /// Runs the participant against an already constructed session, from
    /// mesh lookup through finalize
    ///
    /// # Arguments
    /// * `session` - The coupling session to drive
    ///
    /// # Returns
    /// Counters for the completed run. Any collaborator failure ends the run
    /// immediately and finalize is not called.
    pub fn run<S: CouplingSession>(&self, session: &mut S) -> Result<RunSummary, ParticipantError> {
        let dimensions = session.mesh_dimensions(&self.mesh_name)?;
        debug!(mesh = %self.mesh_name, dimensions, "resolved mesh");

        info!("initializing dummy participant");
        session.initialize()?;

        let mut summary = RunSummary::default();

        while session.is_coupling_ongoing()? {
            let dt = session.max_time_step_size()?;

            if session.requires_reading_checkpoint()? {
                info!("reading checkpoint");
                summary.checkpoint_reads += 1;
            }

            // vertex ownership may change between windows
            let vertex_ids = session.vertex_ids(&self.mesh_name)?;

            if vertex_ids.is_empty() {
                warn!(mesh = %self.mesh_name, "no vertices found in mesh");
                summary.empty_steps += 1;
            } else {
                let force =
                    session.read_vector_data(&self.mesh_name, FORCE_DATA, &vertex_ids, dt)?;
                check_shape(FORCE_DATA, &force, vertex_ids.len(), dimensions)?;
                info!(
                    shape = ?force.shape(),
                    max = force.max().unwrap_or_default(),
                    min = force.min().unwrap_or_default(),
                    "read forces from peer"
                );

                let stress = self.relation.stress(&force);
                check_shape(STRESS_DATA, &stress, vertex_ids.len(), dimensions)?;

                session.write_vector_data(&self.mesh_name, STRESS_DATA, &vertex_ids, &stress)?;
                info!(shape = ?stress.shape(), "wrote stress to peer");
                summary.exchanges += 1;
            }

            info!(dt, "advancing");
            session.advance(dt)?;
            summary.advances += 1;

            if session.requires_writing_checkpoint()? {
                info!("writing checkpoint");
                summary.checkpoint_writes += 1;
            }
        }

        session.finalize()?;
        info!(?summary, "dummy participant completed");

        Ok(summary)
    }
}

fn check_shape(
    data_name: &str,
    field: &VectorField,
    vertex_count: usize,
    dimensions: usize,
) -> Result<(), ParticipantError> {
    if field.shape() != (vertex_count, dimensions) {
        return Err(ParticipantError::FieldShape(format!(
            "{data_name} has shape {:?}, expected ({vertex_count}, {dimensions})",
            field.shape()
        )));
    }
    Ok(())
}
