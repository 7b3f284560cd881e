//! Contains the `PreciceSession` struct.

use std::{path::Path, pin::Pin};

use cxx::UniquePtr;
use tracing::{debug, info};

use crate::{
    config::ParticipantContract,
    datatypes::{ParticipantIdentity, VectorField, VertexId},
    error::ParticipantError,
    session::CouplingSession,
};

/// Half extent of the access region set on received meshes. It covers any
/// mesh the peer provides, so every vertex of the peer is visible.
const ACCESS_REGION_EXTENT: f64 = 1.0e12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Created,
    Initialized,
    Finalized,
}

/// A `CouplingSession` backed by the preCICE library through its Rust
/// bindings.
///
/// preCICE aborts the process on a misnamed mesh or data field, so every
/// call is first checked against the participant's `ParticipantContract`.
pub struct PreciceSession {
    contract: ParticipantContract,
    participant: UniquePtr<precice::Participant>,
    state: SessionState,
}

impl PreciceSession {
    /// Joins the coupling described by `config_path` as `identity`
    ///
    /// # Arguments
    /// * `identity` - Name, rank and size of the joining participant
    /// * `config_path` - Path to the preCICE configuration xml
    ///
    /// # Returns
    /// The session, or a Configuration error if the configuration cannot be
    /// read or does not declare the participant
    pub fn create(
        identity: &ParticipantIdentity,
        config_path: &Path,
    ) -> Result<Self, ParticipantError> {
        if identity.size == 0 || identity.rank >= identity.size {
            return Err(ParticipantError::Configuration(format!(
                "process index {} is out of range for group size {}",
                identity.rank, identity.size
            )));
        }

        let contract = ParticipantContract::load(config_path, &identity.name)?;

        let config = config_path.to_str().ok_or_else(|| {
            ParticipantError::Configuration(format!(
                "configuration path {} is not valid UTF-8",
                config_path.display()
            ))
        })?;
        let rank = i32::try_from(identity.rank).map_err(|_| {
            ParticipantError::Configuration(format!("process index {} is too large", identity.rank))
        })?;
        let size = i32::try_from(identity.size).map_err(|_| {
            ParticipantError::Configuration(format!("group size {} is too large", identity.size))
        })?;

        let participant = precice::create_participant(&identity.name, config, rank, size);
        if participant.is_null() {
            return Err(ParticipantError::Configuration(format!(
                "preCICE refused participant {}",
                identity.name
            )));
        }

        info!(
            participant = %identity.name,
            rank,
            size,
            config,
            "created preCICE participant"
        );

        Ok(PreciceSession {
            contract,
            participant,
            state: SessionState::Created,
        })
    }

    fn handle(&mut self) -> Pin<&mut precice::Participant> {
        self.participant.pin_mut()
    }

    fn ensure_state(
        &self,
        operation: &'static str,
        expected: SessionState,
    ) -> Result<(), ParticipantError> {
        if self.state != expected {
            return Err(ParticipantError::call(
                operation,
                format!("session is {:?}, expected {expected:?}", self.state),
            ));
        }
        Ok(())
    }
}

/// Bounding box laid out as `[min_x, max_x, min_y, max_y(, min_z, max_z)]`
fn access_region(dimensions: usize) -> Vec<f64> {
    (0..dimensions)
        .flat_map(|_| [-ACCESS_REGION_EXTENT, ACCESS_REGION_EXTENT])
        .collect()
}

fn library_count(operation: &'static str, value: i32) -> Result<usize, ParticipantError> {
    usize::try_from(value)
        .map_err(|_| ParticipantError::call(operation, format!("library returned {value}")))
}

impl CouplingSession for PreciceSession {
    fn mesh_dimensions(&self, mesh_name: &str) -> Result<usize, ParticipantError> {
        let declared = self.contract.mesh_dimensions(mesh_name)?;
        let reported =
            library_count("mesh_dimensions", self.participant.get_mesh_dimensions(mesh_name))?;

        if reported != declared {
            return Err(ParticipantError::call(
                "mesh_dimensions",
                format!("{mesh_name} is declared {declared}D but preCICE reports {reported}D"),
            ));
        }
        Ok(reported)
    }

    fn initialize(&mut self) -> Result<(), ParticipantError> {
        self.ensure_state("initialize", SessionState::Created)?;
        self.contract.check_handshake()?;

        let regions: Vec<(String, usize)> = self
            .contract
            .direct_access_meshes()
            .map(|m| {
                self.contract
                    .mesh_dimensions(&m.name)
                    .map(|dimensions| (m.name.clone(), dimensions))
            })
            .collect::<Result<_, _>>()?;

        for (mesh_name, dimensions) in regions {
            debug!(mesh = %mesh_name, "setting mesh access region");
            self.handle()
                .set_mesh_access_region(&mesh_name, &access_region(dimensions));
        }

        self.handle().initialize();
        self.state = SessionState::Initialized;
        Ok(())
    }

    fn is_coupling_ongoing(&self) -> Result<bool, ParticipantError> {
        self.ensure_state("is_coupling_ongoing", SessionState::Initialized)?;
        Ok(self.participant.is_coupling_ongoing())
    }

    fn max_time_step_size(&self) -> Result<f64, ParticipantError> {
        self.ensure_state("max_time_step_size", SessionState::Initialized)?;
        Ok(self.participant.get_max_time_step_size())
    }

    fn requires_reading_checkpoint(&mut self) -> Result<bool, ParticipantError> {
        self.ensure_state("requires_reading_checkpoint", SessionState::Initialized)?;
        Ok(self.handle().requires_reading_checkpoint())
    }

    fn requires_writing_checkpoint(&mut self) -> Result<bool, ParticipantError> {
        self.ensure_state("requires_writing_checkpoint", SessionState::Initialized)?;
        Ok(self.handle().requires_writing_checkpoint())
    }

    fn vertex_ids(&self, mesh_name: &str) -> Result<Vec<VertexId>, ParticipantError> {
        self.ensure_state("vertex_ids", SessionState::Initialized)?;
        self.contract.check_vertex_access(mesh_name)?;

        // a provided mesh only holds what this participant defined, and the
        // dummy defines nothing
        if !self.contract.is_received(mesh_name) {
            return Ok(Vec::new());
        }

        let dimensions = self.contract.mesh_dimensions(mesh_name)?;
        let count = library_count("vertex_ids", self.participant.get_mesh_vertex_size(mesh_name))?;

        let mut ids: Vec<VertexId> = vec![0; count];
        let mut coordinates = vec![0.0; count * dimensions];
        self.participant
            .get_mesh_vertex_ids_and_coordinates(mesh_name, &mut ids, &mut coordinates);

        Ok(ids)
    }

    fn read_vector_data(
        &self,
        mesh_name: &str,
        data_name: &str,
        vertex_ids: &[VertexId],
        relative_read_time: f64,
    ) -> Result<VectorField, ParticipantError> {
        self.ensure_state("read_vector_data", SessionState::Initialized)?;
        let dimensions = self.contract.check_vector_read(mesh_name, data_name)?;

        let mut values = vec![0.0; vertex_ids.len() * dimensions];
        self.participant.read_data(
            mesh_name,
            data_name,
            vertex_ids,
            relative_read_time,
            &mut values,
        );

        VectorField::from_row_major(vertex_ids.len(), dimensions, &values)
    }

    fn write_vector_data(
        &mut self,
        mesh_name: &str,
        data_name: &str,
        vertex_ids: &[VertexId],
        values: &VectorField,
    ) -> Result<(), ParticipantError> {
        self.ensure_state("write_vector_data", SessionState::Initialized)?;
        let dimensions = self.contract.check_vector_write(mesh_name, data_name)?;

        if values.shape() != (vertex_ids.len(), dimensions) {
            return Err(ParticipantError::call(
                "write_vector_data",
                format!(
                    "{data_name} has shape {:?}, expected ({}, {dimensions})",
                    values.shape(),
                    vertex_ids.len()
                ),
            ));
        }

        let buffer = values.to_row_major();
        self.handle()
            .write_data(mesh_name, data_name, vertex_ids, &buffer);
        Ok(())
    }

    fn advance(&mut self, dt: f64) -> Result<(), ParticipantError> {
        self.ensure_state("advance", SessionState::Initialized)?;
        if !(dt > 0.0 && dt.is_finite()) {
            return Err(ParticipantError::call(
                "advance",
                format!("time step must be positive, got {dt}"),
            ));
        }

        self.handle().advance(dt);
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), ParticipantError> {
        if self.state == SessionState::Finalized {
            return Err(ParticipantError::call("finalize", "session is already finalized"));
        }

        self.handle().finalize();
        self.state = SessionState::Finalized;
        info!("finalized preCICE participant");
        Ok(())
    }
}
