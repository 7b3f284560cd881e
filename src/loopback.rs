//! In-process stand-in for the coupling library, used to drive
//! `DummyParticipant::run` end to end in tests.

use std::collections::HashMap;

use tracing::debug;

use crate::{
    config::ParticipantContract,
    datatypes::{VectorField, VertexId},
    error::ParticipantError,
    session::CouplingSession,
};

const TIME_TOLERANCE: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Created,
    Initialized,
    Finalized,
}

/// What the stand-in peer does over a run
#[derive(Debug, Clone)]
pub(crate) struct LoopbackPlan {
    pub windows: usize,
    pub window_size: f64,
    /// Iterations per window; more than one makes the coupling implicit
    pub iterations: usize,
    /// Peer force, one row per global vertex
    pub force: Vec<Vec<f64>>,
    pub rank: usize,
    pub size: usize,
}

impl LoopbackPlan {
    pub fn explicit(windows: usize, force: Vec<Vec<f64>>) -> Self {
        LoopbackPlan::implicit(windows, 1, force)
    }

    pub fn implicit(windows: usize, iterations: usize, force: Vec<Vec<f64>>) -> Self {
        LoopbackPlan {
            windows,
            window_size: 0.1,
            iterations,
            force,
            rank: 0,
            size: 1,
        }
    }

    fn is_implicit(&self) -> bool {
        self.iterations > 1
    }
}

/// Plays a fixed number of windows and iterations against one participant.
/// Calls are checked against the participant's contract the same way the
/// preCICE backend checks them.
pub(crate) struct LoopbackSession {
    contract: ParticipantContract,
    plan: LoopbackPlan,
    state: SessionState,
    /// 1-based index of the current time window
    window: usize,
    time_in_window: f64,
    /// 1-based iteration within the current window
    iteration: usize,
    read_checkpoint: bool,
    write_checkpoint: bool,
    /// Data written by the participant, in global vertex order
    written: HashMap<String, VectorField>,
}

impl LoopbackSession {
    pub fn new(contract: ParticipantContract, plan: LoopbackPlan) -> Self {
        LoopbackSession {
            contract,
            plan,
            state: SessionState::Created,
            window: 1,
            time_in_window: 0.0,
            iteration: 1,
            read_checkpoint: false,
            write_checkpoint: false,
            written: HashMap::new(),
        }
    }

    pub fn written(&self, data_name: &str) -> Option<&VectorField> {
        self.written.get(data_name)
    }

    fn ensure_initialized(&self, operation: &'static str) -> Result<(), ParticipantError> {
        match self.state {
            SessionState::Initialized => Ok(()),
            state => Err(ParticipantError::call(
                operation,
                format!("session is {state:?}"),
            )),
        }
    }

    fn ongoing(&self) -> bool {
        self.window <= self.plan.windows
    }

    fn owns(&self, id: VertexId) -> bool {
        usize::try_from(id)
            .map(|i| i < self.plan.force.len() && i % self.plan.size == self.plan.rank)
            .unwrap_or(false)
    }

    fn check_ids(&self, operation: &'static str, ids: &[VertexId]) -> Result<(), ParticipantError> {
        match ids.iter().find(|id| !self.owns(**id)) {
            Some(id) => Err(ParticipantError::call(
                operation,
                format!("vertex {id} is not owned by rank {}", self.plan.rank),
            )),
            None => Ok(()),
        }
    }

    fn complete_window(&mut self) {
        debug!(window = self.window, "time window complete");
        self.window += 1;
        self.iteration = 1;
        self.time_in_window = 0.0;
        // nothing to save once the last window is done
        self.write_checkpoint = self.plan.is_implicit() && self.ongoing();
    }
}

impl CouplingSession for LoopbackSession {
    fn mesh_dimensions(&self, mesh_name: &str) -> Result<usize, ParticipantError> {
        self.contract.mesh_dimensions(mesh_name)
    }

    fn initialize(&mut self) -> Result<(), ParticipantError> {
        if self.state != SessionState::Created {
            return Err(ParticipantError::call("initialize", "already initialized"));
        }
        self.contract.check_handshake()?;

        for mesh in self.contract.direct_access_meshes() {
            let dimensions = self.contract.mesh_dimensions(&mesh.name)?;
            if self.plan.force.iter().any(|row| row.len() != dimensions) {
                return Err(ParticipantError::Initialization(format!(
                    "peer force does not match the {dimensions}D mesh {}",
                    mesh.name
                )));
            }
        }

        self.state = SessionState::Initialized;
        self.write_checkpoint = self.plan.is_implicit();
        Ok(())
    }

    fn is_coupling_ongoing(&self) -> Result<bool, ParticipantError> {
        self.ensure_initialized("is_coupling_ongoing")?;
        Ok(self.ongoing())
    }

    fn max_time_step_size(&self) -> Result<f64, ParticipantError> {
        self.ensure_initialized("max_time_step_size")?;
        Ok(self.plan.window_size - self.time_in_window)
    }

    fn requires_reading_checkpoint(&mut self) -> Result<bool, ParticipantError> {
        self.ensure_initialized("requires_reading_checkpoint")?;
        Ok(std::mem::take(&mut self.read_checkpoint))
    }

    fn requires_writing_checkpoint(&mut self) -> Result<bool, ParticipantError> {
        self.ensure_initialized("requires_writing_checkpoint")?;
        Ok(std::mem::take(&mut self.write_checkpoint))
    }

    fn vertex_ids(&self, mesh_name: &str) -> Result<Vec<VertexId>, ParticipantError> {
        self.ensure_initialized("vertex_ids")?;
        self.contract.check_vertex_access(mesh_name)?;

        Ok((0..self.plan.force.len())
            .filter(|i| i % self.plan.size == self.plan.rank)
            .filter_map(|i| VertexId::try_from(i).ok())
            .collect())
    }

    fn read_vector_data(
        &self,
        mesh_name: &str,
        data_name: &str,
        vertex_ids: &[VertexId],
        relative_read_time: f64,
    ) -> Result<VectorField, ParticipantError> {
        self.ensure_initialized("read_vector_data")?;
        let dimensions = self.contract.check_vector_read(mesh_name, data_name)?;
        self.check_ids("read_vector_data", vertex_ids)?;

        let remaining = self.plan.window_size - self.time_in_window;
        if !(0.0..=remaining + TIME_TOLERANCE).contains(&relative_read_time) {
            return Err(ParticipantError::call(
                "read_vector_data",
                format!("read time {relative_read_time} is outside [0, {remaining}]"),
            ));
        }

        let mut values = VectorField::zeros(vertex_ids.len(), dimensions);
        for (row, id) in vertex_ids.iter().enumerate() {
            values.set_row(row, &self.plan.force[*id as usize])?;
        }
        Ok(values)
    }

    fn write_vector_data(
        &mut self,
        mesh_name: &str,
        data_name: &str,
        vertex_ids: &[VertexId],
        values: &VectorField,
    ) -> Result<(), ParticipantError> {
        self.ensure_initialized("write_vector_data")?;
        let dimensions = self.contract.check_vector_write(mesh_name, data_name)?;
        self.check_ids("write_vector_data", vertex_ids)?;

        if values.vertex_count() != vertex_ids.len() {
            return Err(ParticipantError::call(
                "write_vector_data",
                format!(
                    "{} rows for {} vertices",
                    values.vertex_count(),
                    vertex_ids.len()
                ),
            ));
        }

        let vertex_count = self.plan.force.len();
        let stored = self
            .written
            .entry(data_name.to_owned())
            .or_insert_with(|| VectorField::zeros(vertex_count, dimensions));
        for (row, id) in vertex_ids.iter().enumerate() {
            stored.set_row(*id as usize, &values.row(row))?;
        }
        Ok(())
    }

    fn advance(&mut self, dt: f64) -> Result<(), ParticipantError> {
        self.ensure_initialized("advance")?;
        if !self.ongoing() {
            return Err(ParticipantError::call("advance", "coupling has ended"));
        }

        let remaining = self.plan.window_size - self.time_in_window;
        if !(dt > 0.0 && dt <= remaining + TIME_TOLERANCE) {
            return Err(ParticipantError::call(
                "advance",
                format!("time step {dt} is outside (0, {remaining}]"),
            ));
        }

        self.time_in_window += dt;
        if self.time_in_window + TIME_TOLERANCE < self.plan.window_size {
            return Ok(());
        }

        if self.iteration < self.plan.iterations {
            debug!(
                window = self.window,
                iteration = self.iteration,
                "repeating time window"
            );
            self.iteration += 1;
            self.time_in_window = 0.0;
            self.read_checkpoint = true;
        } else {
            self.complete_window();
        }
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), ParticipantError> {
        if self.state == SessionState::Finalized {
            return Err(ParticipantError::call("finalize", "already finalized"));
        }
        self.state = SessionState::Finalized;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{
            self,
            tests::{cavity_contract, CAVITY},
        },
        participant::DummyParticipant,
    };

    fn cavity_force() -> Vec<Vec<f64>> {
        vec![
            vec![2.0, 4.0],
            vec![0.0, 0.0],
            vec![-2.0, 6.0],
            vec![1.0, -1.0],
            vec![0.5, 0.25],
        ]
    }

    fn session(plan: LoopbackPlan) -> LoopbackSession {
        LoopbackSession::new(cavity_contract(), plan)
    }

    fn session_for(xml: &str, plan: LoopbackPlan) -> LoopbackSession {
        let contract =
            ParticipantContract::resolve(config::parse(xml).unwrap(), "dummy").unwrap();
        LoopbackSession::new(contract, plan)
    }

    #[test]
    fn explicit_run_exchanges_every_window() {
        let mut session = session(LoopbackPlan::explicit(3, cavity_force()));

        let summary = DummyParticipant::new("Cavity-Mesh").run(&mut session).unwrap();

        assert_eq!(summary.advances, 3);
        assert_eq!(summary.exchanges, 3);
        assert_eq!(summary.checkpoint_reads, 0);
        assert_eq!(summary.checkpoint_writes, 0);
        assert_eq!(
            session.written("Stress").unwrap().rows(),
            vec![
                vec![1.0, 2.0],
                vec![0.0, 0.0],
                vec![-1.0, 3.0],
                vec![0.5, -0.5],
                vec![0.25, 0.125],
            ]
        );
    }

    #[test]
    fn implicit_run_writes_no_checkpoint_after_the_last_window() {
        let mut session = session(LoopbackPlan::implicit(10, 2, cavity_force()));

        let summary = DummyParticipant::new("Cavity-Mesh").run(&mut session).unwrap();

        assert_eq!(summary.advances, 20);
        assert_eq!(summary.exchanges, 20);
        assert_eq!(summary.checkpoint_reads, 10);
        assert_eq!(summary.checkpoint_writes, 9);
        assert_eq!(session.written("Stress").unwrap().shape(), (5, 2));
    }

    #[test]
    fn write_checkpoint_is_clear_once_coupling_has_ended() {
        let mut session = session(LoopbackPlan::implicit(2, 3, cavity_force()));
        session.initialize().unwrap();
        assert!(session.requires_writing_checkpoint().unwrap());

        let mut writes = 0;
        while session.is_coupling_ongoing().unwrap() {
            let dt = session.max_time_step_size().unwrap();
            session.advance(dt).unwrap();
            if session.requires_writing_checkpoint().unwrap() {
                writes += 1;
            }
        }

        assert_eq!(writes, 1);
        assert_eq!(session.is_coupling_ongoing(), Ok(false));
        assert_eq!(session.requires_writing_checkpoint(), Ok(false));
    }

    #[test]
    fn checkpoint_flags_are_cleared_by_asking() {
        let mut session = session(LoopbackPlan::implicit(2, 2, cavity_force()));
        session.initialize().unwrap();
        session.advance(0.1).unwrap();

        assert_eq!(session.requires_reading_checkpoint(), Ok(true));
        assert_eq!(session.requires_reading_checkpoint(), Ok(false));
    }

    #[test]
    fn subcycling_completes_the_window() {
        let mut session = session(LoopbackPlan::explicit(1, cavity_force()));
        session.initialize().unwrap();

        session.advance(0.04).unwrap();
        let rest = session.max_time_step_size().unwrap();
        assert!((rest - 0.06).abs() < 1e-12);
        assert_eq!(session.is_coupling_ongoing(), Ok(true));

        session.advance(rest).unwrap();
        assert_eq!(session.is_coupling_ongoing(), Ok(false));
    }

    #[test]
    fn ranks_split_vertices_round_robin() {
        let mut plan = LoopbackPlan::explicit(1, cavity_force());
        plan.rank = 1;
        plan.size = 2;
        let mut session = session(plan);
        session.initialize().unwrap();

        assert_eq!(session.vertex_ids("Cavity-Mesh"), Ok(vec![1, 3]));
    }

    #[test]
    fn rank_without_vertices_still_completes() {
        let mut plan = LoopbackPlan::explicit(2, vec![vec![2.0, 4.0]]);
        plan.rank = 1;
        plan.size = 2;
        let mut session = session(plan);

        let summary = DummyParticipant::new("Cavity-Mesh").run(&mut session).unwrap();

        assert_eq!(summary.empty_steps, 2);
        assert_eq!(summary.advances, 2);
        assert!(session.written("Stress").is_none());
    }

    #[test]
    fn scalar_force_stops_the_run() {
        let xml = CAVITY.replace(
            r#"<data:vector name="Force" />"#,
            r#"<data:scalar name="Force" />"#,
        );
        let mut session = session_for(&xml, LoopbackPlan::explicit(1, cavity_force()));

        let err = DummyParticipant::new("Cavity-Mesh")
            .run(&mut session)
            .unwrap_err();

        assert_eq!(
            err,
            ParticipantError::call("read_vector_data", "Force is scalar data")
        );
    }

    #[test]
    fn mesh_from_undeclared_sender_fails_initialize() {
        let xml = CAVITY.replace(r#"from="cavity" api-access"#, r#"from="solid" api-access"#);
        let mut session = session_for(&xml, LoopbackPlan::explicit(1, cavity_force()));

        let err = DummyParticipant::new("Cavity-Mesh")
            .run(&mut session)
            .unwrap_err();

        assert!(matches!(err, ParticipantError::Initialization(_)));
    }

    #[test]
    fn peer_force_of_wrong_dimension_fails_initialize() {
        let mut session = session(LoopbackPlan::explicit(1, vec![vec![1.0, 2.0, 3.0]]));

        assert!(matches!(
            session.initialize().unwrap_err(),
            ParticipantError::Initialization(_)
        ));
    }

    #[test]
    fn write_with_wrong_row_length_is_a_shape_error() {
        let mut session = session(LoopbackPlan::explicit(1, cavity_force()));
        session.initialize().unwrap();

        let err = session
            .write_vector_data("Cavity-Mesh", "Stress", &[0], &VectorField::zeros(1, 3))
            .unwrap_err();

        assert!(matches!(err, ParticipantError::FieldShape(_)));
    }

    #[test]
    fn read_rejects_foreign_vertices() {
        let mut plan = LoopbackPlan::explicit(1, cavity_force());
        plan.size = 2;
        let mut session = session(plan);
        session.initialize().unwrap();

        let err = session
            .read_vector_data("Cavity-Mesh", "Force", &[1], 0.1)
            .unwrap_err();

        assert!(matches!(
            err,
            ParticipantError::CollaboratorCall {
                operation: "read_vector_data",
                ..
            }
        ));
    }

    #[test]
    fn oversized_step_is_rejected() {
        let mut session = session(LoopbackPlan::explicit(1, cavity_force()));
        session.initialize().unwrap();

        assert!(session.advance(0.2).is_err());
        assert!(session.advance(0.0).is_err());
    }

    #[test]
    fn calls_before_initialize_are_rejected() {
        let session = session(LoopbackPlan::explicit(1, cavity_force()));

        assert!(session.is_coupling_ongoing().is_err());
        assert!(session.vertex_ids("Cavity-Mesh").is_err());
    }

    #[test]
    fn finalize_only_once() {
        let mut session = session(LoopbackPlan::explicit(1, cavity_force()));
        session.initialize().unwrap();

        session.finalize().unwrap();

        assert!(matches!(
            session.finalize().unwrap_err(),
            ParticipantError::CollaboratorCall {
                operation: "finalize",
                ..
            }
        ));
    }
}
