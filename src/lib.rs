//! A placeholder coupling participant. It joins a coupling session, reads a
//! per-vertex `Force` field from its peer and answers with a `Stress` field
//! derived from it, advancing in lockstep until the collaborator ends the
//! coupling.
//!
//! The collaborator is reached through [`session::CouplingSession`]. The
//! production implementation talks to the preCICE library and is compiled
//! with the `precice` feature.

pub mod config;
pub mod datatypes;
pub mod error;
#[cfg(test)]
mod loopback;
pub mod participant;
#[cfg(feature = "precice")]
pub mod precice_session;
pub mod relation;
pub mod session;
