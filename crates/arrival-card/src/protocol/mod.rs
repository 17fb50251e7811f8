//! Remote registration protocol: state machine, session, HTTP client, and
//! the orchestrator that ties them together.

pub mod client;
pub mod orchestrator;
pub mod session;
pub mod state;
