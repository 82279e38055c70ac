pub mod agent;
pub mod router;

pub use agent::{Agent, DeltaSink};
pub use router::Router;
