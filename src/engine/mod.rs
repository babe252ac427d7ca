pub mod context;
pub mod converters;
pub mod executor;
pub mod generator;
pub mod judge;
pub mod planner;
pub mod runner;
pub mod sampler;
pub mod scorer;
pub mod templates;

pub use context::ExperimentContext;
pub use converters::{catalog as converter_catalog, Converter};
pub use templates::{expected_behaviour_for, owasp_id_for, templates_for, Template};
