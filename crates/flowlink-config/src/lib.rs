//! Configuration parsing for flowlink.
//!
//! This crate handles parsing of:
//! - Workflow graph configs (one node per line)
//! - Graph validation (dangling references, cycles)
//! - Per-node job spec files (KDL or JSON)
//! - System settings (flowlink.kdl)

pub mod error;
pub mod graph;
pub mod jobspec;
pub mod settings;
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use graph::{load_graph, parse_graph};
pub use jobspec::{load_job_spec, parse_job_spec};
pub use settings::{Settings, load_settings, parse_settings};
pub use validate::validate;
