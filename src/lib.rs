pub mod config;
pub mod error;
pub mod graph;
pub mod http;
pub mod model;
pub mod prompt;
pub mod relay;
pub mod reply;
pub mod storage;

pub use config::Config;
pub use error::{RelayError, Result};
pub use graph::{parse_graph_state, GraphState, TaskKind};
pub use relay::{GraphRelay, Upload};
