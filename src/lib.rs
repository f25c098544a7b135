//! Tool bridge between an agent runtime and the PayLink payment tool
//! service. The bridge discovers the service's tool catalog over MCP,
//! validates calls against the advertised schemas, and reports remote
//! failures as data instead of errors.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use application::{bridge, invoker, registry, schema, stdio};
pub use domain::types;
pub use infrastructure::{rpc, server, transport};
