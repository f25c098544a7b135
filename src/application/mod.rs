pub mod bridge;
pub mod invoker;
pub mod registry;
pub mod schema;
pub mod stdio;
