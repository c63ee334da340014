pub mod archive;
pub mod graph;
pub mod session_store;
pub mod sleeper;
