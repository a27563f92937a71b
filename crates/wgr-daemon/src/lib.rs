//! wgr-daemon library surface: shared state, hooks, and the router, exposed
//! so scenario tests can drive the API in process.

pub mod api_types;
pub mod hooks;
pub mod routes;
pub mod state;
