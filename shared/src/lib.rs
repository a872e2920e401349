//! Contracts shared by the loopwall daemon and the renderer process.
//!
//!   - [`args`]    renderer command line
//!   - [`bus`]     session-bus names and the client proxy
//!   - [`config`]  settings file model and key diffing
//!   - [`paths`]   canonical config/cache locations
pub mod args;
pub mod bus;
pub mod config;
pub mod paths;
