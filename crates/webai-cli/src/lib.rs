//! Command-line adapter for the webai proxy.
//!
//! The binary is the composition root: it parses configuration, installs
//! logging, probes the backend, binds the listener and hands everything to
//! [`webai_proxy::serve`].

#![deny(unsafe_code)]

pub mod parser;
pub mod startup;

pub use parser::Cli;
pub use startup::{bind_listener, init_logging, report_backend_health};
