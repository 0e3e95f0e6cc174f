//! Pre-assembly tester for AS7265x spectral sensor modules.

pub mod config;
pub mod error;
pub mod hw_trait;
pub mod indicator;
pub mod peripheral;
pub mod probe;
pub mod reset;
pub mod tracing;
pub mod transport;
