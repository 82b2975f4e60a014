//! Socket transport, bounded I/O, and the readiness primitive — the layer
//! below the proxy engine.

pub mod bounded_io;
pub mod readiness;
pub mod socket;
