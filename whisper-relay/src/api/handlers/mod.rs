//! Route handlers.
//!
//! - [`status`]: liveness probe
//! - [`transcribe`]: multipart upload relayed to the external transcriber

pub mod status;
pub mod transcribe;
