//! Event types handed from the engine to front ends.
//!
//! All types derive `serde::Serialize` + `serde::Deserialize` so a host can
//! forward them over whatever transport it uses.

pub mod events;
