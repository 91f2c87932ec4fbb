//! Core functionality shared by the netkeep binary.
//!
//! The portal client, the command dispatcher and its worker pipeline, the
//! control channel supervisor, standalone polling, configuration, the
//! outcome journal and the `doctor` diagnostics.

pub mod config;
pub mod dispatch;
pub mod doctor;
pub mod error;
pub mod journal;
pub mod pipeline;
pub mod policy;
pub mod poll;
pub mod portal;
pub mod supervisor;
pub mod test_support;
