//! # relay-core
//!
//! Foundation types shared by every relay crate:
//!
//! - **Branded IDs**: [`Address`](ids::Address), [`SessionKey`](ids::SessionKey)
//!   and [`DialogueNonce`](ids::DialogueNonce) as newtypes so an agent address
//!   is never passed where a socket session key is expected
//! - **Logging**: `tracing` subscriber setup and in-memory log capture for tests

#![deny(unsafe_code)]

pub mod ids;
pub mod logging;

pub use ids::{Address, DialogueNonce, SessionKey};
