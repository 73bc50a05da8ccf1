//! Core types for the light client.
//!
//! This crate provides the primitives shared by the on-demand retrieval engine
//! and the node runtime:
//!
//! - **Primitives**: [`Hash`]
//! - **Identifiers**: [`PeerId`], [`RequestId`], [`BlockNumber`]
//! - **Chain types**: [`ChainHead`]
//! - **Request kinds**: [`RequestKind`], the unit of peer exclusivity
//!
//! # Design Philosophy
//!
//! This crate is self-contained with minimal dependencies. It does not depend on
//! any other workspace crates, making it the foundation layer.

mod chain;
mod hash;
mod identifiers;
mod kind;

pub use chain::ChainHead;
pub use hash::{Hash, HexError};
pub use identifiers::{BlockNumber, PeerId, RequestId};
pub use kind::RequestKind;

