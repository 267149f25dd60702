//! Foundation types for table spaces.
//!
//! A table space keeps several physical versions of each registered entity's
//! table so that bulk rewrites can be staged next to the live data and then
//! promoted atomically. This crate holds the pieces every other crate agrees
//! on: who an entity is, and how a version maps to a physical name.
//!
//! # Key Types
//!
//! - [`Entity`] -- Entity descriptor with an explicit parent link
//! - [`EntityKey`] -- Key versions are persisted under
//! - [`Version`] -- Position on an entity's version ring
//! - [`naming`] -- Pure physical-name functions

pub mod entity;
pub mod error;
pub mod naming;

pub use entity::{Ancestors, Entity, EntityKey};
pub use error::NamingError;
pub use naming::Version;
