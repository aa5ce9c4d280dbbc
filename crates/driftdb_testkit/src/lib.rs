//! # DriftDB Testkit
//!
//! Test utilities for DriftDB.
//!
//! This crate provides:
//! - Test fixtures: temporary databases and replica pairs wired to an
//!   in-memory relay
//! - Property-based generators using proptest
//! - The (collection kind × element kind) case table driving collection
//!   and sync tests
//!
//! ## Usage
//!
//! ```
//! use driftdb_testkit::prelude::*;
//!
//! for case in cases() {
//!     let pair = ReplicaPair::new(cases_schema());
//!     let owner = pair.a.create_holder().unwrap();
//!     let samples = pair.a.db.write(|db| case.element.samples(db)).unwrap();
//!     pair.a.db.write(|_| case.fill(&owner, &samples)).unwrap();
//!     pair.sync();
//!     let remote = pair.b.db.object(HOLDER, owner.id()).unwrap().unwrap();
//!     assert_eq!(case.contents(&remote).unwrap(), case.contents(&owner).unwrap());
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod cases;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cases::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use cases::*;
pub use fixtures::*;
pub use generators::*;
