//! Migration System
//!
//! Ledger bookkeeping, the migration abstraction, the SQL file format and the runner that
//! ties them together.

pub mod definitions;
pub mod ledger;
pub mod logger;
pub mod migration;
pub mod options;
pub mod runner;
pub mod sql;

pub use definitions::*;
pub use ledger::*;
pub use logger::*;
pub use migration::*;
pub use options::*;
pub use runner::*;
pub use sql::*;
