//! Purpose: Shared library crate used by the `tradtail` and `tradtail-gen` binaries.
//! Exports: `core` (framing, reader, ring, tail watch), `histogram`,
//! `validator`, `pipeline`.
//! Role: Everything testable lives here; the binaries are thin CLI shells.
//! Invariants: The log file format is a contract with an external writer and
//! changes only with a version bump in `core::record`.
pub mod core;
pub mod histogram;
pub mod pipeline;
pub mod validator;
