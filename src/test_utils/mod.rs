//! Test utilities for the attachment channel
//!
//! This module provides:
//! - A deterministic mock PGP backend with failure and latency injection
//! - Real rPGP key fixtures for round-trip tests

#![cfg(test)]

pub mod mock_backend;
pub mod pgp_test_keys;

pub use mock_backend::*;
pub use pgp_test_keys::*;
