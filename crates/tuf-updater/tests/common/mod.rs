// Shared fixtures for the updater integration tests.
#![allow(dead_code)]

pub mod simulator;
pub mod store;
