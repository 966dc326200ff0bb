//! End-to-end tests over the simulated edge source.

mod common;
mod lightpen_test;
mod soak_test;
mod speedometer_test;
