//! Integration test crate for clipreel.
//!
//! Exercises the capture controller, its stage leases and the export path
//! together, checking that every frame handle is released exactly once.

#[cfg(test)]
mod lifecycle;

#[cfg(test)]
mod threaded;

#[cfg(test)]
mod export;
