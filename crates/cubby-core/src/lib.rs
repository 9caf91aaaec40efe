//! Core engine for an in-memory, time-windowed variable store.
//!
//! This crate answers "give me variable V clipped to window W" cheaply and
//! correctly, even when V's samples arrived incrementally, out of order and
//! from overlapping windows:
//!
//! - A merge engine that reconciles freshly loaded samples with cached ones
//!   under one shared index mapping (`merge` and `field` modules).
//! - A single-slot "current window" context with request guards, and
//!   variable handles that clip lazily against it and cache the result
//!   (`window` and `handle` modules).
//! - A preservation pass that carries user display attributes across every
//!   storage reallocation (`preserve` module).
//! - Derived variables computed from other variables with independent
//!   metadata (`derived` module).
//! - A store that owns all of it, loads only windows it has not seen and
//!   reports sample gaps over RoaringBitmap-backed time buckets (`store`,
//!   `coverage` and `bucket` modules).
//!
//! Higher-level crates are expected to go through the `cubby` wrapper crate
//! rather than these module paths.
#![deny(missing_docs)]
pub mod bucket;
pub mod config;
pub mod coverage;
pub mod derived;
pub mod error;
pub mod field;
pub mod handle;
pub mod instance;
pub mod loaded;
pub mod merge;
pub mod plot_config;
pub mod preserve;
pub mod producer;
pub mod store;
pub mod time;
pub mod time_axis;
pub mod window;
