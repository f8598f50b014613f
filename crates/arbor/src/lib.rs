//! Core library for the arbor coding assistant.
//!
//! The pieces compose in one direction: [`models`] defines the shared
//! conversation types, [`providers`] adapts model backends onto them,
//! [`tools`] defines what the model may call, and [`turn`] drives the
//! request/dispatch cycle. [`session`] and [`config`] handle persistence
//! and settings.

pub mod config;
pub mod errors;
pub mod models;
pub mod providers;
pub mod session;
pub mod tools;
pub mod turn;
