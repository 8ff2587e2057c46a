//! Sales Coach - conversational sales training engine
//!
//! Trainees pick a scenario, talk to a simulated client played by a
//! generative model, and receive a rubric-based evaluation when the
//! dialogue ends.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
