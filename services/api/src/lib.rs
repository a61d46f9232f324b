//! Kiyomi API Library Crate
//!
//! The HTTP backend of the practice app: the scenario catalog, LLM scenario
//! generation and onboarding selection, and LiveKit room credentials. The
//! `api` binary is a thin wrapper around this library.

pub mod config;
pub mod handlers;
pub mod models;
pub mod router;
pub mod state;
pub mod voice;
