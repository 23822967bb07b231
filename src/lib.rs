//! Claimspect content verification service.
//!
//! An API gateway accepts text or video references, fingerprints them, and
//! queues verification jobs; worker processes extract media, transcribe it,
//! and run a two-stage AI pipeline (gatekeeper classification, then an
//! evidence-backed fact-check) whose results are cached and persisted.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
