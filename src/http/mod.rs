//! HTTP layer for extract-keeper.
//!
//! An axum router that exposes the extract lifecycle as a small REST API and
//! streams stored artifacts and change files back to callers.

pub mod handler;
