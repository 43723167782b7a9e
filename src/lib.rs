//! chatgen library
//!
//! Core library for the chatgen desktop application: a chat window that
//! streams replies from a locally loaded language model.

pub mod app;
pub mod inference;
pub mod session;
pub mod storage;
pub mod types;
pub mod ui;
