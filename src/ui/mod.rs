//! UI components
//!
//! A single chat window built with Dioxus. All state comes from session snapshots.

pub mod chat;
