//! Gemini REST driver, including keyed sessions with per-key roles.

mod client;
pub mod models;

pub use client::{
    add_session, CancelScope, Gemini, SessionRole, GEMINI_API_URL, GEMINI_SANDBOX_API_URL,
};
