//! Process-wide observability: tracing initialization, panic hook, and the
//! global prometheus registry. Every binary sets these up first thing in
//! `start`.

pub mod metrics;
pub mod panic_hook;
pub mod tracing;
