//! Desktop AI core library: config, session history, LLM clients, chat agent,
//! and the task bridge used by both the CLI and desktop applications.

pub mod agent;
pub mod bridge;
pub mod config;
pub mod lifecycle;
pub mod llm;
pub mod models;
pub mod session;
pub mod startup;
