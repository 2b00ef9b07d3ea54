//! Core data model: messages, parts, page sets, and conversion jobs.

pub mod job;
pub mod message;
pub mod page;
