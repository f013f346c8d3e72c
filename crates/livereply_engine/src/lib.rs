#![forbid(unsafe_code)]

//! Live comment ingestion and reply dispatch.
//!
//! [`supervisor::ConnectionSupervisor`] owns the upstream live connection and
//! feeds [`queue::CommentQueue`]; [`dispatcher::ReplyDispatcher`] drains it on
//! an external tick and routes one comment at a time through a reply backend.

pub mod config;
pub mod dispatcher;
pub mod queue;
pub mod sink;
pub mod supervisor;


#[cfg(test)]
mod supervisor_tests;
