//! switchboard function gateway library
//!
//! This library provides the core functionality for the switchboard gateway:
//! an HTTP server that dispatches requests to a registry of named functions,
//! with schema validation, rate limiting, batch execution, and TTL-bounded
//! temp file storage.
//!
#![allow(dead_code)]
#![allow(unused_imports)]

pub mod auth;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod envelope;
pub mod functions;
pub mod logging;
pub mod registry;
pub mod server;
pub mod storage;
pub mod validation;
