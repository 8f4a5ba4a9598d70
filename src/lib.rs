//! HTTP gateway in front of an external voice-conversion command-line tool.
//!
//! Compute operations are forwarded to the tool as `<subcommand> --flag value`
//! invocations; model weights and training datasets are pulled from Google
//! Drive archives into the tool's storage directories.

pub mod app;
pub mod archive;
pub mod gateway;
pub mod jobs;
pub mod storage;
