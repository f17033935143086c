//! Issue Mirror - relays GitHub issue and pull request activity into tasks
//! in a work-tracking service.
//!
//! One task per issue or pull request, kept consistent with GitHub across
//! duplicated and out-of-order webhook deliveries.

pub mod config;
pub mod coordinator;
pub mod fields;
pub mod github;
pub mod hash;
pub mod orchestrator;
pub mod render;
pub mod resolver;
pub mod server;
pub mod tracker;
pub mod types;

#[cfg(test)]
mod test_utils;
