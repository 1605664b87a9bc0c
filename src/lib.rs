//! # Slackbot Library
//!
//! Slack Events API receiver: verifies signed callbacks, resolves user and
//! channel names, and appends event rows to a BigQuery table.

pub mod config;
pub mod credentials;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod identity;
pub mod sentiment;
pub mod server;
pub mod slack;
pub mod telemetry;
pub mod warehouse;
pub mod webhook_verification;
