//! Integration tests for the scene generation core

mod support;

mod cloud_backend;
mod config_integration;
mod fallback;
