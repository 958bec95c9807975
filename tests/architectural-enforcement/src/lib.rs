//! Architectural Enforcement Integration Tests
//!
//! This package contains integration tests that enforce architectural
//! principles of the streaming core:
//! - No blocking sleeps in production code (wait on async timers or I/O)
//! - No unwrap/expect panics on production error paths
//!
//! These tests are designed to catch violations early in the development cycle.

#![allow(dead_code)]

pub fn placeholder() {
    // Placeholder to make this a valid library
}
