// Oasis Gate - Library Root
// Copyright 2026 Joseph Stone - All Rights Reserved
//
// All modules exported here for use by the binary and tests.

pub mod cache;
pub mod config;
pub mod error;
pub mod gate;
pub mod mcp;
pub mod paths;
pub mod tools;
pub mod validate;

// ============================================================================
// CORE COMPONENTS
// ============================================================================

/// Filesystem sandbox: containment-checked real filesystem access
pub mod fs;

/// Strategy-chain application open/focus
pub mod launcher;

/// Bounded observe -> propose -> execute loop
pub mod agent;

/// Screen capture and xdotool input collaborators
pub mod desktop;

/// OpenAI-compatible reasoning collaborator
pub mod reasoning;
