//! tuibridge Daemon Library
//!
//! Runs an interactive terminal program under a pseudo-terminal for each
//! WebSocket client and streams its cleaned-up output back:
//! - PTY program handles (spawn, input, resize, terminate)
//! - Per-connection session bridge with debounced batching and backpressure
//! - axum server with WebSocket and health routes

pub mod server;
pub mod session;
pub mod subprocess;
