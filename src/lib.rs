//! mictoggle: mute a virtual microphone from a headset button
//!
//! The button shows up only as wide amplitude pulses on the capture
//! channel. This crate provides:
//! - Block averaging and pulse classification into press/release edges
//! - An explicit state machine negotiating the capture stream and the
//!   virtual source with the audio server
//! - A single cooperative event loop with ordered teardown

pub mod app;
pub mod config;
pub mod detect;
pub mod events;
pub mod lifecycle;
pub mod notify;
pub mod server;
pub mod session;
