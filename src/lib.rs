//! audio-bridge - lock-free audio transport between a real-time callback and
//! a worker thread
//!
//! The [`audio`] module holds the ring buffer, the bridge and the host
//! backends; [`settings`] persists the demo application's configuration.

pub mod audio;
pub mod settings;
