//! Thread-safety markers shared by every bridge trait.
//!
//! Host adapters are handed across tasks behind `Arc<dyn ...>`, so all of them
//! must be `Send + Sync`. The alias keeps trait headers short.

/// Marker trait for bridge implementations that can be shared across tasks.
pub trait PlatformSendSync: Send + Sync {}

impl<T> PlatformSendSync for T where T: Send + Sync {}
