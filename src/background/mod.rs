//! Background services
//!
//! Long-lived tasks supervised by `main`'s `JoinSet`; each one stops when
//! its `CancellationToken` fires.

pub mod retention;

pub use retention::RetentionSweeper;
