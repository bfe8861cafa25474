//! C interface to [`lina_core::Session`].
//!
//! The `lina_*` symbols declared in `include/lina.h` are exported when the
//! `llama` feature is enabled. Each one is a thin wrapper around the
//! engine-generic functions in [`ops`], which hold all of the pointer
//! handling, argument clamping and panic containment and can be driven by
//! any [`Engine`](lina_core::Engine).

pub mod callback;
pub mod ops;
mod strings;

#[cfg(feature = "llama")]
mod exports;

pub use callback::{CallbackSink, TokenCallback};
pub use ops::{CANCEL_CLEAR_FLAG, CANCEL_STOP_REQUEST};
