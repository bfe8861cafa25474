//! Process-wide llama.cpp backend initialization.

use std::ffi::CStr;
use std::sync::Once;

use tracing::{debug, info};

static BACKEND_INIT: Once = Once::new();
static LOG_BRIDGE: Once = Once::new();

/// Handle proving the llama.cpp backend has been initialized.
///
/// The first call to [`LlamaBackend::init`] loads every compiled-in ggml
/// backend and initializes llama.cpp; later calls are no-ops. The backend
/// lives until process exit.
#[derive(Debug, Clone, Copy)]
pub struct LlamaBackend {
    _private: (),
}

impl LlamaBackend {
    /// Initialize the backend (idempotent).
    pub fn init() -> Self {
        BACKEND_INIT.call_once(|| {
            unsafe {
                llama_sys::ggml_backend_load_all();
                llama_sys::llama_backend_init();
            }
            info!("llama.cpp backend initialized");
        });
        Self { _private: () }
    }

    /// Route llama.cpp / ggml log lines into `tracing` under the
    /// `llama.cpp` target. Installed at most once per process.
    pub fn set_log_callback(&self) {
        unsafe extern "C" fn forward(
            level: llama_sys::ggml_log_level,
            text: *const std::ffi::c_char,
            _user_data: *mut std::ffi::c_void,
        ) {
            if text.is_null() {
                return;
            }
            let msg = unsafe { CStr::from_ptr(text) }.to_string_lossy();
            let msg = msg.trim();
            if msg.is_empty() {
                return;
            }
            // ggml_log_level: DEBUG=1, INFO=2, WARN=3, ERROR=4, CONT=5
            match level {
                4 => tracing::error!(target: "llama.cpp", "{msg}"),
                3 => tracing::warn!(target: "llama.cpp", "{msg}"),
                2 => tracing::info!(target: "llama.cpp", "{msg}"),
                _ => tracing::debug!(target: "llama.cpp", "{msg}"),
            }
        }

        LOG_BRIDGE.call_once(|| {
            unsafe { llama_sys::llama_log_set(Some(forward), std::ptr::null_mut()) };
            debug!("llama.cpp log bridge installed");
        });
    }

    /// Human-readable description of the compiled-in CPU/GPU features.
    pub fn system_info(&self) -> String {
        unsafe {
            CStr::from_ptr(llama_sys::llama_print_system_info())
                .to_string_lossy()
                .into_owned()
        }
    }
}
