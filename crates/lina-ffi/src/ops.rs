//! Engine-generic bodies of the C entry points.
//!
//! Every function tolerates a null session (no-op, `false`, 0 or an empty
//! string), clamps negative counts to 0 and never lets a panic unwind into
//! the caller. Returned `char*` values are owned by the caller and must go
//! back through [`string_free`].

use std::any::Any;
use std::ffi::{CStr, c_char, c_float, c_int, c_void};
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::ptr;
use std::sync::Arc;

use lina_core::{CancelMode, Engine, GenerationRequest, LoadParams, SamplingParams, Session, TokenSink};
use tracing::{error, warn};

use crate::callback::{CallbackSink, TokenCallback};
use crate::strings::{free_c_char, into_c_char, read_c_str, set_last_error, take_last_error};

/// `cancel_mode` value selecting [`CancelMode::StopRequest`].
pub const CANCEL_STOP_REQUEST: c_int = 0;
/// `cancel_mode` value selecting [`CancelMode::ClearFlag`].
pub const CANCEL_CLEAR_FLAG: c_int = 1;

const NULL_PROMPT: &str = "Error: Invalid prompt";

const VERSION: &CStr = match CStr::from_bytes_with_nul(concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes()) {
    Ok(version) => version,
    Err(_) => c"unknown",
};

pub fn cancel_mode_from_c(mode: c_int) -> Option<CancelMode> {
    match mode {
        CANCEL_STOP_REQUEST => Some(CancelMode::StopRequest),
        CANCEL_CLEAR_FLAG => Some(CancelMode::ClearFlag),
        _ => None,
    }
}

fn clamp_count(n: c_int) -> u32 {
    u32::try_from(n).unwrap_or(0)
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Run `f`, turning a panic into `None`.
fn guarded<T>(call: &'static str, f: impl FnOnce() -> T) -> Option<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(call, panic = message, "Panic contained at the C boundary");
            set_last_error(format!("{call} panicked: {message}"));
            None
        }
    }
}

/// # Safety
/// `session` must be null or a live pointer from [`session_new`].
unsafe fn session_ref<'a, E: Engine>(session: *const Session<E>) -> Option<&'a Session<E>> {
    unsafe { session.as_ref() }
}

fn request(
    prompt: String,
    max_tokens: c_int,
    temperature: c_float,
    top_p: c_float,
    top_k: c_int,
    repeat_penalty: c_float,
) -> GenerationRequest {
    GenerationRequest::new(prompt)
        .max_tokens(clamp_count(max_tokens))
        .sampling(SamplingParams {
            temperature,
            top_p,
            top_k,
            repeat_penalty,
        })
}

/// Box a new session around `engine`. Null for an unknown `cancel_mode`.
pub fn session_new<E: Engine>(engine: impl FnOnce() -> E, cancel_mode: c_int) -> *mut Session<E> {
    let Some(mode) = cancel_mode_from_c(cancel_mode) else {
        warn!(cancel_mode, "Unknown cancel mode");
        set_last_error(format!("unknown cancel mode {cancel_mode}"));
        return ptr::null_mut();
    };
    guarded("lina_session_new", || Box::into_raw(Box::new(Session::new(engine(), mode))))
        .unwrap_or(ptr::null_mut())
}

/// # Safety
/// `session` must be null or a pointer from [`session_new`] that no other
/// thread is using; it is invalid afterwards.
pub unsafe fn session_free<E: Engine>(session: *mut Session<E>) {
    if session.is_null() {
        return;
    }
    let session = unsafe { Box::from_raw(session) };
    guarded("lina_session_free", || drop(session));
}

/// # Safety
/// `session` as for [`session_free`] but shared; `path` null or
/// NUL-terminated.
pub unsafe fn load_model<E: Engine>(
    session: *const Session<E>,
    path: *const c_char,
    n_ctx: c_int,
    n_threads: c_int,
    n_gpu_layers: c_int,
) -> bool {
    let Some(session) = (unsafe { session_ref(session) }) else {
        return false;
    };
    let Some(path) = (unsafe { read_c_str(path) }) else {
        set_last_error("model path is null");
        return false;
    };
    let params = LoadParams {
        context_size: clamp_count(n_ctx),
        threads: n_threads,
        gpu_layers: n_gpu_layers,
    };

    guarded("lina_load_model", || match session.load(PathBuf::from(path), &params) {
        Ok(()) => true,
        Err(e) => {
            set_last_error(e.to_string());
            false
        }
    })
    .unwrap_or(false)
}

/// # Safety
/// `session` must be null or a live pointer from [`session_new`].
pub unsafe fn unload_model<E: Engine>(session: *const Session<E>) {
    if let Some(session) = unsafe { session_ref(session) } {
        guarded("lina_unload_model", || session.unload());
    }
}

/// # Safety
/// `session` must be null or a live pointer from [`session_new`].
pub unsafe fn is_model_loaded<E: Engine>(session: *const Session<E>) -> bool {
    unsafe { session_ref(session) }.is_some_and(Session::is_loaded)
}

/// Register `callback`, or clear the sink when it is null.
///
/// # Safety
/// `session` must be null or a live pointer from [`session_new`].
/// `callback` must be safe to call with `user_data` from any thread until
/// it is replaced or the session is freed.
pub unsafe fn set_token_callback<E: Engine>(
    session: *const Session<E>,
    callback: Option<TokenCallback>,
    user_data: *mut c_void,
) {
    let Some(session) = (unsafe { session_ref(session) }) else {
        return;
    };
    let sink = callback.map(|cb| Arc::new(CallbackSink::new(cb, user_data)) as Arc<dyn TokenSink>);
    session.set_token_sink(sink);
}

/// Stream a generation into the registered callback.
///
/// # Safety
/// `session` must be null or a live pointer from [`session_new`]; `prompt`
/// null or NUL-terminated.
pub unsafe fn generate_text_streaming<E: Engine>(
    session: *const Session<E>,
    prompt: *const c_char,
    max_tokens: c_int,
    temperature: c_float,
    top_p: c_float,
    top_k: c_int,
    repeat_penalty: c_float,
) {
    let Some(session) = (unsafe { session_ref(session) }) else {
        return;
    };
    let Some(prompt) = (unsafe { read_c_str(prompt) }) else {
        session.emit(NULL_PROMPT);
        return;
    };
    let request = request(prompt, max_tokens, temperature, top_p, top_k, repeat_penalty);
    guarded("lina_generate_text_streaming", || {
        session.generate_streaming(&request);
    });
}

/// Generate to completion and return the text (or an `"Error: ..."`
/// string). Never null for a non-null session.
///
/// # Safety
/// As for [`generate_text_streaming`].
pub unsafe fn generate_text<E: Engine>(
    session: *const Session<E>,
    prompt: *const c_char,
    max_tokens: c_int,
    temperature: c_float,
    top_p: c_float,
    top_k: c_int,
    repeat_penalty: c_float,
) -> *mut c_char {
    let Some(session) = (unsafe { session_ref(session) }) else {
        return into_c_char("");
    };
    let Some(prompt) = (unsafe { read_c_str(prompt) }) else {
        return into_c_char(NULL_PROMPT);
    };
    let request = request(prompt, max_tokens, temperature, top_p, top_k, repeat_penalty);
    let text = guarded("lina_generate_text", || session.generate_blocking(&request))
        .unwrap_or_else(|| "Error: Generation aborted".to_string());
    into_c_char(&text)
}

/// # Safety
/// `session` must be null or a live pointer from [`session_new`].
pub unsafe fn is_generating<E: Engine>(session: *const Session<E>) -> bool {
    unsafe { session_ref(session) }.is_some_and(Session::is_generating)
}

/// # Safety
/// `session` must be null or a live pointer from [`session_new`].
pub unsafe fn cancel_generation<E: Engine>(session: *const Session<E>) {
    if let Some(session) = unsafe { session_ref(session) } {
        session.cancel();
    }
}

/// # Safety
/// `session` must be null or a live pointer from [`session_new`].
pub unsafe fn model_vocab_size<E: Engine>(session: *const Session<E>) -> c_int {
    unsafe { session_ref(session) }
        .and_then(|s| guarded("lina_get_model_vocab_size", || s.vocab_size()))
        .unwrap_or(0)
}

/// # Safety
/// `session` must be null or a live pointer from [`session_new`].
pub unsafe fn model_context_length<E: Engine>(session: *const Session<E>) -> c_int {
    unsafe { session_ref(session) }
        .and_then(|s| guarded("lina_get_model_context_length", || s.context_length()))
        .map_or(0, |n| c_int::try_from(n).unwrap_or(c_int::MAX))
}

/// # Safety
/// `session` must be null or a live pointer from [`session_new`].
pub unsafe fn model_name<E: Engine>(session: *const Session<E>) -> *mut c_char {
    let name = unsafe { session_ref(session) }
        .and_then(|s| guarded("lina_get_model_name", || s.model_name()))
        .unwrap_or_default();
    into_c_char(&name)
}

/// Release a string returned by any `lina_*` call. Null is a no-op.
///
/// # Safety
/// `text` must be null or a string from this library not yet freed.
pub unsafe fn string_free(text: *mut c_char) {
    unsafe { free_c_char(text) }
}

/// The calling thread's last failure message, or null. Clears it.
pub fn last_error() -> *mut c_char {
    take_last_error().map_or(ptr::null_mut(), |e| into_c_char(&e))
}

pub fn version() -> *const c_char {
    VERSION.as_ptr()
}
