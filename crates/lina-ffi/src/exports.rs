//! The exported `lina_*` symbols. See `include/lina.h` for the contract.

use std::ffi::{c_char, c_float, c_int, c_void};

use lina_core::{LlamaEngine, Session};

use crate::callback::TokenCallback;
use crate::ops;

/// Opaque to C.
pub type LinaSession = Session<LlamaEngine>;

#[unsafe(no_mangle)]
pub extern "C" fn lina_session_new(cancel_mode: c_int) -> *mut LinaSession {
    ops::session_new(LlamaEngine::new, cancel_mode)
}

/// # Safety
/// See [`ops::session_free`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lina_session_free(session: *mut LinaSession) {
    unsafe { ops::session_free(session) }
}

/// # Safety
/// See [`ops::load_model`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lina_load_model(
    session: *const LinaSession,
    path: *const c_char,
    n_ctx: c_int,
    n_threads: c_int,
    n_gpu_layers: c_int,
) -> bool {
    unsafe { ops::load_model(session, path, n_ctx, n_threads, n_gpu_layers) }
}

/// # Safety
/// See [`ops::unload_model`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lina_unload_model(session: *const LinaSession) {
    unsafe { ops::unload_model(session) }
}

/// # Safety
/// See [`ops::is_model_loaded`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lina_is_model_loaded(session: *const LinaSession) -> bool {
    unsafe { ops::is_model_loaded(session) }
}

/// # Safety
/// See [`ops::set_token_callback`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lina_set_token_callback(
    session: *const LinaSession,
    callback: Option<TokenCallback>,
    user_data: *mut c_void,
) {
    unsafe { ops::set_token_callback(session, callback, user_data) }
}

/// # Safety
/// See [`ops::generate_text_streaming`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lina_generate_text_streaming(
    session: *const LinaSession,
    prompt: *const c_char,
    max_tokens: c_int,
    temperature: c_float,
    top_p: c_float,
    top_k: c_int,
    repeat_penalty: c_float,
) {
    unsafe {
        ops::generate_text_streaming(
            session,
            prompt,
            max_tokens,
            temperature,
            top_p,
            top_k,
            repeat_penalty,
        )
    }
}

/// # Safety
/// See [`ops::generate_text`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lina_generate_text(
    session: *const LinaSession,
    prompt: *const c_char,
    max_tokens: c_int,
    temperature: c_float,
    top_p: c_float,
    top_k: c_int,
    repeat_penalty: c_float,
) -> *mut c_char {
    unsafe {
        ops::generate_text(
            session,
            prompt,
            max_tokens,
            temperature,
            top_p,
            top_k,
            repeat_penalty,
        )
    }
}

/// # Safety
/// See [`ops::is_generating`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lina_is_generating(session: *const LinaSession) -> bool {
    unsafe { ops::is_generating(session) }
}

/// # Safety
/// See [`ops::cancel_generation`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lina_cancel_generation(session: *const LinaSession) {
    unsafe { ops::cancel_generation(session) }
}

/// # Safety
/// See [`ops::model_vocab_size`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lina_get_model_vocab_size(session: *const LinaSession) -> c_int {
    unsafe { ops::model_vocab_size(session) }
}

/// # Safety
/// See [`ops::model_context_length`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lina_get_model_context_length(session: *const LinaSession) -> c_int {
    unsafe { ops::model_context_length(session) }
}

/// # Safety
/// See [`ops::model_name`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lina_get_model_name(session: *const LinaSession) -> *mut c_char {
    unsafe { ops::model_name(session) }
}

/// # Safety
/// See [`ops::string_free`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lina_string_free(text: *mut c_char) {
    unsafe { ops::string_free(text) }
}

#[unsafe(no_mangle)]
pub extern "C" fn lina_last_error() -> *mut c_char {
    ops::last_error()
}

#[unsafe(no_mangle)]
pub extern "C" fn lina_version() -> *const c_char {
    ops::version()
}
