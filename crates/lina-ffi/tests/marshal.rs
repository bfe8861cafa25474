use std::ffi::{CStr, CString, c_char, c_void};
use std::ptr;
use std::sync::Mutex;

use lina::ops;
use lina::{CANCEL_CLEAR_FLAG, CANCEL_STOP_REQUEST};
use lina_core::Session;
use lina_core::testing::{Script, ScriptedEngine, Stats};

type Handle = *mut Session<ScriptedEngine>;

const NULL: *const Session<ScriptedEngine> = ptr::null();

fn new_session(script: Script) -> (Handle, std::sync::Arc<Stats>) {
    let engine = ScriptedEngine::new(script);
    let stats = engine.stats();
    let handle = ops::session_new(move || engine, CANCEL_STOP_REQUEST);
    assert!(!handle.is_null());
    (handle, stats)
}

fn load(handle: Handle) -> bool {
    let path = CString::new("models/scripted.gguf").unwrap();
    unsafe { ops::load_model(handle, path.as_ptr(), 2048, 2, 0) }
}

/// Take ownership of a returned string.
fn take(text: *mut c_char) -> String {
    assert!(!text.is_null());
    let owned = unsafe { CStr::from_ptr(text) }.to_str().unwrap().to_owned();
    unsafe { ops::string_free(text) };
    owned
}

unsafe extern "C" fn collect(fragment: *const c_char, user_data: *mut c_void) {
    let fragments = unsafe { &*(user_data as *const Mutex<Vec<String>>) };
    let text = unsafe { CStr::from_ptr(fragment) }.to_string_lossy().into_owned();
    fragments.lock().unwrap().push(text);
}

fn generate(handle: Handle, prompt: &str, max_tokens: i32) -> String {
    let prompt = CString::new(prompt).unwrap();
    take(unsafe { ops::generate_text(handle, prompt.as_ptr(), max_tokens, 0.8, 0.9, 40, 1.0) })
}

#[test]
fn test_session_lifecycle() {
    let (handle, stats) = new_session(Script::words(&["a", "b"]));

    assert!(!unsafe { ops::is_model_loaded(handle) });
    assert!(load(handle));
    assert!(unsafe { ops::is_model_loaded(handle) });
    assert_eq!(unsafe { ops::model_vocab_size(handle) }, 4);
    assert_eq!(unsafe { ops::model_context_length(handle) }, 2048);
    assert_eq!(take(unsafe { ops::model_name(handle) }), "scripted-model");

    unsafe { ops::unload_model(handle) };
    assert!(!unsafe { ops::is_model_loaded(handle) });
    assert_eq!(unsafe { ops::model_vocab_size(handle) }, 0);
    assert_eq!(take(unsafe { ops::model_name(handle) }), "");

    assert!(load(handle));
    unsafe { ops::session_free(handle) };
    assert!(stats.balanced());
}

#[test]
fn test_streaming_through_callback() {
    let (handle, _stats) = new_session(Script::words(&["Hel", "lo"]));
    assert!(load(handle));
    let fragments = Mutex::new(Vec::<String>::new());
    let user_data = &fragments as *const Mutex<Vec<String>> as *mut c_void;

    unsafe { ops::set_token_callback(handle, Some(collect), user_data) };
    let prompt = CString::new("Say hello").unwrap();
    unsafe { ops::generate_text_streaming(handle, prompt.as_ptr(), 16, 0.8, 0.9, 40, 1.0) };
    assert_eq!(*fragments.lock().unwrap(), ["Hel", "lo"]);

    unsafe { ops::generate_text_streaming(handle, ptr::null(), 16, 0.8, 0.9, 40, 1.0) };
    assert_eq!(fragments.lock().unwrap().last().unwrap(), "Error: Invalid prompt");

    unsafe { ops::set_token_callback(handle, None, ptr::null_mut()) };
    unsafe { ops::generate_text_streaming(handle, prompt.as_ptr(), 16, 0.8, 0.9, 40, 1.0) };
    assert_eq!(fragments.lock().unwrap().len(), 3);

    unsafe { ops::session_free(handle) };
}

#[test]
fn test_blocking_generation() {
    let (handle, _stats) = new_session(Script::words(&["one", " two"]));
    assert_eq!(generate(handle, "x", 16), "Error: No model loaded");

    assert!(load(handle));
    assert_eq!(generate(handle, "x", 16), "one two");
    assert_eq!(
        take(unsafe { ops::generate_text(handle, ptr::null(), 16, 0.8, 0.9, 40, 1.0) }),
        "Error: Invalid prompt"
    );
    unsafe { ops::session_free(handle) };
}

#[test]
fn test_empty_prompt_is_an_error_not_a_crash() {
    let (handle, stats) = new_session(Script::words(&["a"]).no_bos());
    assert!(load(handle));
    assert_eq!(
        generate(handle, "", 16),
        "Error: Failed to process prompt: prompt produced no tokens"
    );
    assert_eq!(Stats::get(&stats.sample_calls), 0);
    assert!(!unsafe { ops::is_generating(handle) });
    unsafe { ops::session_free(handle) };
}

#[test]
fn test_negative_max_tokens_is_zero() {
    let (handle, stats) = new_session(Script::words(&["a"]));
    assert!(load(handle));
    assert_eq!(generate(handle, "x", -5), "");
    assert_eq!(Stats::get(&stats.decode_calls), 1);
    unsafe { ops::session_free(handle) };
}

#[test]
fn test_negative_context_means_model_default() {
    let (handle, _stats) = new_session(Script::words(&["a"]).n_ctx_train(512));
    let path = CString::new("m.gguf").unwrap();
    assert!(unsafe { ops::load_model(handle, path.as_ptr(), -1, -1, 0) });
    assert_eq!(unsafe { ops::model_context_length(handle) }, 512);
    unsafe { ops::session_free(handle) };
}

#[test]
fn test_load_failure_sets_last_error() {
    let (handle, stats) = new_session(Script::words(&["a"]).fail_context());
    assert!(!load(handle));
    assert!(!unsafe { ops::is_model_loaded(handle) });
    assert!(take(ops::last_error()).starts_with("Failed to create context"));
    assert!(ops::last_error().is_null());

    assert!(!unsafe { ops::load_model(handle, ptr::null(), 0, 0, 0) });
    assert_eq!(take(ops::last_error()), "model path is null");

    unsafe { ops::session_free(handle) };
    assert!(stats.balanced());
}

#[test]
fn test_null_session_is_tolerated() {
    let path = CString::new("m.gguf").unwrap();
    unsafe {
        assert!(!ops::load_model(NULL, path.as_ptr(), 0, 0, 0));
        ops::unload_model(NULL);
        assert!(!ops::is_model_loaded(NULL));
        assert!(!ops::is_generating(NULL));
        ops::cancel_generation(NULL);
        ops::set_token_callback(NULL, Some(collect), ptr::null_mut());
        ops::generate_text_streaming(NULL, path.as_ptr(), 4, 0.8, 0.9, 40, 1.0);
        assert_eq!(ops::model_vocab_size(NULL), 0);
        assert_eq!(ops::model_context_length(NULL), 0);
        ops::session_free(ptr::null_mut::<Session<ScriptedEngine>>());
        ops::string_free(ptr::null_mut());
    }
    assert_eq!(take(unsafe { ops::model_name(NULL) }), "");
    assert_eq!(
        take(unsafe { ops::generate_text(NULL, path.as_ptr(), 4, 0.8, 0.9, 40, 1.0) }),
        ""
    );
}

#[test]
fn test_cancel_modes() {
    assert!(ops::session_new(|| ScriptedEngine::new(Script::words(&[])), 7).is_null());
    assert!(take(ops::last_error()).contains("unknown cancel mode 7"));

    let handle = ops::session_new(|| ScriptedEngine::new(Script::words(&["a"])), CANCEL_CLEAR_FLAG);
    let session = unsafe { &*handle };
    assert_eq!(session.cancel_mode(), lina_core::CancelMode::ClearFlag);
    assert!(load(handle));
    unsafe { ops::cancel_generation(handle) };
    assert!(!unsafe { ops::is_generating(handle) });
    unsafe { ops::session_free(handle) };
}

#[test]
fn test_panicking_engine_is_contained() {
    let handle = ops::session_new::<ScriptedEngine>(|| panic!("engine init failed"), CANCEL_STOP_REQUEST);
    assert!(handle.is_null());
    assert!(take(ops::last_error()).contains("engine init failed"));
}

#[test]
fn test_interior_nul_in_fragment_is_dropped() {
    let (handle, _stats) = new_session(Script::words(&["a\0b"]));
    assert!(load(handle));
    assert_eq!(generate(handle, "x", 4), "ab");
    unsafe { ops::session_free(handle) };
}

#[test]
fn test_version() {
    let version = unsafe { CStr::from_ptr(ops::version()) };
    assert_eq!(version.to_str().unwrap(), env!("CARGO_PKG_VERSION"));
}
