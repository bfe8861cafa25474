use std::ffi::{c_char, c_void};

use lina_core::TokenSink;

use crate::strings::c_string;

/// Host function receiving each fragment. `fragment` is only valid for the
/// duration of the call.
pub type TokenCallback = unsafe extern "C" fn(fragment: *const c_char, user_data: *mut c_void);

/// Adapts a C callback and its opaque context pointer to a [`TokenSink`].
#[derive(Debug)]
pub struct CallbackSink {
    callback: TokenCallback,
    user_data: *mut c_void,
}

// The host guarantees that `user_data` may be used from whichever thread
// runs the generation; the pointer is never dereferenced on this side.
unsafe impl Send for CallbackSink {}
unsafe impl Sync for CallbackSink {}

impl CallbackSink {
    pub fn new(callback: TokenCallback, user_data: *mut c_void) -> Self {
        Self {
            callback,
            user_data,
        }
    }
}

impl TokenSink for CallbackSink {
    fn on_fragment(&self, fragment: &str) {
        let text = c_string(fragment);
        unsafe { (self.callback)(text.as_ptr(), self.user_data) }
    }
}
