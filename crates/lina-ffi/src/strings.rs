use std::cell::RefCell;
use std::ffi::{CStr, CString, c_char};

thread_local! {
    static LAST_ERROR: RefCell<Option<String>> = const { RefCell::new(None) };
}

pub(crate) fn set_last_error(message: impl Into<String>) {
    LAST_ERROR.with(|e| *e.borrow_mut() = Some(message.into()));
}

pub(crate) fn take_last_error() -> Option<String> {
    LAST_ERROR.with(|e| e.borrow_mut().take())
}

/// Copy a C string, replacing invalid UTF-8. `None` for null.
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated string.
pub(crate) unsafe fn read_c_str(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    let text = unsafe { CStr::from_ptr(ptr) };
    Some(text.to_string_lossy().into_owned())
}

/// `text` as a C string; interior NULs are dropped.
pub(crate) fn c_string(text: &str) -> CString {
    CString::new(text).unwrap_or_else(|_| CString::new(text.replace('\0', "")).unwrap_or_default())
}

/// Hand `text` to C. The caller releases it with `lina_string_free`.
pub(crate) fn into_c_char(text: &str) -> *mut c_char {
    c_string(text).into_raw()
}

/// # Safety
/// `ptr` must be null or come from [`into_c_char`] and not be freed yet.
pub(crate) unsafe fn free_c_char(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(unsafe { CString::from_raw(ptr) });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interior_nul_is_dropped() {
        assert_eq!(c_string("a\0b").to_str().unwrap(), "ab");
    }

    #[test]
    fn test_round_trip_through_raw() {
        let raw = into_c_char("héllo");
        assert_eq!(unsafe { read_c_str(raw) }.as_deref(), Some("héllo"));
        unsafe { free_c_char(raw) };
        unsafe { free_c_char(std::ptr::null_mut()) };
    }

    #[test]
    fn test_last_error_is_taken_once() {
        set_last_error("boom");
        assert_eq!(take_last_error().as_deref(), Some("boom"));
        assert_eq!(take_last_error(), None);
    }
}
