//! Safe RAII wrapper around `llama_model`.

use std::ffi::{CString, c_char};
use std::path::Path;

use tracing::{debug, info};

use crate::LlamaToken;
use crate::error::{LlamaError, Result};

/// Owns a `llama_model` pointer and frees it on drop.
pub struct LlamaModel {
    ptr: *mut llama_sys::llama_model,
}

// Safety: llama_model is internally read-only after creation.
unsafe impl Send for LlamaModel {}
unsafe impl Sync for LlamaModel {}

impl LlamaModel {
    /// Load a GGUF model from `path`.
    pub fn load_from_file(path: &Path, params: &ModelParams) -> Result<Self> {
        let load_failed = |reason: &str| LlamaError::ModelLoadFailed {
            path: path.display().to_string(),
            reason: reason.into(),
        };
        let path_str = path
            .to_str()
            .ok_or_else(|| load_failed("invalid UTF-8 in path"))?;
        let c_path = CString::new(path_str).map_err(|_| load_failed("path contains a NUL byte"))?;

        let mut raw = unsafe { llama_sys::llama_model_default_params() };
        raw.n_gpu_layers = params.n_gpu_layers;
        raw.use_mmap = params.use_mmap;

        info!(path = %path.display(), n_gpu_layers = params.n_gpu_layers, "Loading model");
        let ptr = unsafe { llama_sys::llama_model_load_from_file(c_path.as_ptr(), raw) };
        if ptr.is_null() {
            return Err(load_failed("llama_model_load_from_file returned null"));
        }

        Ok(Self { ptr })
    }

    pub(crate) fn as_ptr(&self) -> *mut llama_sys::llama_model {
        self.ptr
    }

    /// Vocabulary handle (valid for the lifetime of the model).
    pub(crate) fn vocab(&self) -> *const llama_sys::llama_vocab {
        unsafe { llama_sys::llama_model_get_vocab(self.ptr) }
    }

    pub fn n_vocab(&self) -> i32 {
        unsafe { llama_sys::llama_vocab_n_tokens(self.vocab()) }
    }

    /// True for any end-of-generation token (EOS, EOT, ...).
    pub fn is_eog(&self, token: LlamaToken) -> bool {
        unsafe { llama_sys::llama_vocab_is_eog(self.vocab(), token) }
    }

    //  Metadata

    pub fn meta_count(&self) -> i32 {
        unsafe { llama_sys::llama_model_meta_count(self.ptr) }
    }

    /// Key of the metadata entry at `index`.
    pub fn meta_key_by_index(&self, index: i32) -> Option<String> {
        read_c_string(|buf, len| unsafe {
            llama_sys::llama_model_meta_key_by_index(self.ptr, index, buf, len)
        })
    }

    /// Value of the metadata entry at `index`, rendered as a string.
    pub fn meta_val_str_by_index(&self, index: i32) -> Option<String> {
        read_c_string(|buf, len| unsafe {
            llama_sys::llama_model_meta_val_str_by_index(self.ptr, index, buf, len)
        })
    }
}

impl Drop for LlamaModel {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            debug!("Freeing llama model");
            unsafe { llama_sys::llama_model_free(self.ptr) }
        }
    }
}

/// Drive an snprintf-style accessor: returns the full string length (which
/// may exceed the buffer) or a negative value when the entry is missing.
fn read_c_string(mut fill: impl FnMut(*mut c_char, usize) -> i32) -> Option<String> {
    let mut buf = vec![0u8; 256];
    let mut len = fill(buf.as_mut_ptr().cast(), buf.len());
    if len < 0 {
        return None;
    }
    if len as usize >= buf.len() {
        buf.resize(len as usize + 1, 0);
        len = fill(buf.as_mut_ptr().cast(), buf.len());
        if len < 0 {
            return None;
        }
    }
    buf.truncate(len as usize);
    Some(String::from_utf8_lossy(&buf).into_owned())
}

//  ModelParams

/// Parameters for [`LlamaModel::load_from_file`].
#[derive(Debug, Clone)]
pub struct ModelParams {
    /// Layers to offload to GPU. -1 = all.
    pub n_gpu_layers: i32,
    /// Use memory-mapped I/O.
    pub use_mmap: bool,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            n_gpu_layers: -1,
            use_mmap: true,
        }
    }
}
