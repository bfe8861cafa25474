//! Tokenization helpers.

use std::ffi::CString;

use crate::LlamaToken;
use crate::error::{LlamaError, Result};
use crate::model::LlamaModel;

/// Tokenize `text` with the model's vocabulary.
///
/// `add_special` prepends BOS (when the vocabulary uses one);
/// `parse_special` turns control-token text such as `<|im_start|>` into the
/// matching token ids.
pub fn tokenize(
    model: &LlamaModel,
    text: &str,
    add_special: bool,
    parse_special: bool,
) -> Result<Vec<LlamaToken>> {
    let vocab = model.vocab();
    let c_text = CString::new(text)
        .map_err(|_| LlamaError::TokenizationFailed("text contains a NUL byte".into()))?;
    let text_len = i32::try_from(text.len())
        .map_err(|_| LlamaError::TokenizationFailed("text too long".into()))?;

    // Sizing call: a negative result is the required token count.
    let needed = unsafe {
        llama_sys::llama_tokenize(
            vocab,
            c_text.as_ptr(),
            text_len,
            std::ptr::null_mut(),
            0,
            add_special,
            parse_special,
        )
    };
    let capacity = needed.unsigned_abs() as usize;
    let mut tokens = vec![0 as LlamaToken; capacity];

    let actual = unsafe {
        llama_sys::llama_tokenize(
            vocab,
            c_text.as_ptr(),
            text_len,
            tokens.as_mut_ptr(),
            tokens.len() as i32,
            add_special,
            parse_special,
        )
    };
    if actual < 0 {
        return Err(LlamaError::TokenizationFailed(format!(
            "llama_tokenize returned {actual}"
        )));
    }

    tokens.truncate(actual as usize);
    Ok(tokens)
}

/// Convert a single token id to its text piece, rendering special tokens.
///
/// Pieces that end inside a multi-byte character are decoded lossily.
pub fn token_to_piece(model: &LlamaModel, token: LlamaToken) -> Result<String> {
    let vocab = model.vocab();
    let mut buf = vec![0u8; 256];
    let mut len = unsafe {
        llama_sys::llama_token_to_piece(
            vocab,
            token,
            buf.as_mut_ptr().cast(),
            buf.len() as i32,
            0,    // lstrip
            true, // special
        )
    };

    if len < 0 {
        // Buffer too small: -len is the size needed.
        buf.resize(len.unsigned_abs() as usize, 0);
        len = unsafe {
            llama_sys::llama_token_to_piece(
                vocab,
                token,
                buf.as_mut_ptr().cast(),
                buf.len() as i32,
                0,
                true,
            )
        };
        if len < 0 {
            return Err(LlamaError::PieceConversionFailed(token));
        }
    }

    buf.truncate(len as usize);
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
