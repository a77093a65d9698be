//! Module loader.
//!
//! - Detect whether the bytes are a `.wasm` binary or `.wat` text.
//! - Convert WAT to WASM (via the `wat` crate).
//! - Compile a wasmtime `Module`.
//!
//! File extensions are not trusted; the bytes themselves are sniffed.

use std::path::Path;

use thiserror::Error;
use wasmtime::{Engine, Module};

/// Boot-level failure to produce a compiled module.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read module {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// Empty input or neither WASM nor WAT.
    #[error("unrecognized module format (expected wasm or wat)")]
    UnrecognizedFormat,
    #[error("failed to parse WAT: {0}")]
    WatParseFailed(#[from] wat::Error),
    #[error("failed to compile WASM module: {0}")]
    CompileFailed(anyhow::Error),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DetectedFormat {
    Wasm,
    Wat,
}

/// Detected format plus the bytes, always valid WASM afterwards.
#[derive(Clone, Debug)]
pub struct Detected {
    pub format: DetectedFormat,
    pub wasm_bytes: Vec<u8>,
}

/// Read a module from disk and compile it.
pub fn load_file(engine: &Engine, path: &Path) -> Result<Module, LoadError> {
    let bytes = std::fs::read(path).map_err(|source| LoadError::Read {
        path: path.display().to_string(),
        source,
    })?;
    compile_module(engine, &bytes)
}

/// Detect, convert if needed, compile.
pub fn compile_module(engine: &Engine, bytes: &[u8]) -> Result<Module, LoadError> {
    let Detected { format, wasm_bytes } = normalize_to_wasm(bytes)?;
    tracing::debug!(?format, len = wasm_bytes.len(), "compiling guest module");
    Module::new(engine, &wasm_bytes).map_err(LoadError::CompileFailed)
}

pub fn normalize_to_wasm(bytes: &[u8]) -> Result<Detected, LoadError> {
    let format = detect_format(bytes).ok_or(LoadError::UnrecognizedFormat)?;
    let wasm_bytes = match format {
        DetectedFormat::Wasm => bytes.to_vec(),
        DetectedFormat::Wat => wat::parse_bytes(bytes)?.into_owned(),
    };
    Ok(Detected { format, wasm_bytes })
}

/// Best-effort detection.
///
/// - `\0asm` magic: WASM.
/// - Otherwise, after a UTF-8 BOM and leading whitespace or `;;` line
///   comments, a `(` means WAT.
pub fn detect_format(bytes: &[u8]) -> Option<DetectedFormat> {
    if bytes.starts_with(b"\0asm") {
        return Some(DetectedFormat::Wasm);
    }
    let i = skip_preamble(bytes);
    (bytes.get(i) == Some(&b'(')).then_some(DetectedFormat::Wat)
}

fn skip_preamble(bytes: &[u8]) -> usize {
    let mut i = if bytes.starts_with(b"\xEF\xBB\xBF") { 3 } else { 0 };
    while i < bytes.len() {
        match bytes[i] {
            b' ' | b'\t' | b'\r' | b'\n' => i += 1,
            b';' if bytes.get(i + 1) == Some(&b';') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            _ => break,
        }
    }
    i
}
