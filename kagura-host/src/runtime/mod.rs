//! Wasmtime runtime glue.
//!
//! - Create the `Engine` with the proposals guests commonly need.
//! - Define the host imports (see [`crate::abi`]) on a `Linker<Bridge>`.
//! - Instantiate the module with the bridge as store data and drive the
//!   guest's frame, audio and shutdown entrypoints.

pub mod imports;
#[allow(clippy::module_inception)]
pub mod runtime;

pub use runtime::{WasmtimeRuntime, engine};
