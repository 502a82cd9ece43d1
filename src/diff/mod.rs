//! Thin contract around an external binary-diff engine.
//! `diff(old, new)` produces a non-empty opaque patch blob whenever
//! `old != new`; the patch format is opaque to the rest of this crate but
//! must match what the on-device applier expects.

use qbsdiff::{Bsdiff, Bspatch};

use crate::error::{OtaError, Result};

/// A reentrant binary-diff engine.
pub trait Differ: Send + Sync {
    /// Compute a patch that transforms `old` into `new`.
    fn diff(&self, old: &[u8], new: &[u8]) -> Result<Vec<u8>>;
    /// Apply a patch produced by [`Differ::diff`] to `old`, recovering `new`.
    fn apply(&self, old: &[u8], patch: &[u8]) -> Result<Vec<u8>>;
}

/// bsdiff/bspatch via the suffix-automaton algorithm (`qbsdiff`), a
/// pure-Rust reimplementation of the `minibsdiff` C extension the original
/// `bsdiff_chunk.py` wrapped.
#[derive(Debug, Default, Clone, Copy)]
pub struct BsdiffDiffer;

impl Differ for BsdiffDiffer {
    fn diff(&self, old: &[u8], new: &[u8]) -> Result<Vec<u8>> {
        let mut patch = Vec::new();
        Bsdiff::new(old, new)
            .compare(&mut patch)
            .map_err(|e| OtaError::ExternalFailure {
                adapter: "bsdiff",
                diagnostic: e.to_string(),
            })?;
        Ok(patch)
    }

    fn apply(&self, old: &[u8], patch: &[u8]) -> Result<Vec<u8>> {
        let patcher = Bspatch::new(patch).map_err(|e| OtaError::ExternalFailure {
            adapter: "bsdiff",
            diagnostic: e.to_string(),
        })?;
        let mut out = Vec::with_capacity(patcher.hint_target_size() as usize);
        patcher
            .apply(old, &mut out)
            .map_err(|e| OtaError::ExternalFailure {
                adapter: "bsdiff",
                diagnostic: e.to_string(),
            })?;
        Ok(out)
    }
}
