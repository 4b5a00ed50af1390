//! Patch overlay and archive rebuilder for KINGDOM disc images.
//!
//! This crate merges patch packages into a [`PatchOverlay`] and rebuilds a base
//! container into a new, self-consistent image:
//!
//! - **Last-write-wins**: later packages replace earlier definitions of a hash
//! - **Copy-through**: untouched entries are streamed from the base container
//! - **Recompression**: raw payloads replacing compressed entries are compressed
//! - **Relinks**: aliases share another entry's stored bytes
//! - **Header mirrors**: secondary copies of entry locations are backpatched
//! - **Commit or discard**: the output only survives a successful finalize
//!
//! # Example
//!
//! ```no_run
//! use khp_archive::{BaseArchive, ContainerLayout, SignatureScan};
//! use khp_overlay::{ArchiveRebuilder, CancellationToken, PatchOverlay};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let layout = ContainerLayout::default();
//! let mut base = BaseArchive::open("KHFM.ISO", layout.clone(), &SignatureScan)?;
//! let (overlay, failures) = PatchOverlay::open_packages(["english.kh1patch"]);
//! for failure in &failures {
//!     eprintln!("skipped {}: {}", failure.path, failure.error);
//! }
//!
//! let report = ArchiveRebuilder::new(layout)
//!     .with_progress(|progress| {
//!         println!("{:?} {}/{}", progress.stage, progress.current, progress.total);
//!     })
//!     .rebuild(&mut base, overlay, "KHFM.patched.ISO", &CancellationToken::new())?;
//! println!("Replaced {}, relinked {}", report.replaced, report.relinked);
//! # Ok(())
//! # }
//! ```

pub mod builder;
mod cancel;
pub mod error;
pub mod overlay;
pub mod session;

#[cfg(test)]
mod test_support;

pub use builder::{ArchiveRebuilder, RebuildOptions, RebuildProgress, RebuildReport, RebuildStage};
pub use cancel::CancellationToken;
pub use error::{Error, Result};
pub use overlay::{OverlayEntry, PackageLoadFailure, PatchOverlay, Resolution};
pub use session::{DurableWrite, FileOutput, FinalizeSummary, HeaderSource, RebuildSession, SessionState};
