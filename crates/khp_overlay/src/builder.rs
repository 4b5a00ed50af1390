//! Rebuild driver.
//!
//! The [`ArchiveRebuilder`] walks the base record table and feeds a
//! [`RebuildSession`] from the base container and a [`PatchOverlay`].
//!
//! # Rebuild Algorithm
//!
//! 1. Check that the base table indexes itself under the layout's table hash.
//! 2. Write the header (copied from the base or taken from a header file).
//! 3. For each base record in physical order, polling cancellation first:
//!    - skip the image record, which the session recreates;
//!    - at the table record, reserve the new table for every base record plus
//!      every new primary hash the base lacks;
//!    - otherwise resolve the hash against the overlay and copy the base bytes,
//!      relink, or write the patch payload (recompressing raw payloads when the
//!      base entry was compressed, or when the layout forces compression).
//!      Base records sharing the bytes of an earlier copied record stay aliases.
//! 4. Emit the overlay's new primary hashes not visited yet.
//! 5. Finalize the session.

use crate::cancel::CancellationToken;
use crate::error::{Error, Result};
use crate::overlay::{PatchOverlay, Resolution};
use crate::session::{DurableWrite, FileOutput, HeaderSource, RebuildSession};
use camino::{Utf8Path, Utf8PathBuf};
use khp_archive::{ArchiveError, ArchiveRecord, BaseArchive, ContainerLayout, COMPRESSED_FLAG};
use khp_patch::ParentStore;
use std::collections::{HashMap, HashSet};
use std::io::{Read, Seek};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Knobs of a rebuild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildOptions {
    /// Recompress raw patch payloads that replace compressed base entries.
    pub recompress: bool,
    /// Keep header mirrors and volume size fields in sync.
    pub update_headers: bool,
    pub header: HeaderSource,
}

impl Default for RebuildOptions {
    fn default() -> Self {
        Self {
            recompress: true,
            update_headers: true,
            header: HeaderSource::FromBase,
        }
    }
}

/// Progress information emitted during a rebuild.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RebuildProgress {
    pub stage: RebuildStage,
    /// 1-based index of the record being processed in the current stage.
    pub current: u32,
    pub total: u32,
}

/// Stages of a rebuild.
///
/// Emitted in order: `WritingHeader` -> `CopyingEntries` (repeated) ->
/// `AddingEntries` (repeated) -> `Finalizing` -> `Complete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RebuildStage {
    WritingHeader,
    /// Walking the base record table.
    CopyingEntries,
    /// Writing entries the base does not have.
    AddingEntries,
    Finalizing,
    Complete,
}

/// Summary returned after a rebuild completes.
#[derive(Debug, Clone)]
pub struct RebuildReport {
    /// The written container, `None` for in-memory rebuilds.
    pub output: Option<Utf8PathBuf>,
    pub data_offset: u64,
    pub table_offset: u64,
    pub table_size: u64,
    /// Base entries copied unchanged.
    pub copied: usize,
    /// Base entries replaced by patch payloads.
    pub replaced: usize,
    /// Payloads compressed during the rebuild.
    pub recompressed: usize,
    /// New entries written from the overlay.
    pub added: usize,
    /// Patch relinks written to the table.
    pub relinked: usize,
    /// Base aliases kept as aliases.
    pub aliased: usize,
    pub relinks_skipped: usize,
    /// `(source, target)` of every relink whose target never appeared.
    pub unresolved_relinks: Vec<(u32, u32)>,
    /// New entries for the container's own file system, which a rebuild cannot place.
    pub container_entries_skipped: usize,
    pub total_len: u64,
    pub build_time: Duration,
}

#[derive(Debug, Default)]
struct RebuildStats {
    copied: usize,
    replaced: usize,
    recompressed: usize,
    added: usize,
    relinked: usize,
    aliased: usize,
}

type ProgressCallback = Arc<dyn Fn(RebuildProgress) + Send + Sync>;

/// Rebuilds a container from a base archive and a patch overlay.
pub struct ArchiveRebuilder {
    layout: ContainerLayout,
    options: RebuildOptions,
    progress_callback: Option<ProgressCallback>,
}

impl ArchiveRebuilder {
    pub fn new(layout: ContainerLayout) -> Self {
        Self {
            layout,
            options: RebuildOptions::default(),
            progress_callback: None,
        }
    }

    pub fn with_options(mut self, options: RebuildOptions) -> Self {
        self.options = options;
        self
    }

    /// Register a progress callback.
    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(RebuildProgress) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Arc::new(callback));
        self
    }

    /// Rebuild into a new file at `output_path`.
    ///
    /// The file is deleted again unless the rebuild finalizes.
    pub fn rebuild<R: Read + Seek, P: Read + Seek>(
        &self,
        base: &mut BaseArchive<R>,
        overlay: PatchOverlay<P>,
        output_path: impl AsRef<Utf8Path>,
        cancel: &CancellationToken,
    ) -> Result<RebuildReport> {
        let output_path = output_path.as_ref();
        tracing::info!("Output: {}", output_path);

        let mut output = FileOutput::create(output_path)?;
        let mut report = self.rebuild_into(base, overlay, &mut output, cancel)?;
        output.commit();

        report.output = Some(output_path.to_path_buf());
        Ok(report)
    }

    /// Rebuild into an empty writer. See the module docs for the algorithm.
    pub fn rebuild_into<R: Read + Seek, P: Read + Seek, W: DurableWrite>(
        &self,
        base: &mut BaseArchive<R>,
        mut overlay: PatchOverlay<P>,
        output: W,
        cancel: &CancellationToken,
    ) -> Result<RebuildReport> {
        let start_time = Instant::now();
        let layout = &self.layout;

        if !base.table().contains(layout.table_hash) {
            return Err(ArchiveError::CorruptTable(format!(
                "record table does not index itself under {:08x}",
                layout.table_hash
            ))
            .into());
        }

        let records: Vec<ArchiveRecord> = base.table().records().to_vec();
        let new_entries = overlay
            .new_hashes(ParentStore::Primary)
            .filter(|hash| !base.table().contains(*hash))
            .count();
        let capacity = records.len() + new_entries;

        tracing::info!("Rebuilding archive...");
        tracing::info!("Base records: {}", records.len());
        tracing::info!(
            "Overlay: {} packages, {} hashes, {} new",
            overlay.package_count(),
            overlay.len(),
            new_entries
        );

        self.emit_progress(RebuildStage::WritingHeader, 0, 0);
        let mut session = RebuildSession::new(output, layout.clone(), self.options.update_headers);
        session.write_header(&self.options.header, base)?;

        let mut stats = RebuildStats::default();
        let mut visited = HashSet::with_capacity(capacity);
        let mut copied_blocks: HashMap<(u32, u32, u32), u32> = HashMap::new();

        let total = records.len() as u32;
        for (index, record) in records.iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::info!("Rebuild cancelled at base record {}/{}", index + 1, total);
                return Err(Error::Cancelled);
            }
            self.emit_progress(RebuildStage::CopyingEntries, index as u32 + 1, total);

            if Some(record.hash) == layout.image_hash {
                continue;
            }
            if !visited.insert(record.hash) {
                tracing::warn!(
                    "Skipping duplicate base record {:08x} at block {}",
                    record.hash,
                    record.block
                );
                continue;
            }
            if record.hash == layout.table_hash {
                session.reserve_table(capacity)?;
                continue;
            }

            if overlay.resolve(record.hash) == Resolution::NotOverridden {
                let key = (record.block, record.size, record.flags);
                if let Some(&target) = copied_blocks.get(&key) {
                    session.request_relink(record.hash, target)?;
                    stats.aliased += 1;
                    continue;
                }
                copied_blocks.insert(key, record.hash);
            }

            self.emit_entry(&mut session, base, &mut overlay, record.hash, Some(record), &mut stats)?;
        }

        let added: Vec<u32> = overlay
            .new_hashes(ParentStore::Primary)
            .filter(|hash| !visited.contains(hash))
            .collect();
        let total = added.len() as u32;
        for (index, &hash) in added.iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::info!("Rebuild cancelled at new entry {}/{}", index + 1, total);
                return Err(Error::Cancelled);
            }
            self.emit_progress(RebuildStage::AddingEntries, index as u32 + 1, total);
            visited.insert(hash);
            self.emit_entry(&mut session, base, &mut overlay, hash, None, &mut stats)?;
        }

        let container_entries_skipped = overlay.new_hashes(ParentStore::Container).count();
        if container_entries_skipped > 0 {
            tracing::warn!(
                "Skipping {} new entries for the container file system",
                container_entries_skipped
            );
        }
        drop(overlay);

        self.emit_progress(RebuildStage::Finalizing, 0, 0);
        let summary = session.finalize()?;
        stats.relinked += summary.resolved_late;

        let build_time = start_time.elapsed();
        tracing::info!(
            "Rebuilt archive: copied={} replaced={} recompressed={} added={} relinked={} aliased={} relinks_skipped={} elapsed_ms={}",
            stats.copied,
            stats.replaced,
            stats.recompressed,
            stats.added,
            stats.relinked,
            stats.aliased,
            summary.unresolved.len(),
            build_time.as_millis()
        );
        self.emit_progress(RebuildStage::Complete, 0, 0);

        Ok(RebuildReport {
            output: None,
            data_offset: session.data_offset(),
            table_offset: summary.table_offset,
            table_size: summary.table_size,
            copied: stats.copied,
            replaced: stats.replaced,
            recompressed: stats.recompressed,
            added: stats.added,
            relinked: stats.relinked,
            aliased: stats.aliased,
            relinks_skipped: summary.unresolved.len(),
            unresolved_relinks: summary.unresolved,
            container_entries_skipped,
            total_len: summary.total_len,
            build_time,
        })
    }

    /// Copy, relink or replace one hash.
    fn emit_entry<R: Read + Seek, P: Read + Seek, W: DurableWrite>(
        &self,
        session: &mut RebuildSession<W>,
        base: &mut BaseArchive<R>,
        overlay: &mut PatchOverlay<P>,
        hash: u32,
        base_record: Option<&ArchiveRecord>,
        stats: &mut RebuildStats,
    ) -> Result<()> {
        match overlay.resolve(hash) {
            Resolution::NotOverridden => match base_record {
                Some(record) => {
                    session.emit_copy(base, record)?;
                    stats.copied += 1;
                }
                None => tracing::warn!("New entry {:08x} has nothing to write", hash),
            },
            Resolution::Relink(target) => {
                tracing::debug!("Relinking {:08x} to {:08x}", hash, target);
                if session.request_relink(hash, target)? {
                    stats.relinked += 1;
                }
            }
            Resolution::Replace(entry) => {
                let payload = overlay.read_payload(&entry)?;
                let base_compressed = base_record.is_some_and(|record| record.is_compressed());
                let compress = !entry.record.compressed
                    && ((self.options.recompress && base_compressed)
                        || self.layout.is_forced_compression(hash));

                if compress {
                    match khp_codec::compress(&payload) {
                        Ok(packed) => {
                            tracing::debug!(
                                "Compressed {:08x} from {} to {} bytes",
                                hash,
                                payload.len(),
                                packed.len()
                            );
                            session.emit_replace(hash, &packed, COMPRESSED_FLAG)?;
                            stats.recompressed += 1;
                        }
                        Err(e) if e.is_not_compressible() => {
                            tracing::info!("Cannot compress {:08x}, storing it raw: {}", hash, e);
                            session.emit_replace(hash, &payload, 0)?;
                        }
                        Err(e) => return Err(e.into()),
                    }
                } else {
                    let flags = if entry.record.compressed { COMPRESSED_FLAG } else { 0 };
                    session.emit_replace(hash, &payload, flags)?;
                }

                if base_record.is_some() {
                    stats.replaced += 1;
                } else {
                    stats.added += 1;
                }
            }
        }
        Ok(())
    }

    fn emit_progress(&self, stage: RebuildStage, current: u32, total: u32) {
        if let Some(callback) = &self.progress_callback {
            callback(RebuildProgress {
                stage,
                current,
                total,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{base_image, package, plain_layout, BaseEntry, TABLE_HASH};
    use khp_archive::{FixedOffsets, ContainerOffsets};
    use khp_patch::{LayoutRevision, PatchEntryBuilder};
    use std::io::Cursor;
    use std::sync::Mutex;

    const A: u32 = 0x100;
    const B: u32 = 0x200;
    const C: u32 = 0x300;
    const D: u32 = 0x400;

    fn init_logging() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn a_bytes() -> Vec<u8> {
        (0..2048u32).map(|i| (i % 251) as u8).collect()
    }

    /// Table at block 0, `A` at block 10 (2048 bytes), `B` at block 12 (4096 bytes).
    fn scenario_base(b_flags: u32) -> BaseArchive<Cursor<Vec<u8>>> {
        let layout = plain_layout();
        let (image, offsets) = base_image(
            &layout,
            0,
            &[
                BaseEntry::new(A, 0, 10, a_bytes()),
                BaseEntry::new(B, b_flags, 12, vec![0xBB; 4096]),
            ],
        );
        BaseArchive::from_reader(Cursor::new(image), layout, &offsets).unwrap()
    }

    fn run(
        rebuilder: &ArchiveRebuilder,
        base: &mut BaseArchive<Cursor<Vec<u8>>>,
        overlay: PatchOverlay<Cursor<Vec<u8>>>,
    ) -> (Vec<u8>, RebuildReport) {
        let mut out = Cursor::new(Vec::new());
        let report = rebuilder
            .rebuild_into(base, overlay, &mut out, &CancellationToken::new())
            .unwrap();
        (out.into_inner(), report)
    }

    fn reopen(bytes: Vec<u8>, report: &RebuildReport) -> BaseArchive<Cursor<Vec<u8>>> {
        let offsets = FixedOffsets(ContainerOffsets {
            data_offset: report.data_offset,
            table_offset: report.table_offset,
            table_size: report.table_size,
        });
        BaseArchive::from_reader(Cursor::new(bytes), plain_layout(), &offsets).unwrap()
    }

    fn table_region(bytes: &[u8], report: &RebuildReport) -> Vec<u8> {
        let start = report.table_offset as usize;
        bytes[start..start + report.table_size as usize].to_vec()
    }

    fn scenario_overlay() -> PatchOverlay<Cursor<Vec<u8>>> {
        let mut overlay = PatchOverlay::new();
        overlay.load(package(
            LayoutRevision::Extended,
            vec![
                (PatchEntryBuilder::new(B), vec![0x5A; 100]),
                (PatchEntryBuilder::relink(C, A).with_new(true), Vec::new()),
            ],
        ));
        overlay
    }

    #[test]
    fn test_replace_and_relink() {
        init_logging();
        let mut base = scenario_base(0);
        let (bytes, report) = run(&ArchiveRebuilder::new(plain_layout()), &mut base, scenario_overlay());

        assert_eq!(report.copied, 1);
        assert_eq!(report.replaced, 1);
        assert_eq!(report.relinked, 1);
        assert_eq!(report.added, 0);
        assert_eq!(report.relinks_skipped, 0);
        assert_eq!(report.data_offset, 2048);
        assert_eq!(report.table_offset, 2048);
        assert_eq!(report.table_size, 2048);
        // Header, table, A, B.
        assert_eq!(bytes.len(), 4 * 2048);
        assert_eq!(report.total_len, 4 * 2048);
        assert!(bytes[..2048].iter().all(|&b| b == 0xEE));

        // Records are stored sorted by hash.
        let table = table_region(&bytes, &report);
        let hashes: Vec<u32> = table
            .chunks(16)
            .map(|r| u32::from_le_bytes(r[..4].try_into().unwrap()))
            .take_while(|&h| h != 0)
            .collect();
        assert_eq!(hashes, vec![A, TABLE_HASH, B, C]);

        let mut rebuilt = reopen(bytes, &report);
        let a = *rebuilt.table().locate(A).unwrap();
        let b = *rebuilt.table().locate(B).unwrap();
        let c = *rebuilt.table().locate(C).unwrap();
        assert_eq!((a.block, a.size, a.flags), (1, 2048, 0));
        assert_eq!((b.block, b.size, b.flags), (2, 100, 0));
        assert_eq!(c, a.alias(C));

        assert_eq!(rebuilt.read_record(&a).unwrap(), a_bytes());
        assert_eq!(rebuilt.read_record(&b).unwrap(), vec![0x5A; 100]);
    }

    #[test]
    fn test_rebuild_is_idempotent() {
        let rebuilder = ArchiveRebuilder::new(plain_layout());
        let mut base = scenario_base(0);
        let (first, report) = run(&rebuilder, &mut base, scenario_overlay());

        let mut rebuilt = reopen(first.clone(), &report);
        let (second, second_report) = run(&rebuilder, &mut rebuilt, PatchOverlay::new());

        assert_eq!(second_report.copied, 2);
        assert_eq!(second_report.aliased, 1);
        assert_eq!(table_region(&first, &report), table_region(&second, &second_report));
        assert_eq!(first, second);
    }

    #[test]
    fn test_recompresses_raw_payloads() {
        let data = b"hello ".repeat(40);
        let overlay = || {
            let mut overlay = PatchOverlay::new();
            overlay.load(package(
                LayoutRevision::Classic,
                vec![(PatchEntryBuilder::new(B), data.clone())],
            ));
            overlay
        };

        let mut base = scenario_base(COMPRESSED_FLAG);
        let (bytes, report) = run(&ArchiveRebuilder::new(plain_layout()), &mut base, overlay());
        assert_eq!(report.recompressed, 1);
        let mut rebuilt = reopen(bytes, &report);
        let b = *rebuilt.table().locate(B).unwrap();
        assert!(b.is_compressed());
        let stored = rebuilt.read_record(&b).unwrap();
        assert!(stored.len() < data.len());
        assert_eq!(khp_codec::decompress(&stored, data.len()).unwrap(), data);

        let rebuilder = ArchiveRebuilder::new(plain_layout()).with_options(RebuildOptions {
            recompress: false,
            ..Default::default()
        });
        let mut base = scenario_base(COMPRESSED_FLAG);
        let (bytes, report) = run(&rebuilder, &mut base, overlay());
        assert_eq!(report.recompressed, 0);
        let mut rebuilt = reopen(bytes, &report);
        let b = *rebuilt.table().locate(B).unwrap();
        assert!(!b.is_compressed());
        assert_eq!(rebuilt.read_record(&b).unwrap(), data);
    }

    #[test]
    fn test_forced_compression() {
        let data = b"hello ".repeat(40);
        let mut overlay = PatchOverlay::new();
        overlay.load(package(
            LayoutRevision::Classic,
            vec![(PatchEntryBuilder::new(B), data.clone())],
        ));

        let layout = ContainerLayout {
            forced_compression: vec![B],
            ..plain_layout()
        };
        let rebuilder = ArchiveRebuilder::new(layout).with_options(RebuildOptions {
            recompress: false,
            ..Default::default()
        });
        let mut base = scenario_base(0);
        let (bytes, report) = run(&rebuilder, &mut base, overlay);
        assert_eq!(report.recompressed, 1);
        let rebuilt = reopen(bytes, &report);
        assert!(rebuilt.table().locate(B).unwrap().is_compressed());
    }

    #[test]
    fn test_incompressible_payload_is_stored_raw() {
        let data: Vec<u8> = (0..=255u8).collect();
        let mut overlay = PatchOverlay::new();
        overlay.load(package(
            LayoutRevision::Classic,
            vec![(PatchEntryBuilder::new(B), data.clone())],
        ));

        let mut base = scenario_base(COMPRESSED_FLAG);
        let (bytes, report) = run(&ArchiveRebuilder::new(plain_layout()), &mut base, overlay);
        assert_eq!(report.recompressed, 0);
        assert_eq!(report.replaced, 1);
        let mut rebuilt = reopen(bytes, &report);
        let b = *rebuilt.table().locate(B).unwrap();
        assert!(!b.is_compressed());
        assert_eq!(rebuilt.read_record(&b).unwrap(), data);
    }

    #[test]
    fn test_compressed_payload_passes_through() {
        let data = b"hello ".repeat(40);
        let mut overlay = PatchOverlay::new();
        overlay.load(package(
            LayoutRevision::Classic,
            vec![(PatchEntryBuilder::new(B).with_compression(true), data.clone())],
        ));

        let mut base = scenario_base(0);
        let (bytes, report) = run(&ArchiveRebuilder::new(plain_layout()), &mut base, overlay);
        assert_eq!(report.recompressed, 0);
        let mut rebuilt = reopen(bytes, &report);
        let b = *rebuilt.table().locate(B).unwrap();
        assert!(b.is_compressed());
        let stored = rebuilt.read_record(&b).unwrap();
        assert_eq!(khp_codec::decompress_blob(&stored).unwrap(), data);
    }

    #[test]
    fn test_new_entries() {
        let mut overlay = PatchOverlay::new();
        overlay.load(package(
            LayoutRevision::Extended,
            vec![
                (PatchEntryBuilder::new(D).with_new(true), vec![0x44; 3000]),
                // Already in the base: replaced in place, not added twice.
                (PatchEntryBuilder::new(A).with_new(true), vec![0x41; 10]),
                (
                    PatchEntryBuilder::new(0x500)
                        .with_new(true)
                        .with_parent(ParentStore::Container),
                    vec![0x55; 10],
                ),
            ],
        ));

        let mut base = scenario_base(0);
        let (bytes, report) = run(&ArchiveRebuilder::new(plain_layout()), &mut base, overlay);
        assert_eq!(report.added, 1);
        assert_eq!(report.replaced, 1);
        assert_eq!(report.copied, 1);
        assert_eq!(report.container_entries_skipped, 1);

        let mut rebuilt = reopen(bytes, &report);
        assert_eq!(rebuilt.table().len(), 4);
        let d = *rebuilt.table().locate(D).unwrap();
        assert_eq!(rebuilt.read_record(&d).unwrap(), vec![0x44; 3000]);
        assert!(rebuilt.table().locate(0x500).is_none());
    }

    #[test]
    fn test_unresolved_relink_is_reported() {
        let mut overlay = PatchOverlay::new();
        overlay.load(package(
            LayoutRevision::Classic,
            vec![(PatchEntryBuilder::relink(B, 0xDEAD), Vec::new())],
        ));

        let mut base = scenario_base(0);
        let (bytes, report) = run(&ArchiveRebuilder::new(plain_layout()), &mut base, overlay);
        assert_eq!(report.relinks_skipped, 1);
        assert_eq!(report.unresolved_relinks, vec![(B, 0xDEAD)]);
        let rebuilt = reopen(bytes, &report);
        assert!(rebuilt.table().locate(B).is_none());
    }

    #[test]
    fn test_progress_stages() {
        let stages = Arc::new(Mutex::new(Vec::new()));
        let sink = stages.clone();
        let rebuilder = ArchiveRebuilder::new(plain_layout()).with_progress(move |progress| {
            sink.lock().unwrap().push((progress.stage, progress.current, progress.total));
        });

        let mut base = scenario_base(0);
        run(&rebuilder, &mut base, scenario_overlay());

        let stages = stages.lock().unwrap();
        assert_eq!(
            *stages,
            vec![
                (RebuildStage::WritingHeader, 0, 0),
                (RebuildStage::CopyingEntries, 1, 3),
                (RebuildStage::CopyingEntries, 2, 3),
                (RebuildStage::CopyingEntries, 3, 3),
                (RebuildStage::AddingEntries, 1, 1),
                (RebuildStage::Finalizing, 0, 0),
                (RebuildStage::Complete, 0, 0),
            ]
        );
    }

    #[test]
    fn test_missing_table_record() {
        let layout = ContainerLayout {
            table_hash: 0x0BAD,
            ..plain_layout()
        };
        let mut base = scenario_base(0);
        let mut out = Cursor::new(Vec::new());
        let err = ArchiveRebuilder::new(layout)
            .rebuild_into(&mut base, scenario_overlay(), &mut out, &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, Error::Archive(ArchiveError::CorruptTable(_))));
        assert!(out.into_inner().is_empty());
    }

    #[test]
    fn test_rebuild_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("rebuilt.iso")).unwrap();

        let mut base = scenario_base(0);
        let report = ArchiveRebuilder::new(plain_layout())
            .rebuild(&mut base, scenario_overlay(), &path, &CancellationToken::new())
            .unwrap();
        assert_eq!(report.output.as_deref(), Some(path.as_path()));
        assert_eq!(std::fs::metadata(&path).unwrap().len(), report.total_len);
    }

    #[test]
    fn test_cancelled_rebuild_deletes_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("cancelled.iso")).unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let rebuilder = ArchiveRebuilder::new(plain_layout()).with_progress(move |progress| {
            if progress.stage == RebuildStage::CopyingEntries && progress.current == 2 {
                trigger.cancel();
            }
        });

        let mut base = scenario_base(0);
        let err = rebuilder
            .rebuild(&mut base, scenario_overlay(), &path, &cancel)
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(!path.exists());
    }
}
