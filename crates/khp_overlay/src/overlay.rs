//! Last-write-wins merge of patch packages.

use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexSet;
use khp_patch::{ParentStore, PatchError, PatchPackage, PatchRecord};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek};

/// The winning record for a hash and the package that owns its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlayEntry {
    /// Index of the owning package in load order.
    pub package: usize,
    pub record: PatchRecord,
}

/// What the overlay says about one hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// No package touches the hash.
    NotOverridden,
    /// A package supplies the bytes.
    Replace(OverlayEntry),
    /// The hash aliases the stored bytes of the target hash.
    Relink(u32),
}

/// A package that could not be opened or parsed.
#[derive(Debug)]
pub struct PackageLoadFailure {
    pub path: Utf8PathBuf,
    pub error: PatchError,
}

#[derive(Debug)]
struct LoadedPackage<TSource: Read + Seek> {
    label: String,
    package: PatchPackage<TSource>,
}

/// Merged view over any number of patch packages.
///
/// Packages are loaded in order and a later package's record for a hash replaces
/// an earlier one. Dropping the overlay closes every package.
#[derive(Debug)]
pub struct PatchOverlay<TSource: Read + Seek = BufReader<File>> {
    packages: Vec<LoadedPackage<TSource>>,
    entries: HashMap<u32, OverlayEntry>,
    new_hashes: HashMap<ParentStore, IndexSet<u32>>,
}

impl<TSource: Read + Seek> Default for PatchOverlay<TSource> {
    fn default() -> Self {
        Self {
            packages: Vec::new(),
            entries: HashMap::new(),
            new_hashes: HashMap::new(),
        }
    }
}

impl PatchOverlay<BufReader<File>> {
    /// Open and load packages in the given order.
    ///
    /// A package that fails to open or parse is logged and returned as a
    /// [`PackageLoadFailure`]; the remaining packages are still loaded.
    pub fn open_packages<P: AsRef<Utf8Path>>(
        paths: impl IntoIterator<Item = P>,
    ) -> (Self, Vec<PackageLoadFailure>) {
        let mut overlay = Self::default();
        let mut failures = Vec::new();

        for path in paths {
            let path = path.as_ref();
            match PatchPackage::open(path) {
                Ok(package) => {
                    tracing::info!(
                        "Loaded patch package {} (release {}, {} records)",
                        path,
                        package.release,
                        package.records.len()
                    );
                    overlay.load_named(package, path.as_str());
                }
                Err(error) => {
                    tracing::warn!("Skipping patch package {}: {}", path, error);
                    failures.push(PackageLoadFailure {
                        path: path.to_path_buf(),
                        error,
                    });
                }
            }
        }

        (overlay, failures)
    }
}

impl<TSource: Read + Seek> PatchOverlay<TSource> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a package on top of the ones already loaded.
    pub fn load(&mut self, package: PatchPackage<TSource>) {
        let label = format!("package #{}", self.packages.len() + 1);
        self.load_named(package, label);
    }

    /// Load a package under a label used in log messages.
    pub fn load_named(&mut self, package: PatchPackage<TSource>, label: impl Into<String>) {
        let index = self.packages.len();
        let label = label.into();

        for record in &package.records {
            let entry = OverlayEntry {
                package: index,
                record: *record,
            };
            if let Some(previous) = self.entries.insert(record.hash, entry) {
                let previous_label = self
                    .packages
                    .get(previous.package)
                    .map_or(label.as_str(), |p| p.label.as_str());
                tracing::warn!(
                    "{:08x} from {} replaces the entry from {}",
                    record.hash,
                    label,
                    previous_label
                );
            }
            if record.is_new {
                self.new_hashes
                    .entry(record.parent)
                    .or_default()
                    .insert(record.hash);
            }
        }

        self.packages.push(LoadedPackage { label, package });
    }

    pub fn resolve(&self, hash: u32) -> Resolution {
        match self.entries.get(&hash) {
            None => Resolution::NotOverridden,
            Some(entry) => match entry.record.relink_target {
                Some(target) => Resolution::Relink(target),
                None => Resolution::Replace(*entry),
            },
        }
    }

    /// Read the stored payload of an entry from its package.
    pub fn read_payload(&mut self, entry: &OverlayEntry) -> Result<Box<[u8]>, PatchError> {
        let package = self
            .packages
            .get_mut(entry.package)
            .ok_or(PatchError::NoPayload(entry.record.hash))?;
        package.package.load_record_raw(&entry.record)
    }

    /// Hashes flagged new for `parent`, in first-seen order.
    pub fn new_hashes(&self, parent: ParentStore) -> impl Iterator<Item = u32> + '_ {
        self.new_hashes
            .get(&parent)
            .into_iter()
            .flat_map(|hashes| hashes.iter().copied())
    }

    /// Number of distinct hashes touched by the loaded packages.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn package_count(&self) -> usize {
        self.packages.len()
    }
}

impl<TSource: Read + Seek> Drop for PatchOverlay<TSource> {
    fn drop(&mut self) {
        if !self.packages.is_empty() {
            tracing::debug!("Releasing {} patch packages", self.packages.len());
        }
    }
}
