//! Stage containers: one compressed `.npz` archive per stage output, with
//! arrays decoded by name on demand.

use crate::types::{HsiError, HsiResult};
use ndarray::{Array, ArrayBase, Data, Dimension, OwnedRepr};
use ndarray_npy::{
    NpzReader, NpzWriter, ReadNpyError, ReadNpzError, ReadableElement, WritableElement,
    WriteNpzError,
};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use zip::result::ZipError;

const NPY_SUFFIX: &str = ".npy";

fn read_error(name: &str, err: ReadNpzError) -> HsiError {
    match err {
        ReadNpzError::Zip(ZipError::FileNotFound) => HsiError::MissingField(name.to_string()),
        ReadNpzError::Zip(e) => HsiError::Zip(e),
        ReadNpzError::Npy(ReadNpyError::WrongNdim(expected, actual)) => HsiError::Shape(format!(
            "Entry '{}' has {} dimensions, expected {:?}",
            name, actual, expected
        )),
        ReadNpzError::Npy(ReadNpyError::WrongDescriptor(descr)) => HsiError::InvalidFormat(
            format!("Entry '{}' has unexpected dtype {}", name, descr),
        ),
        other => HsiError::InvalidFormat(format!("Entry '{}': {}", name, other)),
    }
}

fn write_error(name: &str, err: WriteNpzError) -> HsiError {
    match err {
        WriteNpzError::Zip(e) => HsiError::Zip(e),
        other => HsiError::InvalidFormat(format!("Cannot write entry '{}': {}", name, other)),
    }
}

/// Writer of a multi-array container (deflate-compressed `.npz`)
pub struct ArchiveWriter {
    npz: NpzWriter<BufWriter<File>>,
    path: PathBuf,
}

impl ArchiveWriter {
    pub fn create<P: AsRef<Path>>(path: P) -> HsiResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = File::create(&path)?;
        log::debug!("Creating container {}", path.display());

        Ok(Self {
            npz: NpzWriter::new_compressed(BufWriter::new(file)),
            path,
        })
    }

    /// Store an array under `name`
    pub fn write_array<A, S, D>(&mut self, name: &str, array: &ArrayBase<S, D>) -> HsiResult<()>
    where
        A: WritableElement,
        S: Data<Elem = A>,
        D: Dimension,
    {
        self.npz
            .add_array(name, array)
            .map_err(|e| write_error(name, e))?;
        log::debug!("  {}: {:?}", name, array.shape());
        Ok(())
    }

    pub fn finish(self) -> HsiResult<()> {
        let mut inner = self
            .npz
            .finish()
            .map_err(|e| write_error("<central directory>", e))?;
        inner.flush()?;
        log::info!("Saved container {}", self.path.display());
        Ok(())
    }
}

/// Reader of a multi-array container; entries are decoded on demand
pub struct ArchiveReader {
    npz: NpzReader<BufReader<File>>,
    entries: Vec<String>,
    path: PathBuf,
}

impl ArchiveReader {
    pub fn open<P: AsRef<Path>>(path: P) -> HsiResult<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(HsiError::MissingInput(path));
        }

        let mut npz = NpzReader::new(BufReader::new(File::open(&path)?))
            .map_err(|e| read_error(&path.display().to_string(), e))?;
        let entries = npz
            .names()
            .map_err(|e| read_error(&path.display().to_string(), e))?;
        log::debug!("Opened container {} ({} entries)", path.display(), entries.len());

        Ok(Self { npz, entries, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Array names without the `.npy` suffix
    pub fn names(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|n| n.trim_end_matches(NPY_SUFFIX).to_string())
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entry(name).is_some()
    }

    /// Archive entry holding array `name`, with or without the suffix
    fn entry(&self, name: &str) -> Option<&str> {
        let suffixed = format!("{}{}", name, NPY_SUFFIX);
        self.entries
            .iter()
            .find(|e| e.as_str() == name || **e == suffixed)
            .map(String::as_str)
    }

    /// Decode one entry into an array of element type `A` and dimensionality `D`
    pub fn read_array<A, D>(&mut self, name: &str) -> HsiResult<Array<A, D>>
    where
        A: ReadableElement,
        D: Dimension,
    {
        let entry = self
            .entry(name)
            .ok_or_else(|| HsiError::MissingField(name.to_string()))?
            .to_string();
        self.npz
            .by_name::<OwnedRepr<A>, D>(&entry)
            .map_err(|e| read_error(name, e))
    }
}
