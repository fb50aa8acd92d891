//! An index of compiled shader binaries and their symbol files.
//!
//! A [`SymbolDatabase`] is built once from a set of directories and is
//! read-only afterwards. Shader binaries (`.cso`) are indexed by the 64-bit
//! XXH3 hash of their contents, which is what GPU crash dumps record for the
//! shaders that were running. Symbol files (`.pdb`, `.lld`) are indexed by
//! file name, which is the debug name a compiled shader container carries.
//!
//! # Example
//!
//! ```no_run
//! use shader_symbols::SymbolDatabase;
//! use std::path::PathBuf;
//!
//! let db = SymbolDatabase::new(&[PathBuf::from("shaders")], &[PathBuf::from("symbols")]);
//! let hash = shader_symbols::shader_hash(&std::fs::read("shaders/lighting.cso").unwrap());
//! if let Some(pdb) = db.find_pdb_for_binary(hash) {
//!     println!("symbols for {hash}: {}", pdb.path.display());
//! }
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use gpu_crash_common::ids::{DebugInfoId, ShaderHash};
use gpu_crash_common::utils::basename;
use tracing::{debug, trace, warn};
use xxhash_rust::xxh3::{xxh3_128, xxh3_64};

pub mod dxbc;

/// The extension of compiled shader binaries.
pub const BINARY_EXTENSION: &str = "cso";
/// The extensions of shader symbol files.
pub const SYMBOL_EXTENSIONS: &[&str] = &["pdb", "lld"];

/// Errors encountered while indexing a single file.
///
/// These never fail database construction; the offending file is logged and
/// skipped.
#[derive(Debug, thiserror::Error)]
pub enum SymbolError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("file name of {0} is not valid UTF-8")]
    BadFileName(PathBuf),
    #[error("malformed shader container: {0}")]
    MalformedContainer(String),
}

/// A compiled shader binary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShaderRecord {
    pub hash: ShaderHash,
    /// The name of the symbol file, if the container records one.
    pub debug_name: Option<String>,
    pub bytes: Vec<u8>,
    /// The canonical path the binary was read from.
    pub path: PathBuf,
}

/// A shader symbol file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SymbolRecord {
    pub debug_name: String,
    pub bytes: Vec<u8>,
    /// The canonical path the symbols were read from.
    pub path: PathBuf,
}

/// Hash shader binary contents the way GPU crash dumps do.
pub fn shader_hash(bytes: &[u8]) -> ShaderHash {
    ShaderHash(xxh3_64(bytes))
}

/// The identifier of a shader debug info blob.
pub fn debug_info_id(bytes: &[u8]) -> DebugInfoId {
    DebugInfoId(xxh3_128(bytes))
}

/// A read-only index of shader binaries and symbol files.
#[derive(Debug, Default)]
pub struct SymbolDatabase {
    binaries: HashMap<ShaderHash, ShaderRecord>,
    symbols: HashMap<String, SymbolRecord>,
}

impl SymbolDatabase {
    /// Scan `binary_dirs` for shader binaries and `symbol_dirs` for symbol files.
    ///
    /// Directories are not searched recursively. Within a directory, files are
    /// indexed in path order, and a file whose key was already seen replaces the
    /// earlier one. Missing directories and unreadable files are logged and
    /// skipped.
    pub fn new(binary_dirs: &[PathBuf], symbol_dirs: &[PathBuf]) -> SymbolDatabase {
        let mut db = SymbolDatabase::default();
        for dir in binary_dirs {
            for path in scan_dir(dir, &[BINARY_EXTENSION]) {
                match read_binary(&path) {
                    Ok(record) => db.insert_binary(record),
                    Err(e) => warn!("skipping shader binary: {}", e),
                }
            }
        }
        for dir in symbol_dirs {
            for path in scan_dir(dir, SYMBOL_EXTENSIONS) {
                match read_symbols(&path) {
                    Ok(record) => db.insert_symbols(record),
                    Err(e) => warn!("skipping symbol file: {}", e),
                }
            }
        }
        debug!(
            "indexed {} shader binaries and {} symbol files",
            db.binaries.len(),
            db.symbols.len()
        );
        db
    }

    fn insert_binary(&mut self, record: ShaderRecord) {
        trace!("shader {} -> {}", record.hash, record.path.display());
        if let Some(old) = self.binaries.insert(record.hash, record) {
            debug!(
                "shader binary {} replaces {} with the same hash",
                self.binaries[&old.hash].path.display(),
                old.path.display()
            );
        }
    }

    fn insert_symbols(&mut self, record: SymbolRecord) {
        trace!("symbols {} -> {}", record.debug_name, record.path.display());
        let name = record.debug_name.clone();
        if let Some(old) = self.symbols.insert(name, record) {
            debug!(
                "symbol file {} replaces {} with the same name",
                self.symbols[&old.debug_name].path.display(),
                old.path.display()
            );
        }
    }

    /// Find the shader binary whose contents hash to `hash`.
    pub fn find_binary(&self, hash: ShaderHash) -> Option<&ShaderRecord> {
        self.binaries.get(&hash)
    }

    /// Find a symbol file by debug name.
    ///
    /// Debug names recorded by compilers may include a directory; only the file
    /// name is used for the lookup.
    pub fn find_pdb(&self, debug_name: &str) -> Option<&SymbolRecord> {
        self.symbols.get(basename(debug_name))
    }

    /// Find the symbol file named by the shader binary whose contents hash to `hash`.
    pub fn find_pdb_for_binary(&self, hash: ShaderHash) -> Option<&SymbolRecord> {
        let binary = self.find_binary(hash)?;
        self.find_pdb(binary.debug_name.as_deref()?)
    }

    pub fn binary_count(&self) -> usize {
        self.binaries.len()
    }

    pub fn symbol_count(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.binaries.is_empty() && self.symbols.is_empty()
    }
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map_or(false, |ext| {
            extensions.iter().any(|want| ext.eq_ignore_ascii_case(want))
        })
}

/// List the files directly inside `dir` with one of `extensions`, sorted by path.
fn scan_dir(dir: &Path, extensions: &[&str]) -> Vec<PathBuf> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("couldn't scan {}: {}", dir.display(), e);
            return Vec::new();
        }
    };
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && has_extension(path, extensions))
        .collect();
    paths.sort();
    paths
}

fn read_canonical(path: &Path) -> Result<(PathBuf, Vec<u8>), SymbolError> {
    let io_error = |source| SymbolError::Io {
        path: path.to_owned(),
        source,
    };
    let path = fs::canonicalize(path).map_err(io_error)?;
    let bytes = fs::read(&path).map_err(io_error)?;
    Ok((path, bytes))
}

fn read_binary(path: &Path) -> Result<ShaderRecord, SymbolError> {
    let (path, bytes) = read_canonical(path)?;
    let debug_name = match dxbc::debug_name(&bytes) {
        Ok(name) => name,
        Err(e) => {
            debug!("no debug name for {}: {}", path.display(), e);
            None
        }
    };
    Ok(ShaderRecord {
        hash: shader_hash(&bytes),
        debug_name,
        bytes,
        path,
    })
}

fn read_symbols(path: &Path) -> Result<SymbolRecord, SymbolError> {
    let (path, bytes) = read_canonical(path)?;
    let debug_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| SymbolError::BadFileName(path.clone()))?
        .to_owned();
    Ok(SymbolRecord {
        debug_name,
        bytes,
        path,
    })
}
