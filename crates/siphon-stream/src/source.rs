use parking_lot::RwLock;
use siphon_core::{ExtractError, FileRef};
use std::collections::HashMap;
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// A readable, seekable byte source owned by one stream.
pub trait Source: Read + Seek + Send {}

impl<T: Read + Seek + Send> Source for T {}

/// A resolved file: an open handle plus the resolver's size estimate.
pub struct ResolvedFile {
    pub source: Box<dyn Source>,
    pub size_hint: Option<u64>,
}

impl ResolvedFile {
    pub fn new(source: impl Source + 'static, size_hint: Option<u64>) -> Self {
        Self {
            source: Box::new(source),
            size_hint,
        }
    }
}

impl std::fmt::Debug for ResolvedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedFile")
            .field("size_hint", &self.size_hint)
            .finish_non_exhaustive()
    }
}

/// Turns a [`FileRef`] into a readable handle.
///
/// Failures become task-level errors: a reference that can never resolve
/// should be reported as [`ExtractError::NotFound`], a temporary failure as an
/// I/O error.
pub trait FileResolver: Send + Sync {
    fn resolve(&self, file: &FileRef) -> Result<ResolvedFile, ExtractError>;
}

impl<T: FileResolver + ?Sized> FileResolver for Arc<T> {
    fn resolve(&self, file: &FileRef) -> Result<ResolvedFile, ExtractError> {
        (**self).resolve(file)
    }
}

/// Resolves references as filesystem paths.
#[derive(Debug, Clone, Default)]
pub struct FsResolver {
    root: Option<PathBuf>,
}

impl FsResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve relative to `root` and refuse references that escape it.
    pub fn rooted(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn path_for(&self, file: &FileRef) -> Result<PathBuf, ExtractError> {
        let requested = file.as_path();
        let Some(root) = &self.root else {
            return Ok(requested.to_path_buf());
        };

        let escapes = requested.components().any(|component| {
            matches!(
                component,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });
        if escapes {
            return Err(ExtractError::NotFound {
                file: file.to_string(),
                message: format!("reference escapes resolver root {}", root.display()),
            });
        }
        Ok(root.join(requested))
    }
}

impl FileResolver for FsResolver {
    fn resolve(&self, file: &FileRef) -> Result<ResolvedFile, ExtractError> {
        let path = self.path_for(file)?;
        let handle = std::fs::File::open(&path).map_err(|err| open_error(file, &path, err))?;
        let metadata = handle
            .metadata()
            .map_err(|err| open_error(file, &path, err))?;
        if metadata.is_dir() {
            return Err(ExtractError::NotFound {
                file: file.to_string(),
                message: "reference names a directory".to_owned(),
            });
        }
        Ok(ResolvedFile::new(handle, Some(metadata.len())))
    }
}

fn open_error(file: &FileRef, path: &Path, err: io::Error) -> ExtractError {
    match err.kind() {
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => ExtractError::NotFound {
            file: file.to_string(),
            message: format!("{}: {err}", path.display()),
        },
        _ => err.into(),
    }
}

const PATTERN_LEN: usize = 4096;

/// Deterministic generated content of any length, without backing storage.
///
/// Byte `i` is `pattern[i % 4096]`, where the pattern is derived from the seed.
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    len: u64,
    pos: u64,
    pattern: Arc<[u8; PATTERN_LEN]>,
}

impl SyntheticSource {
    pub fn new(len: u64, seed: u64) -> Self {
        let mut pattern = [0u8; PATTERN_LEN];
        let mut state = seed ^ 0x9E37_79B9_7F4A_7C15;
        for byte in pattern.iter_mut() {
            // xorshift64
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            *byte = (state >> 24) as u8;
        }
        Self {
            len,
            pos: 0,
            pattern: Arc::new(pattern),
        }
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The byte at `offset`, for verifying what a reader produced.
    pub fn byte_at(&self, offset: u64) -> u8 {
        self.pattern[(offset % PATTERN_LEN as u64) as usize]
    }
}

impl Read for SyntheticSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.len.saturating_sub(self.pos);
        let want = (buf.len() as u64).min(remaining) as usize;
        let mut written = 0;
        while written < want {
            let offset = ((self.pos + written as u64) % PATTERN_LEN as u64) as usize;
            let n = (PATTERN_LEN - offset).min(want - written);
            buf[written..written + n].copy_from_slice(&self.pattern[offset..offset + n]);
            written += n;
        }
        self.pos += written as u64;
        Ok(written)
    }
}

impl Seek for SyntheticSource {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => self.len.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
        };
        match target {
            Some(target) => {
                self.pos = target;
                Ok(target)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to a negative or overflowing position",
            )),
        }
    }
}

#[derive(Debug, Clone)]
enum SyntheticEntry {
    Generated { len: u64, seed: u64 },
    Bytes(Arc<[u8]>),
}

/// In-memory resolver for generated or fixture content.
#[derive(Debug, Default)]
pub struct SyntheticResolver {
    entries: RwLock<HashMap<String, SyntheticEntry>>,
}

impl SyntheticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `len` bytes of [`SyntheticSource`] content under `name`.
    pub fn insert_generated(&self, name: impl Into<String>, len: u64, seed: u64) {
        self.entries
            .write()
            .insert(name.into(), SyntheticEntry::Generated { len, seed });
    }

    pub fn insert_bytes(&self, name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) {
        self.entries
            .write()
            .insert(name.into(), SyntheticEntry::Bytes(bytes.into()));
    }

    pub fn remove(&self, name: &str) -> bool {
        self.entries.write().remove(name).is_some()
    }
}

impl FileResolver for SyntheticResolver {
    fn resolve(&self, file: &FileRef) -> Result<ResolvedFile, ExtractError> {
        let entry = self.entries.read().get(file.as_str()).cloned();
        match entry {
            Some(SyntheticEntry::Generated { len, seed }) => {
                Ok(ResolvedFile::new(SyntheticSource::new(len, seed), Some(len)))
            }
            Some(SyntheticEntry::Bytes(bytes)) => {
                let len = bytes.len() as u64;
                Ok(ResolvedFile::new(Cursor::new(bytes), Some(len)))
            }
            None => Err(ExtractError::NotFound {
                file: file.to_string(),
                message: "no synthetic entry registered".to_owned(),
            }),
        }
    }
}
