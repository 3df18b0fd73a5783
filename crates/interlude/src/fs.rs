//! Virtual file store exposed to sandboxed scripts.
//!
//! Scripts see a flat namespace of text files. Storage is pluggable through
//! [`FileStore`]; [`MemoryStore`] keeps everything in-process while
//! [`DirectoryStore`] persists one file per name under a directory so the
//! contents survive engine restarts.
//!
//! Open files are [`VirtualFile`] buffers: the whole content is loaded at open
//! time and written back on close, after which the name is recorded in
//! [`DirtyFiles`] until the host drains it.

use std::{
    fs,
    path::{Component, Path, PathBuf},
};

use indexmap::{IndexMap, IndexSet};

use crate::error::{FileError, StoreError};

/// Backing storage for virtual files.
pub trait FileStore: Send {
    /// Names of all stored files.
    fn list_names(&self) -> Result<Vec<String>, StoreError>;

    /// Content of `name`, or `None` when absent.
    fn read(&self, name: &str) -> Result<Option<String>, StoreError>;

    /// Replaces the content of `name`, creating it if needed.
    fn write(&mut self, name: &str, content: &str) -> Result<(), StoreError>;
}

/// In-process store, lost when dropped.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    files: IndexMap<String, String>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl FileStore for MemoryStore {
    fn list_names(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.files.keys().cloned().collect())
    }

    fn read(&self, name: &str) -> Result<Option<String>, StoreError> {
        Ok(self.files.get(name).cloned())
    }

    fn write(&mut self, name: &str, content: &str) -> Result<(), StoreError> {
        self.files.insert(name.to_owned(), content.to_owned());
        Ok(())
    }
}

/// Store backed by a directory on the host filesystem, one file per name.
///
/// Names may contain `/` separators; they must stay inside the root directory.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    /// Opens (and creates if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(name);
        let valid = !name.is_empty() && relative.components().all(|c| matches!(c, Component::Normal(_)));
        if valid {
            Ok(self.root.join(relative))
        } else {
            Err(StoreError::InvalidName(name.to_owned()))
        }
    }

    fn collect_names(&self, dir: &Path, prefix: &str, names: &mut Vec<String>) -> Result<(), StoreError> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let file_name = entry.file_name().to_string_lossy().into_owned();
            let name = if prefix.is_empty() {
                file_name
            } else {
                format!("{prefix}/{file_name}")
            };
            if entry.file_type()?.is_dir() {
                self.collect_names(&entry.path(), &name, names)?;
            } else {
                names.push(name);
            }
        }
        Ok(())
    }
}

impl FileStore for DirectoryStore {
    fn list_names(&self) -> Result<Vec<String>, StoreError> {
        let mut names = Vec::new();
        self.collect_names(&self.root, "", &mut names)?;
        names.sort();
        Ok(names)
    }

    fn read(&self, name: &str) -> Result<Option<String>, StoreError> {
        let path = self.path_for(name)?;
        match fs::read_to_string(path) {
            Ok(content) => Ok(Some(content)),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error.into()),
        }
    }

    fn write(&mut self, name: &str, content: &str) -> Result<(), StoreError> {
        let path = self.path_for(name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }
}

/// Parsed form of a text-mode `open()` mode string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenMode {
    pub read: bool,
    pub write: bool,
    pub append: bool,
    pub truncate: bool,
    pub create_new: bool,
}

impl OpenMode {
    /// Parses modes such as `r`, `w`, `a`, `x`, optionally with `t` and `+`.
    ///
    /// Binary modes are rejected because the store only holds text.
    pub fn parse(mode: &str) -> Result<Self, FileError> {
        let invalid = || FileError::InvalidMode(mode.to_owned());
        let mut base = None;
        let mut update = false;
        for c in mode.chars() {
            match c {
                'r' | 'w' | 'a' | 'x' if base.is_none() => base = Some(c),
                '+' if !update => update = true,
                't' => {}
                _ => return Err(invalid()),
            }
        }
        let mut parsed = match base.ok_or_else(invalid)? {
            'r' => Self {
                read: true,
                ..Self::default()
            },
            'w' => Self {
                write: true,
                truncate: true,
                ..Self::default()
            },
            'a' => Self {
                write: true,
                append: true,
                ..Self::default()
            },
            _ => Self {
                write: true,
                create_new: true,
                ..Self::default()
            },
        };
        if update {
            parsed.read = true;
            parsed.write = true;
        }
        Ok(parsed)
    }

    /// Read-only files are never written back on close.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        !self.write
    }
}

/// An open text file, buffered entirely in memory.
#[derive(Debug, Clone)]
pub struct VirtualFile {
    name: String,
    mode: OpenMode,
    content: String,
    /// Byte offset, always on a char boundary.
    cursor: usize,
    closed: bool,
}

impl VirtualFile {
    /// Opens `name` from `store` following the usual mode rules.
    ///
    /// Read mode requires existing content, write mode truncates, append mode
    /// positions the cursor at the end and exclusive creation fails if content
    /// already exists.
    pub fn open(store: &dyn FileStore, name: &str, mode: &str) -> Result<Self, FileError> {
        let mode = OpenMode::parse(mode)?;
        let existing = store.read(name)?;
        let content = match existing {
            None if !mode.write || (mode.read && !mode.truncate && !mode.append && !mode.create_new) => {
                return Err(FileError::NotFound(name.to_owned()));
            }
            None => String::new(),
            Some(_) if mode.create_new => return Err(FileError::AlreadyExists(name.to_owned())),
            Some(_) if mode.truncate => String::new(),
            Some(content) => content,
        };
        let cursor = if mode.append { content.len() } else { 0 };
        Ok(Self {
            name: name.to_owned(),
            mode,
            content,
            cursor,
            closed: false,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Current content of the buffer, regardless of the cursor.
    #[must_use]
    pub fn contents(&self) -> &str {
        &self.content
    }

    /// Reads up to `size` characters, or everything left when `size` is `None`.
    pub fn read(&mut self, size: Option<usize>) -> Result<String, FileError> {
        self.check_readable()?;
        let rest = &self.content[self.cursor..];
        let end = match size {
            Some(size) => rest.char_indices().nth(size).map_or(rest.len(), |(offset, _)| offset),
            None => rest.len(),
        };
        let chunk = rest[..end].to_owned();
        self.cursor += end;
        Ok(chunk)
    }

    /// Reads through the next newline, or the rest of the file. Empty at EOF.
    pub fn readline(&mut self) -> Result<String, FileError> {
        self.check_readable()?;
        let rest = &self.content[self.cursor..];
        let end = rest.find('\n').map_or(rest.len(), |offset| offset + 1);
        let line = rest[..end].to_owned();
        self.cursor += end;
        Ok(line)
    }

    /// Writes `text` at the cursor (always the end in append mode), returning the
    /// number of characters written.
    pub fn write(&mut self, text: &str) -> Result<usize, FileError> {
        if self.closed {
            return Err(FileError::Closed);
        }
        if !self.mode.write {
            return Err(FileError::NotWritable);
        }
        if self.mode.append {
            self.cursor = self.content.len();
        }
        let overwritten = self.content[self.cursor..]
            .char_indices()
            .nth(text.chars().count())
            .map_or(self.content.len(), |(offset, _)| self.cursor + offset);
        self.content.replace_range(self.cursor..overwritten, text);
        self.cursor += text.len();
        Ok(text.chars().count())
    }

    /// Moves the cursor to the start or the end of the buffer.
    pub fn seek_start(&mut self) {
        self.cursor = 0;
    }

    pub fn seek_end(&mut self) {
        self.cursor = self.content.len();
    }

    /// Closes the file, writing the content back unless it was opened read-only.
    ///
    /// Returns `true` when the store was written.
    pub fn close(&mut self, store: &mut dyn FileStore) -> Result<bool, FileError> {
        if self.closed {
            return Ok(false);
        }
        self.closed = true;
        if self.mode.is_read_only() {
            return Ok(false);
        }
        store.write(&self.name, &self.content)?;
        Ok(true)
    }

    fn check_readable(&self) -> Result<(), FileError> {
        if self.closed {
            Err(FileError::Closed)
        } else if self.mode.read {
            Ok(())
        } else {
            Err(FileError::NotReadable)
        }
    }
}

/// Names of files modified since the host last drained the set.
///
/// A name is reported once until [`DirtyFiles::drain`] resets the set.
#[derive(Debug, Clone, Default)]
pub struct DirtyFiles {
    names: IndexSet<String>,
}

impl DirtyFiles {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `name` dirty, returning `true` the first time it is seen.
    pub fn mark(&mut self, name: &str) -> bool {
        self.names.insert(name.to_owned())
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Returns the marked names in marking order and resets the set.
    pub fn drain(&mut self) -> Vec<String> {
        std::mem::take(&mut self.names).into_iter().collect()
    }
}
