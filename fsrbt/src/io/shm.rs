//! Shared memory functions
//!
//! A segment holds exactly one blob. Its size is the blob size rounded up to the system page
//! size; the blob header records the real length, so the padding is ignored when reading.
//!
//! A segment outlives the process which wrote it and only goes away when it is unlinked. There
//! is no locking between a writer and readers: a reader which maps a segment while it is being
//! rewritten sees undefined content.

use std::ffi::CString;
use std::fs::File;
use std::io;
use std::os::fd::{FromRawFd, OwnedFd};
use std::path::Path;

use anyhow::Result;
use memmap2::{MmapMut, MmapOptions};
use thiserror::Error;

use super::file::TREE_EXTENSION;
use crate::codec;
use crate::rbtree::RbTree;

/// Every segment name ends with this.
pub const SEGMENT_SUFFIX: &str = ".mem";

const FALLBACK_PAGE_SIZE: usize = 4_096;

/// Shared memory errors.
#[derive(Error, Debug)]
pub enum ShmError {
    /// The name can't be used for a segment
    #[error("invalid segment name: {0:?}")]
    InvalidName(String),

    /// No segment with this name exists
    #[error("shared memory segment not found: {0}")]
    NotFound(String),

    /// The segment exists but holds nothing
    #[error("shared memory segment is empty: {0}")]
    Empty(String),

    /// An OS call failed
    #[error("{call} failed for segment {name}: {source}")]
    Os {
        /// The failing call
        call: &'static str,
        /// Segment name
        name: String,
        /// Underlying error
        #[source]
        source: io::Error,
    },
}

impl ShmError {
    fn os(call: &'static str, name: &str, source: io::Error) -> Self {
        tracing::error!(call, name, "shared memory call failed: {source}");
        ShmError::Os {
            call,
            name: name.to_string(),
            source,
        }
    }
}

/// Derive the segment name for an index of `source`: `<prefix><basename>[.rbt].mem`.
///
/// The `.rbt` part is only added if the base name doesn't already end with it.
pub fn segment_name<P: AsRef<Path>>(prefix: &str, source: P) -> String {
    let base = source
        .as_ref()
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = format!(".{TREE_EXTENSION}");
    if base.ends_with(&extension) {
        format!("{prefix}{base}{SEGMENT_SUFFIX}")
    } else {
        format!("{prefix}{base}{extension}{SEGMENT_SUFFIX}")
    }
}

/// The system page size.
pub fn page_size() -> usize {
    // SAFETY: sysconf has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as usize
    } else {
        FALLBACK_PAGE_SIZE
    }
}

/// Round `size` up to a whole number of pages. Never returns less than one page.
pub fn round_to_page(size: usize) -> usize {
    let page = page_size();
    size.max(1).div_ceil(page) * page
}

/// A named POSIX shared memory segment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Segment {
    name: String,
}

impl Segment {
    /// Refer to the segment called `name`. A leading `/` is optional.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let name = match name.strip_prefix('/') {
            Some(stripped) => stripped.to_string(),
            None => name,
        };
        Self { name }
    }

    /// The segment for an index of `source` built with `prefix`.
    pub fn for_source<P: AsRef<Path>>(prefix: &str, source: P) -> Self {
        Self::new(segment_name(prefix, source))
    }

    /// Segment name, without the leading `/`.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn c_name(&self) -> Result<CString, ShmError> {
        if self.name.is_empty() || self.name.contains('/') {
            return Err(ShmError::InvalidName(self.name.clone()));
        }
        CString::new(format!("/{}", self.name)).map_err(|_| ShmError::InvalidName(self.name.clone()))
    }

    fn open(&self, flags: libc::c_int, mode: libc::mode_t) -> Result<File, ShmError> {
        let c_name = self.c_name()?;
        // SAFETY: c_name is a valid NUL terminated string which outlives the call.
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), flags, mode) };
        if fd < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::NotFound {
                return Err(ShmError::NotFound(self.name.clone()));
            }
            return Err(ShmError::os("shm_open", &self.name, err));
        }
        // SAFETY: fd was just returned by shm_open and nothing else owns it.
        Ok(File::from(unsafe { OwnedFd::from_raw_fd(fd) }))
    }

    /// Serialize `tree` into this segment, creating or replacing it. Returns the mapped size.
    pub fn write(&self, tree: &RbTree) -> Result<usize> {
        let size = codec::size_of(tree)?;
        let rounded = round_to_page(size as usize);

        // An anonymous mapping is page aligned, which a Vec is not
        let mut staging =
            MmapMut::map_anon(rounded).map_err(|e| ShmError::os("mmap", &self.name, e))?;
        let written = codec::serialize_into(tree, &mut staging[..])?;
        codec::check_written(size, written)?;

        let file = self.open(libc::O_CREAT | libc::O_RDWR, 0o644)?;
        file.set_len(rounded as u64)
            .map_err(|e| ShmError::os("ftruncate", &self.name, e))?;
        // SAFETY: the segment was just sized to `rounded` bytes and this process holds no other
        // mapping of it. Concurrent writers are not supported.
        let mut map = unsafe { MmapOptions::new().len(rounded).map_mut(&file) }
            .map_err(|e| ShmError::os("mmap", &self.name, e))?;
        map.copy_from_slice(&staging);
        // Dropping the map unmaps it and dropping the file closes the descriptor
        drop(map);
        drop(file);

        tracing::info!(
            segment = %self.name,
            bytes = size,
            mapped = rounded,
            nodes = tree.len(),
            "wrote segment"
        );
        Ok(rounded)
    }

    /// Map the segment read-only and decode a private copy of its tree.
    pub fn read(&self) -> Result<RbTree> {
        let file = self.open(libc::O_RDONLY, 0)?;
        let len = file
            .metadata()
            .map_err(|e| ShmError::os("fstat", &self.name, e))?
            .len();
        if len == 0 {
            return Err(ShmError::Empty(self.name.clone()).into());
        }
        // SAFETY: the mapping is read-only and dropped before we return. A concurrent writer
        // would make its contents undefined; that scenario is unsupported.
        let map = unsafe { MmapOptions::new().len(len as usize).map(&file) }
            .map_err(|e| ShmError::os("mmap", &self.name, e))?;
        let tree = codec::deserialize(&map)?;
        tracing::info!(segment = %self.name, nodes = tree.len(), "read segment");
        Ok(tree)
    }

    /// Size of the segment in bytes.
    pub fn size(&self) -> Result<u64> {
        let file = self.open(libc::O_RDONLY, 0)?;
        let metadata = file
            .metadata()
            .map_err(|e| ShmError::os("fstat", &self.name, e))?;
        Ok(metadata.len())
    }

    /// Does the segment exist?
    pub fn exists(&self) -> bool {
        self.open(libc::O_RDONLY, 0).is_ok()
    }

    /// Remove the segment name. Existing mappings stay valid until they are unmapped.
    pub fn unlink(&self) -> Result<(), ShmError> {
        let c_name = self.c_name()?;
        // SAFETY: c_name is a valid NUL terminated string which outlives the call.
        let rc = unsafe { libc::shm_unlink(c_name.as_ptr()) };
        if rc != 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::NotFound {
                return Err(ShmError::NotFound(self.name.clone()));
            }
            return Err(ShmError::os("shm_unlink", &self.name, err));
        }
        tracing::info!(segment = %self.name, "unlinked segment");
        Ok(())
    }
}
