//! Shared memory region seen by both processors
//!
//! The region is exposed as a slice of 32-bit atomic words. Payload words are
//! moved with relaxed ordering; the pointer-exchange words are stored with
//! release and loaded with acquire, which is what orders the payload for the
//! peer. Every access is bounds checked.

use crate::error::{LinkError, Result};
use rustix::fd::OwnedFd;
use rustix::fs::ftruncate;
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use rustix::shm::{shm_open, shm_unlink, Mode, ShmOFlags};
use std::ffi::CString;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};

const LINK_SHM_PREFIX: &str = "/mdmlink_";
const MAX_NAME_LEN: usize = 255 - LINK_SHM_PREFIX.len();

/// Size of one FIFO word in bytes
pub const WORD_SIZE: usize = 4;

enum Backing {
    /// Process-local memory, used when both link ends live in one process
    Heap(Box<[AtomicU32]>),
    /// POSIX shared memory object mapped into this process
    Mapped {
        #[allow(dead_code)]
        fd: OwnedFd,
        addr: NonNull<AtomicU32>,
        size: usize,
        name: String,
        is_owner: bool,
    },
}

/// Handle to the shared region
pub struct SharedRegion {
    backing: Backing,
}

// SAFETY: all access to the mapping goes through atomic words
unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

fn words_for(size: usize) -> usize {
    (size + WORD_SIZE - 1) / WORD_SIZE
}

impl SharedRegion {
    /// Allocate a zeroed region in process memory
    pub fn anonymous(size: usize) -> Self {
        let words = (0..words_for(size)).map(|_| AtomicU32::new(0)).collect();
        Self {
            backing: Backing::Heap(words),
        }
    }

    /// Create a new POSIX shared memory region
    ///
    /// # Arguments
    /// * `name` - Unique name for the shared memory (will be prefixed with "/mdmlink_")
    /// * `size` - Size in bytes, rounded up to whole words
    pub fn create(name: &str, size: usize) -> Result<Self> {
        if name.len() > MAX_NAME_LEN {
            return Err(LinkError::NamespaceTooLong {
                max: MAX_NAME_LEN,
                got: name.len(),
            });
        }
        let size = words_for(size) * WORD_SIZE;
        let c_name = shm_name(name)?;

        // Try to create exclusively first, fall back to open if exists
        let fd = match shm_open(
            c_name.as_c_str(),
            ShmOFlags::CREATE | ShmOFlags::EXCL | ShmOFlags::RDWR,
            Mode::RUSR | Mode::WUSR | Mode::RGRP | Mode::WGRP,
        ) {
            Ok(fd) => fd,
            Err(_) => shm_open(c_name.as_c_str(), ShmOFlags::RDWR, Mode::empty()).map_err(|e| {
                LinkError::ShmCreate {
                    name: name.to_string(),
                    source: e.into(),
                }
            })?,
        };

        ftruncate(&fd, size as u64).map_err(|e| LinkError::Truncate(e.into()))?;

        let addr = map(&fd, size)?;

        // Zero initialize
        unsafe {
            std::ptr::write_bytes(addr.as_ptr().cast::<u8>(), 0, size);
        }

        Ok(Self {
            backing: Backing::Mapped {
                fd,
                addr,
                size,
                name: name.to_string(),
                is_owner: true,
            },
        })
    }

    /// Open an existing POSIX shared memory region
    pub fn open(name: &str) -> Result<Self> {
        let c_name = shm_name(name)?;

        let fd = shm_open(c_name.as_c_str(), ShmOFlags::RDWR, Mode::empty()).map_err(|e| {
            LinkError::ShmOpen {
                name: name.to_string(),
                source: e.into(),
            }
        })?;

        let stat = rustix::fs::fstat(&fd).map_err(|e| LinkError::ShmOpen {
            name: name.to_string(),
            source: e.into(),
        })?;
        let size = (stat.st_size as usize / WORD_SIZE) * WORD_SIZE;

        let addr = map(&fd, size)?;

        Ok(Self {
            backing: Backing::Mapped {
                fd,
                addr,
                size,
                name: name.to_string(),
                is_owner: false,
            },
        })
    }

    /// All words of the region
    #[inline(always)]
    pub fn words(&self) -> &[AtomicU32] {
        match &self.backing {
            Backing::Heap(words) => words,
            // SAFETY: the mapping is page aligned, `size` bytes long and lives
            // as long as `self`
            Backing::Mapped { addr, size, .. } => unsafe {
                std::slice::from_raw_parts(addr.as_ptr(), size / WORD_SIZE)
            },
        }
    }

    /// Region size in words
    #[inline(always)]
    pub fn len_words(&self) -> usize {
        self.words().len()
    }

    /// Region size in bytes
    #[inline(always)]
    pub fn size(&self) -> usize {
        self.len_words() * WORD_SIZE
    }

    /// Name of the shared memory object, if the region is mapped
    pub fn name(&self) -> Option<&str> {
        match &self.backing {
            Backing::Heap(_) => None,
            Backing::Mapped { name, .. } => Some(name),
        }
    }

    /// Check if this handle owns (and will unlink) the shared memory
    pub fn is_owner(&self) -> bool {
        match &self.backing {
            Backing::Heap(_) => true,
            Backing::Mapped { is_owner, .. } => *is_owner,
        }
    }

    #[inline]
    fn word(&self, index: usize) -> Result<&AtomicU32> {
        let words = self.words();
        words.get(index).ok_or(LinkError::OutOfBounds {
            index,
            limit: words.len(),
        })
    }

    #[inline]
    fn span(&self, index: usize, count: usize) -> Result<&[AtomicU32]> {
        let words = self.words();
        match index.checked_add(count) {
            Some(end) if end <= words.len() => Ok(&words[index..end]),
            _ => Err(LinkError::OutOfBounds {
                index: index.saturating_add(count),
                limit: words.len(),
            }),
        }
    }

    /// Load a pointer-exchange word (acquire)
    #[inline]
    pub fn load(&self, index: usize) -> Result<u32> {
        Ok(self.word(index)?.load(Ordering::Acquire))
    }

    /// Publish a pointer-exchange word (release)
    #[inline]
    pub fn store(&self, index: usize, value: u32) -> Result<()> {
        self.word(index)?.store(value, Ordering::Release);
        Ok(())
    }

    /// Read a data word
    #[inline]
    pub fn read_word(&self, index: usize) -> Result<u32> {
        Ok(self.word(index)?.load(Ordering::Relaxed))
    }

    /// Write a data word
    #[inline]
    pub fn write_word(&self, index: usize, value: u32) -> Result<()> {
        self.word(index)?.store(value, Ordering::Relaxed);
        Ok(())
    }

    /// Copy bytes into consecutive words starting at `index`, zero padding the
    /// last word
    pub fn write_bytes(&self, index: usize, bytes: &[u8]) -> Result<()> {
        let span = self.span(index, words_for(bytes.len()))?;
        for (word, chunk) in span.iter().zip(bytes.chunks(WORD_SIZE)) {
            let mut raw = [0u8; WORD_SIZE];
            raw[..chunk.len()].copy_from_slice(chunk);
            word.store(u32::from_ne_bytes(raw), Ordering::Relaxed);
        }
        Ok(())
    }

    /// Copy consecutive words starting at `index` into `out`
    pub fn read_bytes(&self, index: usize, out: &mut [u8]) -> Result<()> {
        let span = self.span(index, words_for(out.len()))?;
        for (word, chunk) in span.iter().zip(out.chunks_mut(WORD_SIZE)) {
            let raw = word.load(Ordering::Relaxed).to_ne_bytes();
            chunk.copy_from_slice(&raw[..chunk.len()]);
        }
        Ok(())
    }
}

fn shm_name(name: &str) -> Result<CString> {
    CString::new(format!("{}{}", LINK_SHM_PREFIX, name)).map_err(|e| LinkError::ShmOpen {
        name: name.to_string(),
        source: e.into(),
    })
}

fn map(fd: &OwnedFd, size: usize) -> Result<NonNull<AtomicU32>> {
    let addr = unsafe {
        mmap(
            std::ptr::null_mut(),
            size,
            ProtFlags::READ | ProtFlags::WRITE,
            MapFlags::SHARED,
            fd,
            0,
        )
        .map_err(|e| LinkError::Mmap(e.into()))?
    };
    NonNull::new(addr.cast::<AtomicU32>())
        .ok_or_else(|| LinkError::Mmap(std::io::Error::other("mmap returned null")))
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        if let Backing::Mapped {
            addr,
            size,
            name,
            is_owner,
            ..
        } = &self.backing
        {
            unsafe {
                let _ = munmap(addr.as_ptr().cast(), *size);
            }

            if *is_owner {
                if let Ok(c_name) = shm_name(name) {
                    let _ = shm_unlink(c_name.as_c_str());
                }
            }
        }
    }
}
