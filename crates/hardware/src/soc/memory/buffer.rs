//! Backing store for the root memory.
//!
//! On Unix the store is an anonymous `mmap`, so pages are only materialised by the host when
//! first touched and a large simulated memory costs nothing until used. Elsewhere, or if
//! the mapping fails, the store falls back to a zeroed `Vec`.

use std::fmt;
use std::slice;

use crate::common::Addr;

enum Storage {
    #[cfg(unix)]
    Mapped { ptr: *mut u8, len: usize },
    Heap(Vec<u8>),
}

/// Byte-addressable memory contents.
///
/// Addresses are taken modulo the store size, so a store smaller than the simulated address
/// space aliases rather than faults.
pub struct BackingStore {
    storage: Storage,
}

// SAFETY: the mapping is owned exclusively by this value and only reached through `&self`
// or `&mut self`, so moving it to another thread is no different from moving a `Vec`.
unsafe impl Send for BackingStore {}

impl BackingStore {
    /// Creates a zero-filled store of `size` bytes.
    pub fn new(size: usize) -> Self {
        #[cfg(unix)]
        if size > 0
            && let Some(ptr) = Self::map(size)
        {
            return Self {
                storage: Storage::Mapped { ptr, len: size },
            };
        }
        Self {
            storage: Storage::Heap(vec![0; size]),
        }
    }

    #[cfg(unix)]
    fn map(size: usize) -> Option<*mut u8> {
        // SAFETY: an anonymous private mapping with a null hint has no preconditions; the
        // result is checked against MAP_FAILED before use.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        (ptr != libc::MAP_FAILED).then_some(ptr.cast::<u8>())
    }

    /// Returns `true` if the store is backed by an anonymous mapping.
    pub const fn is_mapped(&self) -> bool {
        match self.storage {
            #[cfg(unix)]
            Storage::Mapped { .. } => true,
            Storage::Heap(_) => false,
        }
    }

    /// Size of the store in bytes.
    pub fn len(&self) -> usize {
        match &self.storage {
            #[cfg(unix)]
            Storage::Mapped { len, .. } => *len,
            Storage::Heap(v) => v.len(),
        }
    }

    /// Returns `true` if the store holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn as_slice(&self) -> &[u8] {
        match &self.storage {
            #[cfg(unix)]
            // SAFETY: `ptr` is a live mapping of `len` readable bytes for the lifetime of self.
            Storage::Mapped { ptr, len } => unsafe { slice::from_raw_parts(*ptr, *len) },
            Storage::Heap(v) => v,
        }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        match &mut self.storage {
            #[cfg(unix)]
            // SAFETY: `ptr` is a live mapping of `len` writable bytes and `&mut self`
            // guarantees exclusive access.
            Storage::Mapped { ptr, len } => unsafe { slice::from_raw_parts_mut(*ptr, *len) },
            Storage::Heap(v) => v,
        }
    }

    /// Reads `size` bytes starting at `addr`.
    pub fn get(&self, addr: Addr, size: u64) -> Vec<u8> {
        let bytes = self.as_slice();
        if bytes.is_empty() {
            return vec![0; size as usize];
        }
        let len = bytes.len() as u64;
        (0..size)
            .map(|i| bytes[(addr.wrapping_add(i) % len) as usize])
            .collect()
    }

    /// Writes `data` starting at `addr`.
    pub fn set(&mut self, addr: Addr, data: &[u8]) {
        let bytes = self.as_mut_slice();
        if bytes.is_empty() {
            return;
        }
        let len = bytes.len() as u64;
        for (i, byte) in data.iter().enumerate() {
            bytes[(addr.wrapping_add(i as u64) % len) as usize] = *byte;
        }
    }
}

impl Drop for BackingStore {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Storage::Mapped { ptr, len } = self.storage {
            // SAFETY: the mapping was created by `map` with this length and is unmapped once.
            let _ = unsafe { libc::munmap(ptr.cast(), len) };
        }
    }
}

impl fmt::Debug for BackingStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackingStore")
            .field("len", &self.len())
            .field("mapped", &self.is_mapped())
            .finish()
    }
}
