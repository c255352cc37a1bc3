//! Executable memory management for emitted code.
//!
//! This module provides:
//! - Platform-specific executable memory allocation (VirtualAlloc/mmap)
//! - Write-then-execute (W^X) security model support
//! - Multi-entry code blobs for runtime stub collections
//!
//! # Safety
//! All memory management is inherently unsafe. This module encapsulates
//! the unsafety behind safe APIs where possible.

use std::io;
use std::ptr::NonNull;

// =============================================================================
// Platform-specific imports
// =============================================================================

#[cfg(windows)]
mod platform {
    use std::ptr;
    use windows_sys::Win32::System::Memory::{
        MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_EXECUTE_READ, PAGE_READWRITE, VirtualAlloc,
        VirtualFree, VirtualProtect,
    };

    pub const PAGE_SIZE: usize = 4096;

    /// Allocate memory with read-write permissions.
    pub unsafe fn alloc_rw(size: usize) -> *mut u8 {
        unsafe {
            VirtualAlloc(ptr::null(), size, MEM_COMMIT | MEM_RESERVE, PAGE_READWRITE) as *mut u8
        }
    }

    /// Free allocated memory.
    pub unsafe fn free(ptr: *mut u8, _size: usize) {
        unsafe {
            VirtualFree(ptr as *mut _, 0, MEM_RELEASE);
        }
    }

    /// Make memory executable (and read-only).
    pub unsafe fn make_executable(ptr: *mut u8, size: usize) -> bool {
        let mut old_protect = 0;
        unsafe { VirtualProtect(ptr as *mut _, size, PAGE_EXECUTE_READ, &mut old_protect) != 0 }
    }

    /// Make memory writable (remove execute permission).
    pub unsafe fn make_writable(ptr: *mut u8, size: usize) -> bool {
        let mut old_protect = 0;
        unsafe { VirtualProtect(ptr as *mut _, size, PAGE_READWRITE, &mut old_protect) != 0 }
    }
}

#[cfg(unix)]
mod platform {
    use std::ptr;

    pub const PAGE_SIZE: usize = 4096;

    /// Allocate memory with read-write permissions.
    pub unsafe fn alloc_rw(size: usize) -> *mut u8 {
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED { ptr::null_mut() } else { ptr as *mut u8 }
    }

    /// Free allocated memory.
    pub unsafe fn free(ptr: *mut u8, size: usize) {
        unsafe {
            libc::munmap(ptr as *mut _, size);
        }
    }

    /// Make memory executable (and read-only).
    pub unsafe fn make_executable(ptr: *mut u8, size: usize) -> bool {
        unsafe { libc::mprotect(ptr as *mut _, size, libc::PROT_READ | libc::PROT_EXEC) == 0 }
    }

    /// Make memory writable (remove execute permission).
    pub unsafe fn make_writable(ptr: *mut u8, size: usize) -> bool {
        unsafe { libc::mprotect(ptr as *mut _, size, libc::PROT_READ | libc::PROT_WRITE) == 0 }
    }
}

pub use platform::PAGE_SIZE;

// =============================================================================
// Executable Buffer
// =============================================================================

/// A buffer of executable memory for emitted code.
///
/// The buffer follows a W^X (Write XOR Execute) model:
/// 1. Initially writable, filled from an assembler's finished code
/// 2. Made executable (and non-writable) before execution
/// 3. Can be made writable again for branch repatching
///
/// Instructions are fixed-width words, so patching happens at word
/// granularity through [`ExecutableBuffer::patch_word`].
pub struct ExecutableBuffer {
    /// Pointer to the allocated memory.
    ptr: NonNull<u8>,
    /// Total allocated size (page-aligned).
    capacity: usize,
    /// Bytes of code held.
    len: usize,
    /// Whether the buffer is currently executable.
    is_executable: bool,
}

impl ExecutableBuffer {
    /// Minimum allocation size (one page).
    pub const MIN_SIZE: usize = PAGE_SIZE;

    /// Create a new writable buffer with at least `min_capacity` bytes.
    ///
    /// The actual capacity is rounded up to the nearest page boundary.
    pub fn new(min_capacity: usize) -> io::Result<Self> {
        let capacity = Self::align_to_page(min_capacity.max(Self::MIN_SIZE));

        let ptr = unsafe { platform::alloc_rw(capacity) };
        let ptr = NonNull::new(ptr).ok_or_else(io::Error::last_os_error)?;

        Ok(ExecutableBuffer { ptr, capacity, len: 0, is_executable: false })
    }

    /// Create a buffer holding a copy of `code` and make it executable.
    pub fn from_code(code: &[u8]) -> io::Result<Self> {
        let mut buffer = Self::new(code.len())?;
        unsafe {
            std::ptr::copy_nonoverlapping(code.as_ptr(), buffer.ptr.as_ptr(), code.len());
        }
        buffer.len = code.len();
        buffer.make_executable()?;
        Ok(buffer)
    }

    /// Get the number of code bytes held.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if the buffer is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Get the total capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Check if the buffer is currently executable.
    #[inline]
    pub fn is_executable(&self) -> bool {
        self.is_executable
    }

    /// Get a pointer to the start of the buffer.
    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    /// Get a slice of the code bytes.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// Read the instruction word at `offset`.
    #[inline]
    pub fn word_at(&self, offset: usize) -> u32 {
        assert!(offset % 4 == 0 && offset + 4 <= self.len, "word offset out of bounds");
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.as_slice()[offset..offset + 4]);
        u32::from_le_bytes(bytes)
    }

    /// Overwrite the instruction word at `offset`.
    ///
    /// # Panics
    /// Panics if the buffer is executable or the offset is not a word
    /// position inside the code.
    pub fn patch_word(&mut self, offset: usize, word: u32) {
        assert!(!self.is_executable, "cannot patch executable buffer");
        assert!(offset % 4 == 0 && offset + 4 <= self.len, "patch out of bounds");

        unsafe {
            std::ptr::copy_nonoverlapping(
                word.to_le_bytes().as_ptr(),
                self.ptr.as_ptr().add(offset),
                4,
            );
        }
    }

    /// Make the buffer executable (and non-writable).
    pub fn make_executable(&mut self) -> io::Result<()> {
        if self.is_executable {
            return Ok(());
        }

        if unsafe { platform::make_executable(self.ptr.as_ptr(), self.capacity) } {
            self.is_executable = true;
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    /// Make the buffer writable again (for patching).
    pub fn make_writable(&mut self) -> io::Result<()> {
        if !self.is_executable {
            return Ok(());
        }

        if unsafe { platform::make_writable(self.ptr.as_ptr(), self.capacity) } {
            self.is_executable = false;
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    /// Get a function pointer to the start of the buffer.
    ///
    /// # Safety
    /// - The buffer must be executable.
    /// - The code must be valid for the signature `F`.
    #[inline]
    pub unsafe fn as_fn<F>(&self) -> F
    where
        F: Copy,
    {
        unsafe { self.as_fn_at(0) }
    }

    /// Get a function pointer to a specific offset.
    ///
    /// # Safety
    /// - The buffer must be executable.
    /// - The code at `offset` must be valid for the signature `F`.
    #[inline]
    pub unsafe fn as_fn_at<F>(&self, offset: usize) -> F
    where
        F: Copy,
    {
        debug_assert!(self.is_executable, "buffer must be executable");
        debug_assert!(offset < self.len, "offset out of bounds");
        debug_assert_eq!(
            std::mem::size_of::<F>(),
            std::mem::size_of::<*const ()>(),
            "F must be a function pointer"
        );
        let ptr = unsafe { self.ptr.as_ptr().add(offset) };
        unsafe { std::mem::transmute_copy(&ptr) }
    }

    /// Align a size up to the nearest page boundary.
    #[inline]
    const fn align_to_page(size: usize) -> usize {
        (size + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
    }
}

impl Drop for ExecutableBuffer {
    fn drop(&mut self) {
        unsafe {
            platform::free(self.ptr.as_ptr(), self.capacity);
        }
    }
}

// SAFETY: the mapping is owned by this value and synchronization around
// patching is managed by the holder.
unsafe impl Send for ExecutableBuffer {}
unsafe impl Sync for ExecutableBuffer {}

// =============================================================================
// Code Blobs
// =============================================================================

/// A named collection of routines sharing one executable mapping.
///
/// Runtime stubs are emitted in batches into a single blob; each routine is
/// addressed by its word offset from the blob start.
pub struct CodeBlob {
    buffer: ExecutableBuffer,
    name: &'static str,
}

impl CodeBlob {
    /// Wrap finished code in an executable blob.
    pub fn new(name: &'static str, code: &[u8]) -> io::Result<Self> {
        Ok(CodeBlob { buffer: ExecutableBuffer::from_code(code)?, name })
    }

    /// Get the blob name.
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Get the code size in bytes.
    #[inline]
    pub fn code_size(&self) -> usize {
        self.buffer.len()
    }

    /// Get the underlying buffer.
    #[inline]
    pub fn buffer(&self) -> &ExecutableBuffer {
        &self.buffer
    }

    /// Get the entry address at `offset`.
    #[inline]
    pub fn entry(&self, offset: usize) -> *const u8 {
        assert!(offset % 4 == 0 && offset < self.buffer.len(), "entry offset out of bounds");
        unsafe { self.buffer.as_ptr().add(offset) }
    }

    /// Get a function pointer to the routine at `offset`.
    ///
    /// # Safety
    /// The code at `offset` must be valid for the signature `F`.
    #[inline]
    pub unsafe fn as_fn_at<F: Copy>(&self, offset: usize) -> F {
        unsafe { self.buffer.as_fn_at(offset) }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_creation() {
        let buf = ExecutableBuffer::new(1024).expect("failed to allocate");
        assert!(buf.capacity() >= 1024);
        assert_eq!(buf.len(), 0);
        assert!(buf.is_empty());
        assert!(!buf.is_executable());
    }

    #[test]
    fn from_code_copies_and_seals() {
        let code = [0x13u8, 0x00, 0x00, 0x00, 0x67, 0x80, 0x00, 0x00];
        let buf = ExecutableBuffer::from_code(&code).expect("failed to allocate");
        assert_eq!(buf.len(), 8);
        assert!(buf.is_executable());
        assert_eq!(buf.as_slice(), &code);
        assert_eq!(buf.word_at(0), 0x0000_0013);
        assert_eq!(buf.word_at(4), 0x0000_8067);
    }

    #[test]
    fn patching_requires_writable_mapping() {
        let code = 0x0000_0013u32.to_le_bytes();
        let mut buf = ExecutableBuffer::from_code(&code).expect("failed to allocate");
        buf.make_writable().expect("failed to unprotect");
        buf.patch_word(0, 0x0000_8067);
        buf.make_executable().expect("failed to protect");
        assert_eq!(buf.word_at(0), 0x0000_8067);
    }

    #[test]
    #[should_panic(expected = "cannot patch executable buffer")]
    fn patching_executable_mapping_panics() {
        let code = 0x0000_0013u32.to_le_bytes();
        let mut buf = ExecutableBuffer::from_code(&code).expect("failed to allocate");
        buf.patch_word(0, 0);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn misaligned_patch_panics() {
        let code = [0u8; 8];
        let mut buf = ExecutableBuffer::from_code(&code).expect("failed to allocate");
        buf.make_writable().expect("failed to unprotect");
        buf.patch_word(2, 0);
    }

    #[test]
    fn permission_toggling_round_trips() {
        let mut buf = ExecutableBuffer::new(64).expect("failed to allocate");
        assert!(!buf.is_executable());
        buf.make_executable().expect("failed to protect");
        assert!(buf.is_executable());
        buf.make_writable().expect("failed to unprotect");
        assert!(!buf.is_executable());
    }

    #[test]
    fn page_alignment() {
        let buf = ExecutableBuffer::new(PAGE_SIZE + 1).expect("failed to allocate");
        assert_eq!(buf.capacity(), 2 * PAGE_SIZE);
    }

    #[test]
    fn blob_entries_are_word_addressed() {
        let mut code = Vec::new();
        for word in [0x0000_0013u32, 0x0000_0013, 0x0000_8067] {
            code.extend_from_slice(&word.to_le_bytes());
        }
        let blob = CodeBlob::new("test_stubs", &code).expect("failed to allocate");
        assert_eq!(blob.name(), "test_stubs");
        assert_eq!(blob.code_size(), 12);
        let base = blob.buffer().as_ptr() as usize;
        assert_eq!(blob.entry(8) as usize, base + 8);
    }

    #[test]
    #[should_panic(expected = "entry offset out of bounds")]
    fn blob_rejects_out_of_range_entry() {
        let code = 0x0000_0013u32.to_le_bytes();
        let blob = CodeBlob::new("test_stubs", &code).expect("failed to allocate");
        let _ = blob.entry(8);
    }
}
