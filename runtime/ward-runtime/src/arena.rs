//! Scoped bump allocator with a process-wide cache of retired chunks.
//!
//! Allocations are never freed individually; an arena releases its
//! memory as a unit when cleared or dropped. Retired chunks park on a
//! bounded free list so short-lived arenas stop hitting the system
//! allocator.

use std::sync::{Mutex, OnceLock};

use crate::exceptions::{invalid_argument, out_of_memory};
use crate::throw;

/// Alignment of the largest scalar; every request is rounded up to it.
const ALIGN: usize = 16;

const DEFAULT_THRESHOLD: usize = 10;

/// Free-list cap. Compile-time default of 10, overridable through
/// `WARD_ARENA_THRESHOLD`, read once.
pub fn threshold() -> usize {
    static THRESHOLD: OnceLock<usize> = OnceLock::new();
    *THRESHOLD.get_or_init(|| {
        std::env::var("WARD_ARENA_THRESHOLD")
            .ok()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(DEFAULT_THRESHOLD)
    })
}

fn slack() -> usize {
    threshold() * 1024
}

struct Chunk {
    base: *mut u8,
    cap: usize,
}

// Chunks hold exclusively-owned heap memory; they move between an arena
// and the free list but are never aliased.
unsafe impl Send for Chunk {}

impl Chunk {
    fn release(self) {
        unsafe { libc::free(self.base.cast()) };
    }
}

fn free_list() -> &'static Mutex<Vec<Chunk>> {
    static FREE_LIST: OnceLock<Mutex<Vec<Chunk>>> = OnceLock::new();
    FREE_LIST.get_or_init(|| Mutex::new(Vec::new()))
}

/// Number of retired chunks currently parked on the free list.
pub fn free_count() -> usize {
    free_list().lock().unwrap().len()
}

fn recycle(chunk: Chunk) {
    let mut list = free_list().lock().unwrap();
    if list.len() < threshold() {
        list.push(chunk);
    } else {
        drop(list);
        chunk.release();
    }
}

/// Take a parked chunk able to hold `need` bytes, if any.
fn reuse(need: usize) -> Option<Chunk> {
    let mut list = free_list().lock().unwrap();
    let index = list.iter().rposition(|chunk| chunk.cap >= need)?;
    Some(list.swap_remove(index))
}

pub struct Arena {
    chunks: Vec<Chunk>,
    avail: usize,
    total: usize,
}

impl Arena {
    pub fn new() -> Self {
        Self {
            chunks: Vec::new(),
            avail: 0,
            total: 0,
        }
    }

    /// Bump-allocate `nbytes`, rounded up to scalar alignment. A
    /// zero-byte request is refused with a null pointer. Raises
    /// `out_of_memory` if the system allocator fails.
    pub fn alloc(&mut self, nbytes: usize) -> *mut u8 {
        match self.try_alloc(nbytes) {
            Some(ptr) => ptr,
            None => throw!(out_of_memory),
        }
    }

    /// Zeroed allocation of `count * size` bytes. Zero counts and
    /// overflowing requests raise `invalid_argument`.
    pub fn calloc(&mut self, count: usize, size: usize) -> *mut u8 {
        if count == 0 || size == 0 {
            throw!(invalid_argument, "zero-sized arena allocation");
        }
        let Some(total) = count.checked_mul(size) else {
            throw!(invalid_argument, "arena allocation overflows");
        };
        let ptr = self.alloc(total);
        unsafe { std::ptr::write_bytes(ptr, 0, total) };
        ptr
    }

    pub(crate) fn try_alloc(&mut self, nbytes: usize) -> Option<*mut u8> {
        if nbytes == 0 {
            return Some(std::ptr::null_mut());
        }
        let aligned = round_up(nbytes);
        if self.remaining() < aligned {
            self.grow(aligned)?;
        }
        let chunk = self.chunks.last().unwrap();
        let ptr = unsafe { chunk.base.add(self.avail) };
        self.avail += aligned;
        Some(ptr)
    }

    fn remaining(&self) -> usize {
        match self.chunks.last() {
            Some(chunk) => chunk.cap - self.avail,
            None => 0,
        }
    }

    fn grow(&mut self, need: usize) -> Option<()> {
        let chunk = match reuse(need) {
            Some(chunk) => chunk,
            None => {
                let cap = need + slack();
                let base = unsafe { libc::malloc(cap) }.cast::<u8>();
                if base.is_null() {
                    return None;
                }
                Chunk { base, cap }
            }
        };
        self.total += chunk.cap;
        self.chunks.push(chunk);
        self.avail = 0;
        Some(())
    }

    /// Release everything allocated so far. The first chunk is kept for
    /// reuse; the rest retire to the free list.
    pub fn clear(&mut self) {
        while self.chunks.len() > 1 {
            let chunk = self.chunks.pop().unwrap();
            self.total -= chunk.cap;
            recycle(chunk);
        }
        self.avail = 0;
    }

    /// Release the arena entirely. Equivalent to dropping it.
    pub fn free(self) {}

    /// Bytes still available in the current chunk.
    pub fn capacity(&self) -> usize {
        self.remaining()
    }

    /// Bytes currently owned by the arena across all chunks.
    pub fn total(&self) -> usize {
        self.total
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        while let Some(chunk) = self.chunks.pop() {
            recycle(chunk);
        }
    }
}

fn round_up(nbytes: usize) -> usize {
    (nbytes + ALIGN - 1) & !(ALIGN - 1)
}

/// System allocation that raises `out_of_memory` instead of returning
/// null. Pair with `libc::free`.
pub fn try_malloc(nbytes: usize) -> *mut u8 {
    if nbytes == 0 {
        throw!(invalid_argument, "zero-sized allocation");
    }
    let ptr = unsafe { libc::malloc(nbytes) }.cast::<u8>();
    if ptr.is_null() {
        throw!(out_of_memory);
    }
    ptr
}

/// Zeroed system allocation; raises `out_of_memory` on failure.
pub fn try_calloc(count: usize, size: usize) -> *mut u8 {
    if count == 0 || size == 0 {
        throw!(invalid_argument, "zero-sized allocation");
    }
    let ptr = unsafe { libc::calloc(count, size) }.cast::<u8>();
    if ptr.is_null() {
        throw!(out_of_memory);
    }
    ptr
}

/// Resize a `try_malloc` allocation; raises `out_of_memory` on failure,
/// leaving the original block intact.
///
/// # Safety
/// `ptr` must be null or a live pointer from this module's allocation
/// functions.
pub unsafe fn try_realloc(ptr: *mut u8, nbytes: usize) -> *mut u8 {
    if nbytes == 0 {
        throw!(invalid_argument, "zero-sized allocation");
    }
    let next = libc::realloc(ptr.cast(), nbytes).cast::<u8>();
    if next.is_null() {
        throw!(out_of_memory);
    }
    next
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_byte_request_is_refused() {
        let mut arena = Arena::new();
        assert!(arena.try_alloc(0).unwrap().is_null());
        assert_eq!(arena.total(), 0);
    }

    #[test]
    fn allocations_are_scalar_aligned() {
        let mut arena = Arena::new();
        for request in [1usize, 3, 17, 64] {
            let ptr = arena.alloc(request);
            assert_eq!(ptr as usize % ALIGN, 0);
        }
    }

    #[test]
    fn rounding_only_grows() {
        assert_eq!(round_up(1), ALIGN);
        assert_eq!(round_up(ALIGN), ALIGN);
        assert_eq!(round_up(ALIGN + 1), 2 * ALIGN);
    }

    #[test]
    fn clear_restores_full_capacity_of_the_base_chunk() {
        let mut arena = Arena::new();
        arena.alloc(100);
        let owned = arena.total();
        arena.clear();
        assert_eq!(arena.capacity(), owned);
        assert_eq!(arena.total(), owned);
    }

    #[test]
    fn calloc_zeroes_reused_memory() {
        let mut arena = Arena::new();
        let first = arena.alloc(64);
        unsafe { std::ptr::write_bytes(first, 0xAB, 64) };
        arena.clear();
        let second = arena.calloc(8, 8);
        let bytes = unsafe { std::slice::from_raw_parts(second, 64) };
        assert!(bytes.iter().all(|&b| b == 0));
    }
}
