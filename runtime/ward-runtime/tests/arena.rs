use std::sync::Mutex;

use ward_runtime::{free_count, protected, scope_alloc, threshold, Arena};

// The free list is process-wide; tests that observe its length take
// this lock so they do not race each other.
static FREE_LIST_LOCK: Mutex<()> = Mutex::new(());

#[test]
fn cleared_arena_reuses_its_base_chunk() {
    let _guard = FREE_LIST_LOCK.lock().unwrap();
    let mut arena = Arena::new();
    arena.alloc(4096);
    let owned = arena.total();
    arena.clear();
    arena.alloc(4096);
    // the second allocation fits in the retained chunk: no growth
    assert_eq!(arena.total(), owned);
    assert!(free_count() <= threshold());
}

#[test]
fn retired_chunks_park_on_the_free_list() {
    let _guard = FREE_LIST_LOCK.lock().unwrap();
    let before = free_count();
    {
        let mut arena = Arena::new();
        arena.alloc(512);
        drop(arena);
    }
    let after = free_count();
    assert!(after == before + 1 || after == threshold());
    assert!(after <= threshold());
}

#[test]
fn free_list_never_exceeds_the_cap() {
    let _guard = FREE_LIST_LOCK.lock().unwrap();
    for _ in 0..3 * threshold() {
        let mut arena = Arena::new();
        arena.alloc(256);
        drop(arena);
    }
    assert!(free_count() <= threshold());
}

#[test]
fn parked_chunks_are_reused_before_growing() {
    let _guard = FREE_LIST_LOCK.lock().unwrap();
    {
        let mut arena = Arena::new();
        arena.alloc(2048);
        drop(arena);
    }
    let parked = free_count();
    assert!(parked > 0);
    let mut arena = Arena::new();
    arena.alloc(1024);
    assert_eq!(free_count(), parked - 1);
}

#[test]
fn scoped_allocations_die_with_their_frame() {
    let _guard = FREE_LIST_LOCK.lock().unwrap();
    let before = free_count();
    protected! {
        try {
            let ptr = scope_alloc(128);
            assert!(!ptr.is_null());
            unsafe { std::ptr::write_bytes(ptr, 0x5A, 128) };
        }
    }
    // the frame's arena retired its chunk on pop
    let after = free_count();
    assert!(after == before + 1 || after == threshold());
}

#[test]
fn zero_sized_scoped_allocation_is_refused() {
    protected! {
        try {
            assert!(scope_alloc(0).is_null());
        }
    }
}

#[test]
fn arena_calloc_rejects_zero_counts() {
    use ward_runtime::invalid_argument;

    let mut caught = false;
    let mut arena = Arena::new();
    protected! {
        try {
            arena.calloc(0, 16);
        }
        catch (invalid_argument) {
            caught = true;
        }
    }
    assert!(caught);
}

#[test]
fn arena_calloc_rejects_overflowing_requests() {
    use ward_runtime::invalid_argument;

    let mut caught = false;
    let mut arena = Arena::new();
    protected! {
        try {
            arena.calloc(usize::MAX, 2);
        }
        catch (invalid_argument) {
            caught = true;
        }
    }
    assert!(caught);
}

#[test]
fn allocations_inside_a_catch_belong_to_the_catching_frame() {
    use ward_runtime::exception;

    exception!(trip);

    protected! {
        try {
            ward_runtime::throw!(trip);
        }
        catch (trip) {
            let ptr = scope_alloc(64);
            assert!(!ptr.is_null());
            unsafe { std::ptr::write_bytes(ptr, 1, 64) };
        }
    }
}

#[test]
fn try_malloc_round_trips_through_the_system_allocator() {
    let ptr = ward_runtime::try_malloc(64);
    assert!(!ptr.is_null());
    unsafe {
        std::ptr::write_bytes(ptr, 0x11, 64);
        let grown = ward_runtime::try_realloc(ptr, 256);
        assert!(!grown.is_null());
        assert_eq!(*grown, 0x11);
        libc::free(grown.cast());
    }
}
