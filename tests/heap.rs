//! Heap and collector integration tests.

use kite::heap::chunk::{self, Bitmap};
use kite::heap::mock::*;
use kite::heap::MemoryManager;
use kite::util::constants::*;
use kite::util::options::Options;
use kite::vm::Value;
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::sync::atomic::Ordering;

fn manager() -> MemoryManager<MockHost> {
    let options = Options::default();
    MemoryManager::with_options(MockHost::new(), options, 8 * BYTES_IN_SLOT)
}

/// Allocate 1000 unreferenced objects, collect, and expect an empty heap.
#[test]
fn allocate_and_sweep() {
    let mut mm = manager();
    let before = DESTROY_COUNT.load(Ordering::Relaxed);
    for _ in 0..1000 {
        alloc_mock_object(&mut mm);
    }
    let chunks = mm.block_allocator().chunk_count();
    assert_eq!(chunks, 2); // 504 four-slot objects per chunk

    mm.run_gc(false);

    assert_eq!(mm.used_mem(), 0);
    assert_eq!(mm.allocated_mem(), chunks * chunk::AVAILABLE_SLOTS * BYTES_IN_SLOT);
    for c in mm.block_allocator().chunks() {
        assert_eq!(c.n_used_slots(), 0);
        c.assert_bitmap_coherence();
    }
    // Destroy hooks ran for every dead object. Other tests share the global
    // counter, so only a lower bound is meaningful.
    assert!(DESTROY_COUNT.load(Ordering::Relaxed) - before >= 1000);
}

/// Collecting an already-empty heap allocates nothing and frees nothing.
#[test]
fn sweep_finality() {
    let mut mm = manager();
    for _ in 0..100 {
        alloc_mock_object(&mut mm);
    }
    mm.run_gc(false);
    assert_eq!(mm.used_mem(), 0);
    let allocated = mm.allocated_mem();

    mm.run_gc(true);
    assert_eq!(mm.used_mem(), 0);
    assert_eq!(mm.allocated_mem(), allocated);
}

/// A freed size-class run is split to serve smaller requests, with the
/// remainder binned by its own size.
#[test]
fn size_class_split() {
    let mut mm = manager();

    // One 16-slot object surrounded by live 4-slot keepers filling the rest
    // of the chunk, so its slots form an isolated free run after the sweep.
    let hole = alloc_mock_sized(&mut mm, 16 * BYTES_IN_SLOT);
    let keeper_count = (chunk::AVAILABLE_SLOTS - 16) / 4;
    let mut keepers = Vec::new();
    for _ in 0..keeper_count {
        keepers.push(alloc_mock_object(&mut mm));
    }
    assert_eq!(mm.block_allocator().chunk_count(), 1);
    let hole_addr = hole.to_address();

    for k in &keepers {
        let v = Value::from_managed(*k);
        mm.host_mut().roots.push(v);
    }
    mm.run_gc(false);

    // The 16-slot run sits in its exact bin.
    let run = mm.block_allocator().bin_head(16).expect("16-slot run binned");
    assert_eq!(run.to_address(), hole_addr);

    // A 4-slot allocation splits it; the 12-slot remainder lands in bin 12.
    let small = alloc_mock_object(&mut mm);
    assert_eq!(small.to_address(), hole_addr);
    assert!(mm.block_allocator().bin_head(16).is_none());
    let remainder = mm.block_allocator().bin_head(12).expect("12-slot remainder");
    assert_eq!(remainder.to_address(), hole_addr + 4 * BYTES_IN_SLOT);
}

/// Steele barrier: a store of a new object into a black parent grays the
/// parent, and the next incremental cycle marks the child.
#[test]
fn incremental_barrier() {
    let mut mm = manager();

    let a = alloc_mock_object(&mut mm);
    let root = Value::from_managed(a);
    mm.host_mut().roots.push(root);
    mm.run_gc(false);

    // The heap is mostly empty, so the next collection is incremental and A
    // kept its black bit.
    assert!(mm.incremental_gc_pending());
    let chunk_of_a = kite::heap::Chunk::containing(a.to_address());
    let index_a = kite::heap::HeapItem::from_address(a.to_address()).slot_index();
    assert!(chunk_of_a.test_bit(Bitmap::Black, index_a));

    // Allocate B and store it into the black A; the barrier grays A.
    let b = alloc_mock_object(&mut mm);
    store_field(&mut mm, a, 0, Value::from_managed(b));
    assert!(chunk_of_a.test_bit(Bitmap::Gray, index_a));

    // A control object that nothing references.
    let c = alloc_mock_object(&mut mm);
    let chunk_of_c = kite::heap::Chunk::containing(c.to_address());
    let index_c = kite::heap::HeapItem::from_address(c.to_address()).slot_index();

    mm.run_gc(false);

    // B was only reachable through the re-scanned A; it must have survived.
    let chunk_of_b = kite::heap::Chunk::containing(b.to_address());
    let index_b = kite::heap::HeapItem::from_address(b.to_address()).slot_index();
    assert!(chunk_of_b.test_bit(Bitmap::Object, index_b));
    assert_eq!(field(a, 0), Value::from_managed(b));
    // The unreferenced control was collected.
    assert!(!chunk_of_c.test_bit(Bitmap::Object, index_c));
}

/// After any collection, live + binned + bump slots account for every slot.
#[test]
fn slot_accounting_round_trip() {
    let mut rng = ChaCha8Rng::seed_from_u64(0x5eed);
    let mut mm = manager();

    for round in 0..8 {
        let mut kept = Vec::new();
        for _ in 0..400 {
            let slots = rng.random_range(4..=40);
            let h = alloc_mock_sized(&mut mm, slots * BYTES_IN_SLOT);
            if rng.random_bool(0.3) {
                kept.push(Value::from_managed(h));
            }
        }
        mm.host_mut().roots = kept;
        mm.run_gc(round % 2 == 0);

        let block = mm.block_allocator();
        let (_, bump_slots) = block.bump_region();
        assert_eq!(
            block.used_slots_after_last_sweep + block.slots_in_bins() + bump_slots,
            block.total_slots(),
            "slot accounting after round {}",
            round
        );
        for c in block.chunks() {
            c.assert_bitmap_coherence();
        }
    }
}

/// The bump region never overlaps a free-bin entry.
#[test]
fn bump_region_never_overlaps_bins() {
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let mut mm = manager();

    let mut kept = Vec::new();
    for _ in 0..300 {
        let slots = rng.random_range(4..=24);
        let h = alloc_mock_sized(&mut mm, slots * BYTES_IN_SLOT);
        if rng.random_bool(0.5) {
            kept.push(Value::from_managed(h));
        }
    }
    mm.host_mut().roots = kept;
    mm.run_gc(false);

    // Allocations after the sweep mix bin hits and bump allocation.
    for _ in 0..100 {
        let slots = rng.random_range(4..=24);
        alloc_mock_sized(&mut mm, slots * BYTES_IN_SLOT);

        let block = mm.block_allocator();
        let (bump, n_free) = block.bump_region();
        let Some(bump) = bump else { continue };
        let bump_start = bump.to_address().as_usize();
        let bump_end = bump_start + n_free * BYTES_IN_SLOT;
        for bin in 0..kite::heap::block_allocator::NUM_BINS {
            let mut cursor = block.bin_head(bin);
            while let Some(entry) = cursor {
                let start = entry.to_address().as_usize();
                let end = start + unsafe { entry.available_slots() } * BYTES_IN_SLOT;
                assert!(end <= bump_start || start >= bump_end, "bin entry overlaps bump");
                cursor = unsafe { entry.next_free() };
            }
        }
    }
}

/// Objects on the JS stack are roots; stale pointers to freed cells are
/// skipped.
#[test]
fn js_stack_roots() {
    let mut mm = manager();
    let a = alloc_mock_object(&mut mm);
    mm.host_mut().stack.push(Value::from_managed(a));
    mm.run_gc(true);
    assert!(mm.used_mem() > 0);

    mm.host_mut().stack.clear();
    mm.run_gc(true);
    assert_eq!(mm.used_mem(), 0);
}

/// Weakly-held values die unless the host marks them (or an ancestor)
/// essential; destruction hooks run before the sweep clears the slot.
#[test]
fn weak_table_keep_alive() {
    let mut mm = manager();

    let plain = alloc_mock_object(&mut mm);
    let essential = alloc_mock_object(&mut mm);
    let child = alloc_mock_object(&mut mm);

    let plain_v = Value::from_managed(plain);
    let essential_v = Value::from_managed(essential);
    let child_v = Value::from_managed(child);

    // essential: host-owned; child: wrapper whose root ancestor is the
    // essential object.
    let parent_idx = mm.host_mut().add_wrapper(essential_v, true, None);
    mm.host_mut().add_wrapper(child_v, false, Some(parent_idx));
    mm.host_mut().add_wrapper(plain_v, false, None);

    let w_plain = mm.weak_slot();
    let w_essential = mm.weak_slot();
    let w_child = mm.weak_slot();
    unsafe {
        *w_plain = plain_v;
        *w_essential = essential_v;
        *w_child = child_v;
    }

    mm.run_gc(true);

    unsafe {
        // The plain wrapper died: hook ran, slot nulled.
        assert!((*w_plain).is_undefined());
        // The essential wrapper and its descendant survived.
        assert_eq!(*w_essential, essential_v);
        assert_eq!(*w_child, child_v);
    }
    assert_eq!(mm.host().destroyed, vec![plain_v]);
}

/// Strong persistent slots keep their referents alive.
#[test]
fn persistent_values_are_roots() {
    let mut mm = manager();
    let a = alloc_mock_object(&mut mm);
    let slot = mm.persistent_slot();
    unsafe { *slot = Value::from_managed(a) };

    mm.run_gc(true);
    assert!(mm.used_mem() > 0);

    unsafe { *slot = Value::undefined() };
    mm.run_gc(true);
    assert_eq!(mm.used_mem(), 0);
}

/// Huge items own private chunks and die when unmarked.
#[test]
fn huge_items() {
    let mut mm = manager();
    let size = chunk::DATA_BYTES + BYTES_IN_SLOT;
    let huge = alloc_mock_sized(&mut mm, size);
    assert!(mm.large_items_mem() > 0);

    mm.host_mut().roots.push(Value::from_managed(huge));
    mm.run_gc(true);
    assert!(mm.large_items_mem() > 0);

    mm.host_mut().roots.clear();
    mm.run_gc(true);
    assert_eq!(mm.large_items_mem(), 0);
}

/// A huge item allocated while an incremental cycle is pending is created
/// live, so the preserved-black-bit sweep cannot reclaim it prematurely.
#[test]
fn huge_item_premarked_during_incremental() {
    let mut mm = manager();
    let keeper = alloc_mock_object(&mut mm);
    mm.host_mut().roots.push(Value::from_managed(keeper));
    mm.run_gc(false);
    assert!(mm.incremental_gc_pending());

    let size = chunk::DATA_BYTES + BYTES_IN_SLOT;
    alloc_mock_sized(&mut mm, size);

    // The incremental cycle must not reclaim the unreferenced huge item.
    mm.run_gc(false);
    assert!(mm.large_items_mem() > 0);

    // A full collection does.
    mm.run_gc(true);
    assert_eq!(mm.large_items_mem(), 0);
}

/// Call-context frames follow strict stack discipline across chunk
/// boundaries.
#[test]
fn call_context_stack_discipline() {
    let mut mm = manager();
    let per_chunk = (chunk::AVAILABLE_SLOTS - 1) / 8; // 8 slots per frame
    let mut frames = Vec::new();
    for _ in 0..per_chunk + 10 {
        frames.push(mm.alloc_call_context());
    }
    // Distinct, slot-aligned frames.
    for w in frames.windows(2) {
        assert_ne!(w[0], w[1]);
    }
    for _ in 0..frames.len() {
        mm.free_call_context();
    }
    // Re-allocation replays the same addresses.
    let again = mm.alloc_call_context();
    assert_eq!(again, frames[0]);
}

/// Aggressive mode collects on every allocation and the accounting assert
/// in run_gc stays quiet.
#[test]
fn aggressive_gc_mode() {
    let mut options = Options::default();
    options.aggressive_gc = true;
    let mut mm = MemoryManager::with_options(MockHost::new(), options, 8 * BYTES_IN_SLOT);

    let mut kept = Vec::new();
    for i in 0..50 {
        let h = alloc_mock_object(&mut mm);
        if i % 3 == 0 {
            kept.push(Value::from_managed(h));
            mm.host_mut().roots = kept.clone();
        }
    }
    mm.run_gc(true);
    assert_eq!(mm.used_mem(), kept.len() * MOCK_OBJECT_SIZE);
}
