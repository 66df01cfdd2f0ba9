use std::{collections::HashSet, fs::OpenOptions, io::ErrorKind, thread};

use disk::{Disk, DiskError};
use memory::PhysicalMemory;
use pager::{PageCounts, PageKey, Pager, PagerConfig, PagerError, TlbPolicy};
use rand::Rng;
use serial_test::serial;

const PAGE_SIZE: usize = 64;
const SWAP_CAPACITY: usize = PAGE_SIZE * 16;
const MEMORY_CAPACITY: usize = PAGE_SIZE * 8;

type TestPager = Pager<PAGE_SIZE, SWAP_CAPACITY, MEMORY_CAPACITY>;
type TestDisk = Disk<PAGE_SIZE, SWAP_CAPACITY>;

fn setup(name: &str, frames: u32) -> (TestPager, TestDisk) {
    let _ = env_logger::builder().is_test(true).try_init();
    let disk = Disk::create(name).unwrap();
    let memory = PhysicalMemory::create();
    let config = PagerConfig {
        tlb_size: 4,
        tlb_policy: TlbPolicy::RoundRobin,
    };
    let pager = TestPager::new(&memory, &disk, 0..frames, config).unwrap();
    (pager, disk)
}

fn resident_keys(pager: &TestPager) -> Vec<PageKey> {
    pager.resident_pages().into_iter().map(|(key, _)| key).collect()
}

/// Frames are either free or held by exactly one resident page.
fn assert_frames_consistent(pager: &TestPager, frames: usize) {
    let free = pager.free_frames();
    let resident = pager.resident_pages();
    let mut seen = HashSet::new();
    for frame in free.iter().chain(resident.iter().map(|(_, e)| &e.ppn)) {
        assert!(seen.insert(*frame), "frame {} is held twice", frame);
    }
    assert_eq!(seen.len(), frames);
}

fn assert_slots_unique(pager: &TestPager) {
    let slots = pager.swap_slots();
    let distinct: HashSet<_> = slots.iter().map(|(_, slot)| *slot).collect();
    assert_eq!(distinct.len(), slots.len());
}

#[test]
#[serial]
fn three_pages_share_one_frame() {
    let (pager, disk) = setup("pager_one_frame", 1);
    let pid = pager.create_process(3);
    pager.allocate_page_range(pid, 0, 3).unwrap();
    assert_eq!(resident_keys(&pager), vec![PageKey::new(pid, 2)]);

    let patterns = [[1, 2, 3, 4], [5, 6, 7, 8], [9, 10, 11, 12]];
    for (vpn, pattern) in patterns.iter().enumerate() {
        let vaddr = (vpn * PAGE_SIZE) as u64;
        assert_eq!(pager.write_virtual_memory(pid, vaddr, pattern, 0, 4), Ok(4));
    }
    for (vpn, pattern) in patterns.iter().enumerate() {
        let vaddr = (vpn * PAGE_SIZE) as u64;
        let mut buf = [0; 4];
        assert_eq!(pager.read_virtual_memory(pid, vaddr, &mut buf, 0, 4), Ok(4));
        assert_eq!(&buf, pattern);
    }

    assert_eq!(
        pager.page_counts(pid),
        Ok(PageCounts {
            resident: 1,
            swapped: 2,
            untouched: 0,
            total: 3
        })
    );
    assert!(pager.free_frames().is_empty());
    assert_frames_consistent(&pager, 1);
    assert_slots_unique(&pager);
    assert_eq!(pager.swap_slots().len(), 3);
    disk.remove().unwrap();
}

#[test]
#[serial]
fn access_across_page_boundary() {
    let (pager, disk) = setup("pager_boundary", 2);
    let pid = pager.create_process(4);
    pager.allocate_page_range(pid, 0, 4).unwrap();

    let data: Vec<u8> = (0..150).collect();
    assert_eq!(pager.write_virtual_memory(pid, 40, &data, 0, 150), Ok(150));

    let mut buf = vec![0; 160];
    assert_eq!(pager.read_virtual_memory(pid, 40, &mut buf, 10, 150), Ok(150));
    assert_eq!(&buf[10..], &data[..]);
    assert_eq!(&buf[..10], &[0; 10]);

    // Offset and length must fit the caller's buffer.
    assert_eq!(
        pager.read_virtual_memory(pid, 0, &mut buf, 100, 61),
        Err(PagerError::InvalidRange)
    );
    assert_frames_consistent(&pager, 2);
    disk.remove().unwrap();
}

#[test]
#[serial]
fn access_stops_at_unmapped_page() {
    let (pager, disk) = setup("pager_unmapped", 4);
    let pid = pager.create_process(4);
    pager.allocate_page_range(pid, 0, 2).unwrap();

    let data = [0xab; 100];
    assert_eq!(pager.write_virtual_memory(pid, 100, &data, 0, 100), Ok(28));
    let mut buf = [0; 100];
    assert_eq!(pager.read_virtual_memory(pid, 100, &mut buf, 0, 100), Ok(28));
    assert_eq!(&buf[..28], &data[..28]);

    let beyond = (PAGE_SIZE * 4) as u64;
    assert_eq!(pager.read_virtual_memory(pid, beyond, &mut buf, 0, 10), Ok(0));
    assert_eq!(
        pager.read_virtual_memory(pid + 1, 0, &mut buf, 0, 10),
        Err(PagerError::NoSuchProcess(pid + 1))
    );
    disk.remove().unwrap();
}

#[test]
#[serial]
fn read_only_page_stops_write() {
    let (pager, disk) = setup("pager_read_only", 3);
    let pid = pager.create_process(3);
    pager.allocate_page_range(pid, 0, 3).unwrap();
    pager.set_read_only(pid, 1, true).unwrap();

    let data = [0x5a; 100];
    assert_eq!(pager.write_virtual_memory(pid, 32, &data, 0, 100), Ok(32));

    let mut page = [0xff; PAGE_SIZE];
    pager
        .read_virtual_memory(pid, PAGE_SIZE as u64, &mut page, 0, PAGE_SIZE)
        .unwrap();
    assert_eq!(page, [0; PAGE_SIZE]);

    assert_eq!(
        pager.translate(pid, PAGE_SIZE as u64 + 3, true),
        Err(PagerError::ReadOnly(PAGE_SIZE as u64 + 3))
    );
    assert!(pager.translate(pid, PAGE_SIZE as u64 + 3, false).is_ok());

    // Loader writes go through regardless.
    pager.fill_page(pid, 1, 8, &[7; 4]).unwrap();
    let mut buf = [0; 4];
    pager
        .read_virtual_memory(pid, PAGE_SIZE as u64 + 8, &mut buf, 0, 4)
        .unwrap();
    assert_eq!(buf, [7; 4]);
    disk.remove().unwrap();
}

#[test]
#[serial]
fn clean_page_is_evicted_before_dirty_ones() {
    let (pager, disk) = setup("pager_tiers", 2);
    let pid = pager.create_process(3);
    let key = |vpn| PageKey::new(pid, vpn);

    pager.allocate_page_range(pid, 0, 2).unwrap();
    assert_eq!(resident_keys(&pager), vec![key(0), key(1)]);

    // Every page is used and dirty: the last one goes and the rest lose
    // their used bit.
    pager.allocate_page_range(pid, 2, 1).unwrap();
    assert_eq!(resident_keys(&pager), vec![key(0), key(2)]);
    assert!(!pager.entry(pid, 0).unwrap().used);
    assert_eq!(pager.swap_slots(), vec![(key(1), 0)]);

    let mut buf = [0; 1];
    pager
        .read_virtual_memory(pid, PAGE_SIZE as u64, &mut buf, 0, 1)
        .unwrap();
    assert_eq!(resident_keys(&pager), vec![key(2), key(1)]);
    let swapped_in = pager.entry(pid, 1).unwrap();
    assert!(swapped_in.used);
    assert!(!swapped_in.dirty);

    // Page 1 is clean and goes without being written out.
    pager.read_virtual_memory(pid, 0, &mut buf, 0, 1).unwrap();
    assert_eq!(resident_keys(&pager), vec![key(2), key(0)]);
    assert_eq!(pager.swap_slots(), vec![(key(0), 1), (key(1), 0)]);
    assert_frames_consistent(&pager, 2);
    disk.remove().unwrap();
}

#[test]
#[serial]
fn allocation_fails_without_frames() {
    let (pager, disk) = setup("pager_no_frames", 0);
    let pid = pager.create_process(2);
    assert_eq!(
        pager.allocate_page_range(pid, 0, 1),
        Err(PagerError::OutOfMemory)
    );
    assert_eq!(pager.page_counts(pid).unwrap().total, 0);
    disk.remove().unwrap();
}

#[test]
#[serial]
fn frame_taken_outside_paging_is_not_reclaimed() {
    let (pager, disk) = setup("pager_acquire", 1);
    let frame = pager.acquire_frame().unwrap();
    assert!(pager.free_frames().is_empty());

    let pid = pager.create_process(2);
    assert_eq!(
        pager.allocate_page_range(pid, 0, 2),
        Err(PagerError::OutOfMemory)
    );
    assert_eq!(pager.acquire_frame(), Err(PagerError::OutOfMemory));

    pager.free_frame(frame).unwrap();
    pager.allocate_page_range(pid, 0, 2).unwrap();
    assert_eq!(pager.page_counts(pid).unwrap().resident, 1);
    disk.remove().unwrap();
}

#[test]
#[serial]
fn only_acquired_frames_can_be_freed() {
    let (pager, disk) = setup("pager_free_frame", 3);
    let pid = pager.create_process(1);
    pager.allocate_page_range(pid, 0, 1).unwrap();
    let mapped = pager.entry(pid, 0).unwrap().ppn;
    let lent = pager.acquire_frame().unwrap();
    let free = pager.free_frames()[0];

    assert_eq!(pager.free_frame(free), Err(PagerError::InvalidRange));
    assert_eq!(pager.free_frame(mapped), Err(PagerError::InvalidRange));
    assert_eq!(pager.free_frame(7), Err(PagerError::InvalidRange));
    assert_eq!(pager.free_frames(), vec![free]);
    assert!(pager.entry(pid, 0).unwrap().valid);

    assert_eq!(pager.free_frame(lent), Ok(()));
    assert_eq!(pager.free_frame(lent), Err(PagerError::InvalidRange));
    assert_frames_consistent(&pager, 3);
    disk.remove().unwrap();
}

#[test]
#[serial]
fn duplicate_frames_are_rejected() {
    let _ = env_logger::builder().is_test(true).try_init();
    let disk = TestDisk::create("pager_duplicate_frames").unwrap();
    let memory = PhysicalMemory::<MEMORY_CAPACITY>::create();
    assert!(matches!(
        TestPager::new(&memory, &disk, [0, 1, 0], PagerConfig::default()),
        Err(PagerError::InvalidRange)
    ));
    assert!(TestPager::new(&memory, &disk, [2, 1, 0], PagerConfig::default()).is_ok());
    disk.remove().unwrap();
}

#[test]
#[serial]
fn bad_ranges_are_rejected() {
    let (pager, disk) = setup("pager_ranges", 4);
    let pid = pager.create_process(4);
    assert_eq!(
        pager.allocate_page_range(pid, 0, 0),
        Err(PagerError::InvalidRange)
    );
    assert_eq!(
        pager.allocate_page_range(pid, 3, 2),
        Err(PagerError::InvalidRange)
    );
    assert_eq!(
        pager.allocate_page_range(pid, u32::MAX, 2),
        Err(PagerError::InvalidRange)
    );
    pager.allocate_page_range(pid, 1, 2).unwrap();
    assert_eq!(
        pager.allocate_page_range(pid, 0, 2),
        Err(PagerError::InvalidRange)
    );
    assert_eq!(pager.free_frames().len(), 2);
    assert_eq!(
        pager.allocate_page_range(42, 0, 1),
        Err(PagerError::NoSuchProcess(42))
    );
    disk.remove().unwrap();
}

#[test]
#[serial]
fn full_swap_keeps_victim_resident() {
    const ONE_SLOT: usize = PAGE_SIZE;
    let _ = env_logger::builder().is_test(true).try_init();
    let disk = Disk::<PAGE_SIZE, ONE_SLOT>::create("pager_swap_full").unwrap();
    let memory = PhysicalMemory::<MEMORY_CAPACITY>::create();
    let pager =
        Pager::<PAGE_SIZE, ONE_SLOT, MEMORY_CAPACITY>::new(&memory, &disk, [0], PagerConfig::default())
            .unwrap();

    let pid = pager.create_process(3);
    pager.allocate_page_range(pid, 0, 2).unwrap();
    assert_eq!(
        pager.allocate_page_range(pid, 2, 1),
        Err(PagerError::SwapFull)
    );
    let victim = pager.entry(pid, 1).unwrap();
    assert!(victim.valid);
    assert!(pager.entry(pid, 2).is_none());
    let resident: Vec<PageKey> = pager.resident_pages().into_iter().map(|(k, _)| k).collect();
    assert_eq!(resident, vec![PageKey::new(pid, 1)]);

    let mut buf = [0; 4];
    assert_eq!(
        pager.read_virtual_memory(pid, 0, &mut buf, 0, 4),
        Err(PagerError::SwapFull)
    );
    disk.remove().unwrap();
}

#[test]
#[serial]
fn fill_page_after_eviction() {
    let (pager, disk) = setup("pager_fill", 1);
    let pid = pager.create_process(2);
    pager.allocate_page_range(pid, 0, 2).unwrap();
    assert!(!pager.entry(pid, 0).unwrap().valid);

    pager.fill_page(pid, 0, 0, b"abcd").unwrap();
    assert!(pager.entry(pid, 0).unwrap().valid);
    pager.fill_page(pid, 1, 60, b"wxyz").unwrap();

    let mut buf = [0; 4];
    pager.read_virtual_memory(pid, 0, &mut buf, 0, 4).unwrap();
    assert_eq!(&buf, b"abcd");
    pager.read_virtual_memory(pid, 124, &mut buf, 0, 4).unwrap();
    assert_eq!(&buf, b"wxyz");

    assert_eq!(
        pager.fill_page(pid, 0, 62, b"abcd"),
        Err(PagerError::InvalidRange)
    );
    assert_eq!(
        pager.fill_page(pid, 5, 0, b"abcd"),
        Err(PagerError::InvalidRange)
    );
    disk.remove().unwrap();
}

#[test]
#[serial]
fn failed_swap_in_returns_the_frame() {
    let name = "pager_bad_swap_in";
    let (pager, disk) = setup(name, 1);
    let pid = pager.create_process(2);
    pager.allocate_page_range(pid, 0, 2).unwrap();
    let mut buf = [0xff; 4];
    pager.read_virtual_memory(pid, 0, &mut buf, 0, 4).unwrap();
    assert_eq!(resident_keys(&pager), vec![PageKey::new(pid, 0)]);
    assert!(!pager.entry(pid, 0).unwrap().dirty);

    // Cut the swap file short so the slot of page 1 can no longer be read.
    let file = OpenOptions::new()
        .write(true)
        .open(disk::make_name(name))
        .unwrap();
    file.set_len(8).unwrap();
    assert_eq!(
        pager.read_virtual_memory(pid, PAGE_SIZE as u64, &mut buf, 0, 4),
        Err(PagerError::Swap(DiskError::Io(ErrorKind::UnexpectedEof)))
    );
    assert_eq!(pager.free_frames(), vec![0]);
    assert!(pager.resident_pages().is_empty());
    assert!(!pager.entry(pid, 1).unwrap().valid);

    file.set_len(8 + SWAP_CAPACITY as u64).unwrap();
    assert_eq!(
        pager.read_virtual_memory(pid, PAGE_SIZE as u64, &mut buf, 0, 4),
        Ok(4)
    );
    assert_eq!(buf, [0; 4]);
    assert_eq!(resident_keys(&pager), vec![PageKey::new(pid, 1)]);
    assert_frames_consistent(&pager, 1);
    disk.remove().unwrap();
}

#[test]
#[serial]
fn teardown_returns_frames_and_slots() {
    let (pager, disk) = setup("pager_teardown", 2);
    let first = pager.create_process(4);
    let second = pager.create_process(2);
    pager.allocate_page_range(first, 0, 4).unwrap();
    pager.allocate_page_range(second, 0, 2).unwrap();
    pager.restore_state(first).unwrap();

    pager.release_all(first).unwrap();
    assert!(resident_keys(&pager).iter().all(|key| key.pid == second));
    assert!(pager.swap_slots().iter().all(|(key, _)| key.pid == second));
    assert!(pager
        .tlb_entries()
        .iter()
        .flatten()
        .all(|cached| cached.key.pid != first));
    assert_eq!(pager.free_slots().len(), 4);
    assert_eq!(pager.page_counts(first), Err(PagerError::NoSuchProcess(first)));
    assert_eq!(pager.release_all(first), Err(PagerError::NoSuchProcess(first)));

    pager.release_all(second).unwrap();
    assert!(pager.resident_pages().is_empty());
    assert!(pager.swap_slots().is_empty());
    let mut frames = pager.free_frames();
    frames.sort();
    assert_eq!(frames, vec![0, 1]);

    // Released slots are handed out again before new ones.
    let third = pager.create_process(3);
    pager.allocate_page_range(third, 0, 3).unwrap();
    let reused: HashSet<_> = pager.swap_slots().into_iter().map(|(_, s)| s).collect();
    assert!(reused.iter().all(|slot| *slot < 6));
    disk.remove().unwrap();
}

#[test]
#[serial]
fn tlb_miss_handling() {
    let (pager, disk) = setup("pager_tlb_miss", 1);
    let pid = pager.create_process(3);
    pager.allocate_page_range(pid, 0, 2).unwrap();

    assert_eq!(pager.handle_tlb_miss(pid, 2 * PAGE_SIZE as u64), Ok(false));
    assert_eq!(pager.handle_tlb_miss(pid, 3 * PAGE_SIZE as u64), Ok(false));
    assert_eq!(
        pager.handle_tlb_miss(pid + 1, 0),
        Err(PagerError::NoSuchProcess(pid + 1))
    );

    // Page 0 was pushed out by page 1 and comes back on the miss.
    assert_eq!(pager.handle_tlb_miss(pid, 5), Ok(true));
    let entry = pager.entry(pid, 0).unwrap();
    assert!(entry.valid);
    assert!(pager
        .tlb_entries()
        .iter()
        .flatten()
        .any(|cached| cached.key == PageKey::new(pid, 0) && cached.entry.ppn == entry.ppn));
    disk.remove().unwrap();
}

#[test]
#[serial]
fn translate_marks_pages_and_follows_eviction() {
    let (pager, disk) = setup("pager_translate", 1);
    let pid = pager.create_process(3);
    pager.allocate_page_range(pid, 0, 2).unwrap();

    assert_eq!(pager.translate(pid, 5, false), Ok(5));
    let entry = pager.entry(pid, 0).unwrap();
    assert!(entry.used);
    assert!(!entry.dirty);

    assert_eq!(pager.translate(pid, 6, true), Ok(6));
    assert!(pager.entry(pid, 0).unwrap().dirty);

    // Loading page 1 takes the only frame away from page 0.
    assert_eq!(pager.translate(pid, PAGE_SIZE as u64, false), Ok(0));
    let cached: Vec<PageKey> = pager.tlb_entries().into_iter().flatten().map(|c| c.key).collect();
    assert_eq!(cached, vec![PageKey::new(pid, 1)]);

    assert_eq!(
        pager.translate(pid, 2 * PAGE_SIZE as u64, false),
        Err(PagerError::AddressFault(2 * PAGE_SIZE as u64))
    );
    disk.remove().unwrap();
}

#[test]
#[serial]
fn restore_state_preloads_resident_pages() {
    let (pager, disk) = setup("pager_restore", 8);
    let first = pager.create_process(6);
    let second = pager.create_process(2);
    pager.allocate_page_range(first, 0, 3).unwrap();
    pager.allocate_page_range(second, 0, 2).unwrap();

    pager.restore_state(first).unwrap();
    let slots = pager.tlb_entries();
    assert_eq!(slots.len(), 4);
    for (vpn, slot) in slots.iter().take(3).enumerate() {
        let cached = slot.unwrap();
        assert_eq!(cached.key, PageKey::new(first, vpn as u32));
        assert_eq!(cached.entry, pager.entry(first, vpn as u32).unwrap());
    }
    assert!(slots[3].is_none());

    pager.restore_state(second).unwrap();
    let cached: Vec<PageKey> = pager.tlb_entries().into_iter().flatten().map(|c| c.key).collect();
    assert_eq!(cached, vec![PageKey::new(second, 0), PageKey::new(second, 1)]);
    assert_eq!(pager.restore_state(99), Err(PagerError::NoSuchProcess(99)));
    disk.remove().unwrap();
}

/// Random reads and writes over `pages` private pages, checked against a
/// local copy. Page accounting must balance after every access.
fn scribble(pager: &TestPager, pages: usize, steps: usize) {
    let mut rng = rand::thread_rng();
    let pid = pager.create_process(pages);
    pager.allocate_page_range(pid, 0, pages as u32).unwrap();
    let mut expected = vec![0u8; pages * PAGE_SIZE];

    for _ in 0..steps {
        let vaddr = rng.gen_range(0..expected.len());
        let length = rng.gen_range(1..=100).min(expected.len() - vaddr);
        if rng.gen_bool(0.5) {
            let data: Vec<u8> = (0..length).map(|_| rng.gen()).collect();
            let written = pager
                .write_virtual_memory(pid, vaddr as u64, &data, 0, length)
                .unwrap();
            assert_eq!(written, length);
            expected[vaddr..vaddr + length].copy_from_slice(&data);
        } else {
            let mut buf = vec![0; length];
            let read = pager
                .read_virtual_memory(pid, vaddr as u64, &mut buf, 0, length)
                .unwrap();
            assert_eq!(read, length);
            assert_eq!(buf, &expected[vaddr..vaddr + length]);
        }
        let counts = pager.page_counts(pid).unwrap();
        assert_eq!(counts.total, pages);
        assert_eq!(counts.resident + counts.swapped + counts.untouched, pages);
        assert_eq!(counts.untouched, 0);
    }

    let mut all = vec![0; expected.len()];
    pager
        .read_virtual_memory(pid, 0, &mut all, 0, expected.len())
        .unwrap();
    assert_eq!(all, expected);
}

#[test]
#[serial]
fn concurrent_processes_keep_their_data() {
    const THREADS: usize = 4;
    const FRAMES: usize = 2;
    let (pager, disk) = setup("pager_concurrent", FRAMES as u32);

    thread::scope(|scope| {
        for _ in 0..THREADS {
            scope.spawn(|| scribble(&pager, 4, 200));
        }
    });

    assert_frames_consistent(&pager, FRAMES);
    assert_slots_unique(&pager);
    disk.remove().unwrap();
}

#[test]
#[serial]
fn two_processes_share_a_single_frame() {
    let (pager, disk) = setup("pager_single_frame_threads", 1);

    thread::scope(|scope| {
        for _ in 0..2 {
            scope.spawn(|| scribble(&pager, 3, 300));
        }
    });

    assert_frames_consistent(&pager, 1);
    assert_slots_unique(&pager);
    disk.remove().unwrap();
}
