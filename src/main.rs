use std::{error::Error, thread};

use demand_paging::{
    config::KernelConfig,
    loader::{self, Program, Section},
};
use disk::Disk;
use log::{info, warn};
use memory::PhysicalMemory;
use pager::{Pager, ProcessId};
use rand::Rng;

const PAGE_SIZE: usize = 1024;
const SWAP_CAPACITY: usize = PAGE_SIZE * 256;
const MEMORY_CAPACITY: usize = PAGE_SIZE * 32;
const PROGRAMS: usize = 3;
const STEPS: usize = 500;

type KernelPager = Pager<PAGE_SIZE, SWAP_CAPACITY, MEMORY_CAPACITY>;

fn program(id: usize, stack_pages: u32) -> Program {
    Program {
        sections: vec![
            Section {
                name: String::from(".text"),
                first_vpn: 0,
                read_only: true,
                data: (0..3 * PAGE_SIZE).map(|i| (i + id) as u8).collect(),
            },
            Section {
                name: String::from(".data"),
                first_vpn: 3,
                read_only: false,
                data: vec![id as u8; PAGE_SIZE + PAGE_SIZE / 2],
            },
        ],
        stack_pages,
    }
}

/// Scribbles over the writable pages of `pid` and checks every read
/// against a private copy. Returns the number of mismatches.
fn run(pager: &KernelPager, pid: ProcessId, first_writable: u32, pages: u32) -> usize {
    let mut rng = rand::thread_rng();
    let base = first_writable as usize * PAGE_SIZE;
    let mut shadow = vec![0u8; (pages - first_writable) as usize * PAGE_SIZE];
    let len = shadow.len();
    if let Err(err) = pager.read_virtual_memory(pid, base as u64, &mut shadow, 0, len) {
        warn!("Process {}: initial read failed: {}", pid, err);
        return 1;
    }

    let mut mismatches = 0;
    for _ in 0..STEPS {
        let at = rng.gen_range(0..shadow.len());
        let len = rng.gen_range(1..=256).min(shadow.len() - at);
        let vaddr = (base + at) as u64;
        if rng.gen_bool(0.4) {
            let data: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
            match pager.write_virtual_memory(pid, vaddr, &data, 0, len) {
                Ok(n) if n == len => shadow[at..at + len].copy_from_slice(&data),
                Ok(n) => {
                    warn!("Process {}: short write of {} at {:#x}", pid, n, vaddr);
                    mismatches += 1;
                }
                Err(err) => {
                    warn!("Process {}: write at {:#x} failed: {}", pid, vaddr, err);
                    mismatches += 1;
                }
            }
        } else {
            let mut buf = vec![0; len];
            match pager.read_virtual_memory(pid, vaddr, &mut buf, 0, len) {
                Ok(_) if buf == shadow[at..at + len] => {}
                Ok(_) => mismatches += 1,
                Err(err) => {
                    warn!("Process {}: read at {:#x} failed: {}", pid, vaddr, err);
                    mismatches += 1;
                }
            }
        }
    }
    mismatches
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let config = KernelConfig::from_env()?;
    info!("{:?}", config);

    let disk = Disk::<PAGE_SIZE, SWAP_CAPACITY>::create(&config.swap_name)?;
    let memory = PhysicalMemory::<MEMORY_CAPACITY>::create();
    let pager = KernelPager::new(&memory, &disk, 0..config.frames, config.pager())?;
    println!("---- Pager initialized ----");

    let mut processes = Vec::new();
    for id in 0..PROGRAMS {
        let program = program(id, config.stack_pages);
        let pages = program.page_count(PAGE_SIZE);
        let pid = loader::load(&pager, &program)?;
        processes.push((pid, pages));
    }

    let mismatches: usize = thread::scope(|scope| {
        let workers: Vec<_> = processes
            .iter()
            .map(|&(pid, pages)| {
                let pager = &pager;
                scope.spawn(move || {
                    // Everything after .text is writable.
                    let mismatches = run(pager, pid, 3, pages);
                    if let Err(err) = pager.restore_state(pid) {
                        warn!("Process {}: context switch failed: {}", pid, err);
                    }
                    mismatches
                })
            })
            .collect();
        workers
            .into_iter()
            .map(|worker| worker.join().unwrap_or(1))
            .sum()
    });

    for &(pid, _) in processes.iter() {
        let counts = pager.page_counts(pid)?;
        println!(
            "Process {}: {} resident, {} swapped, {} untouched of {} pages",
            pid, counts.resident, counts.swapped, counts.untouched, counts.total
        );
        pager.release_all(pid)?;
    }
    println!(
        "{} mismatches, {} free frames, {} free swap slots",
        mismatches,
        pager.free_frames().len(),
        pager.free_slots().len()
    );

    drop(pager);
    disk.remove()?;
    println!("---- Pager closed ----");
    Ok(())
}
