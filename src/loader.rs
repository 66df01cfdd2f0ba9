use std::{error::Error, fmt::Display};

use log::{debug, info};
use pager::{Pager, PagerError, ProcessId};

/// A contiguous run of pages copied from the program image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub name: String,
    pub first_vpn: u32,
    pub read_only: bool,
    pub data: Vec<u8>,
}

impl Section {
    pub fn pages(&self, page_size: usize) -> u32 {
        self.data.len().div_ceil(page_size) as u32
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Program {
    pub sections: Vec<Section>,
    pub stack_pages: u32,
}

impl Program {
    /// Pages covered by sections, followed by the stack and one page for
    /// arguments.
    pub fn page_count(&self, page_size: usize) -> u32 {
        let image = self
            .sections
            .iter()
            .map(|s| s.first_vpn + s.pages(page_size))
            .max()
            .unwrap_or(0);
        image + self.stack_pages + 1
    }

    fn check_layout(&self, page_size: usize) -> Result<(), LoadError> {
        let mut ranges: Vec<(u32, u32, &str)> = self
            .sections
            .iter()
            .map(|s| (s.first_vpn, s.first_vpn + s.pages(page_size), s.name.as_str()))
            .collect();
        ranges.sort();
        for pair in ranges.windows(2) {
            if pair[0].1 > pair[1].0 {
                return Err(LoadError::Overlap(pair[1].2.to_string()));
            }
        }
        Ok(())
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum LoadError {
    Overlap(String),
    Pager(PagerError),
}

impl Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadError::Overlap(name) => write!(f, "section {} overlaps another section", name),
            LoadError::Pager(err) => write!(f, "{}", err),
        }
    }
}

impl Error for LoadError {}

impl From<PagerError> for LoadError {
    fn from(value: PagerError) -> Self {
        LoadError::Pager(value)
    }
}

/// Creates a process for `program` and loads its sections.
///
/// Every page is bound first, then filled one by one; pages evicted in
/// between are brought back by [`Pager::fill_page`]. If loading fails the
/// process is released again.
pub fn load<const PAGE_SIZE: usize, const SWAP_CAPACITY: usize, const MEMORY_CAPACITY: usize>(
    pager: &Pager<PAGE_SIZE, SWAP_CAPACITY, MEMORY_CAPACITY>,
    program: &Program,
) -> Result<ProcessId, LoadError> {
    program.check_layout(PAGE_SIZE)?;
    let page_count = program.page_count(PAGE_SIZE);
    let pid = pager.create_process(page_count as usize);
    if let Err(err) = load_sections(pager, pid, program, page_count) {
        pager.release_all(pid)?;
        return Err(err.into());
    }
    info!("Loaded process {} with {} pages", pid, page_count);
    Ok(pid)
}

fn load_sections<const PAGE_SIZE: usize, const SWAP_CAPACITY: usize, const MEMORY_CAPACITY: usize>(
    pager: &Pager<PAGE_SIZE, SWAP_CAPACITY, MEMORY_CAPACITY>,
    pid: ProcessId,
    program: &Program,
    page_count: u32,
) -> Result<(), PagerError> {
    pager.allocate_page_range(pid, 0, page_count)?;
    for section in program.sections.iter() {
        debug!(
            "Process {}: section {} at page {} ({} pages{})",
            pid,
            section.name,
            section.first_vpn,
            section.pages(PAGE_SIZE),
            if section.read_only { ", read-only" } else { "" }
        );
        for (i, chunk) in section.data.chunks(PAGE_SIZE).enumerate() {
            let vpn = section.first_vpn + i as u32;
            if section.read_only {
                pager.set_read_only(pid, vpn, true)?;
            }
            pager.fill_page(pid, vpn, 0, chunk)?;
        }
    }
    Ok(())
}
