use std::{
    fmt,
    fs::{remove_file, File},
    io::{Read, Seek, SeekFrom, Write},
    mem::size_of,
    sync::{Arc, Mutex},
};

use log::{info, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskError {
    IncorrectBlockSize,
    OverCapacity,
    Io(std::io::ErrorKind),
}

impl fmt::Display for DiskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiskError::IncorrectBlockSize => write!(f, "buffer does not match the block size"),
            DiskError::OverCapacity => write!(f, "block number is past the disk capacity"),
            DiskError::Io(kind) => write!(f, "disk i/o failed: {}", kind),
        }
    }
}

impl std::error::Error for DiskError {}

impl From<std::io::Error> for DiskError {
    fn from(err: std::io::Error) -> Self {
        DiskError::Io(err.kind())
    }
}

const HEADER_SIZE: usize = size_of::<u32>() * 2;

/// A block-addressed store kept in a single file.
///
/// The file starts with a header (block size, capacity) followed by
/// `CAPACITY / BLOCKSIZE` blocks. Clones share the same file handle.
#[derive(Debug, Clone)]
pub struct Disk<const BLOCKSIZE: usize, const CAPACITY: usize> {
    file_name: String,
    file: Arc<Mutex<File>>,
}

pub fn make_name(name: &str) -> String {
    let name = name.replace("-", "_");
    let mut disk_name = String::from("SWAP_IMAGE_");
    disk_name.push_str(&name);
    disk_name
}

fn write_header(file: &mut File, block_size: u32, capacity: u32) -> Result<(), std::io::Error> {
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&block_size.to_be_bytes())?;
    file.write_all(&capacity.to_be_bytes())?;
    Ok(())
}

fn read_header(file: &mut File) -> Result<(u32, u32), std::io::Error> {
    let mut block_size = [0; size_of::<u32>()];
    let mut capacity = [0; size_of::<u32>()];
    file.seek(SeekFrom::Start(0))?;
    file.read_exact(&mut block_size)?;
    file.read_exact(&mut capacity)?;
    Ok((u32::from_be_bytes(block_size), u32::from_be_bytes(capacity)))
}

impl<const BLOCKSIZE: usize, const CAPACITY: usize> Disk<BLOCKSIZE, CAPACITY> {
    /// Number of blocks the disk can hold.
    pub const fn blocks() -> usize {
        CAPACITY / BLOCKSIZE
    }

    pub fn create(name: &str) -> Result<Self, std::io::Error> {
        assert_eq!(
            CAPACITY % BLOCKSIZE,
            0,
            "Capacity must be a multiply of BlockSize"
        );
        let mut file = File::options()
            .truncate(true)
            .write(true)
            .read(true)
            .create(true)
            .open(make_name(name))?;
        file.set_len((HEADER_SIZE + CAPACITY) as u64)?;
        write_header(&mut file, BLOCKSIZE as u32, CAPACITY as u32)?;
        info!("Created disk {} ({} blocks of {} bytes)", name, Self::blocks(), BLOCKSIZE);
        Ok(Self {
            file_name: String::from(name),
            file: Arc::new(Mutex::new(file)),
        })
    }

    pub fn connect(name: &str) -> Result<Self, std::io::Error> {
        assert_eq!(
            CAPACITY % BLOCKSIZE,
            0,
            "Capacity must be a multiply of BlockSize"
        );
        let mut file = File::options()
            .write(true)
            .read(true)
            .open(make_name(name))?;
        let (block_size, capacity) = read_header(&mut file)?;
        assert_eq!(BLOCKSIZE, block_size as usize, "Incorrect disk block size");
        assert_eq!(CAPACITY, capacity as usize, "Incorrect disk capacity");
        Ok(Self {
            file_name: String::from(name),
            file: Arc::new(Mutex::new(file)),
        })
    }

    pub fn name(&self) -> &str {
        &self.file_name
    }

    /// Deletes the backing file. Other clones must not be used afterwards.
    pub fn remove(self) -> Result<(), std::io::Error> {
        info!("Removing disk {}", self.file_name);
        remove_file(make_name(&self.file_name))
    }

    fn seek_block(file: &mut File, block_number: usize) -> Result<(), DiskError> {
        file.seek(SeekFrom::Start(
            HEADER_SIZE as u64 + (block_number * BLOCKSIZE) as u64,
        ))?;
        Ok(())
    }

    /// Reads block `block_number` into `buf`, which must be exactly one block long.
    pub fn read_block_into(&self, block_number: usize, buf: &mut [u8]) -> Result<(), DiskError> {
        if buf.len() != BLOCKSIZE {
            return Err(DiskError::IncorrectBlockSize);
        } else if block_number >= Self::blocks() {
            return Err(DiskError::OverCapacity);
        }
        let mut file = self.file.lock().unwrap();
        trace!("Start reading block[{}]", block_number);
        Self::seek_block(&mut file, block_number)?;
        file.read_exact(buf)?;
        trace!("Done reading block[{}]", block_number);
        Ok(())
    }

    pub fn read_block(&self, block_number: usize) -> Result<Box<[u8; BLOCKSIZE]>, DiskError> {
        let mut buf = Box::new([0; BLOCKSIZE]);
        self.read_block_into(block_number, &mut *buf)?;
        Ok(buf)
    }

    pub fn write_block(&self, block_number: usize, block: &[u8]) -> Result<(), DiskError> {
        if block.len() != BLOCKSIZE {
            return Err(DiskError::IncorrectBlockSize);
        } else if block_number >= Self::blocks() {
            return Err(DiskError::OverCapacity);
        }
        let mut file = self.file.lock().unwrap();
        trace!("Start writing block[{}]", block_number);
        Self::seek_block(&mut file, block_number)?;
        file.write_all(block)?;
        trace!("Done writing block[{}]", block_number);
        Ok(())
    }
}
