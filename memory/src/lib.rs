use std::{
    fmt,
    mem::size_of,
    sync::{Arc, Mutex},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryError {
    OverCapacity,
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryError::OverCapacity => write!(f, "address range is past the memory capacity"),
        }
    }
}

impl std::error::Error for MemoryError {}

/// Main memory of the simulated machine: `CAPACITY` bytes, zeroed at start.
///
/// Clones share the same bytes.
#[derive(Debug, Clone)]
pub struct PhysicalMemory<const CAPACITY: usize> {
    buffer: Arc<Mutex<Box<[u8]>>>,
}

impl<const CAPACITY: usize> PhysicalMemory<CAPACITY> {
    pub fn create() -> Self {
        Self {
            buffer: Arc::new(Mutex::new(vec![0; CAPACITY].into_boxed_slice())),
        }
    }

    pub const fn capacity() -> usize {
        CAPACITY
    }

    pub fn check_address(&self, address: u64) -> Result<(), MemoryError> {
        if address as usize >= CAPACITY {
            return Err(MemoryError::OverCapacity);
        }
        Ok(())
    }

    fn check_range(&self, address: u64, len: usize) -> Result<usize, MemoryError> {
        let start = address as usize;
        match start.checked_add(len) {
            Some(end) if end <= CAPACITY => Ok(start),
            _ => Err(MemoryError::OverCapacity),
        }
    }

    /// Copies `buf.len()` bytes starting at `address` into `buf`.
    pub fn read(&self, address: u64, buf: &mut [u8]) -> Result<(), MemoryError> {
        let start = self.check_range(address, buf.len())?;
        let buffer = self.buffer.lock().unwrap();
        buf.copy_from_slice(&buffer[start..start + buf.len()]);
        Ok(())
    }

    /// Copies `data` into memory starting at `address`.
    pub fn write(&self, address: u64, data: &[u8]) -> Result<(), MemoryError> {
        let start = self.check_range(address, data.len())?;
        let mut buffer = self.buffer.lock().unwrap();
        buffer[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    pub fn fill(&self, address: u64, len: usize, byte: u8) -> Result<(), MemoryError> {
        let start = self.check_range(address, len)?;
        let mut buffer = self.buffer.lock().unwrap();
        buffer[start..start + len].fill(byte);
        Ok(())
    }

    pub fn read_u8(&self, address: u64) -> Result<u8, MemoryError> {
        self.check_address(address)?;
        let buffer = self.buffer.lock().unwrap();
        Ok(buffer[address as usize])
    }

    pub fn write_u8(&self, address: u64, byte: u8) -> Result<(), MemoryError> {
        self.check_address(address)?;
        let mut buffer = self.buffer.lock().unwrap();
        buffer[address as usize] = byte;
        Ok(())
    }

    pub fn read_u32(&self, address: u64) -> Result<u32, MemoryError> {
        let mut bytes = [0; size_of::<u32>()];
        self.read(address, &mut bytes)?;
        Ok(u32::from_be_bytes(bytes))
    }

    pub fn write_u32(&self, address: u64, word: u32) -> Result<(), MemoryError> {
        self.write(address, &word.to_be_bytes())
    }
}

impl<const CAPACITY: usize> Default for PhysicalMemory<CAPACITY> {
    fn default() -> Self {
        Self::create()
    }
}
