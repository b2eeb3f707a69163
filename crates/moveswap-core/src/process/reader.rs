use crate::error::{Error, Result};

/// Raw byte reads from another address space.
pub trait ReadMemory {
    fn read_bytes(&self, address: u64, size: usize) -> Result<Vec<u8>>;

    fn read_u8(&self, address: u64) -> Result<u8> {
        let bytes = self.read_bytes(address, 1)?;
        Ok(u8::from_le_bytes(to_array(address, &bytes)?))
    }

    fn read_u16(&self, address: u64) -> Result<u16> {
        let bytes = self.read_bytes(address, 2)?;
        Ok(u16::from_le_bytes(to_array(address, &bytes)?))
    }

    fn read_u32(&self, address: u64) -> Result<u32> {
        let bytes = self.read_bytes(address, 4)?;
        Ok(u32::from_le_bytes(to_array(address, &bytes)?))
    }

    fn read_u64(&self, address: u64) -> Result<u64> {
        let bytes = self.read_bytes(address, 8)?;
        Ok(u64::from_le_bytes(to_array(address, &bytes)?))
    }

    /// Follow a chain of pointers: read a pointer at `base`, add the next
    /// offset, read again, and so on. The last offset is added without a
    /// final dereference.
    fn read_pointer_path(&self, base: u64, offsets: &[u64]) -> Result<u64> {
        let Some((last, chain)) = offsets.split_last() else {
            return Ok(base);
        };

        let mut address = base;
        for offset in chain {
            address = self.read_u64(address.wrapping_add(*offset))?;
            if address == 0 {
                return Err(Error::MemoryReadFailed {
                    address: *offset,
                    message: "null pointer in pointer path".to_string(),
                });
            }
        }
        Ok(address.wrapping_add(*last))
    }
}

/// Raw byte writes into another address space.
pub trait WriteMemory {
    fn write_bytes(&self, address: u64, data: &[u8]) -> Result<()>;

    fn write_u64(&self, address: u64, value: u64) -> Result<()> {
        self.write_bytes(address, &value.to_le_bytes())
    }
}

/// Read and write access to one address space, usable as a trait object
pub trait GameMemory: ReadMemory + WriteMemory + Send + Sync {}

impl<T: ReadMemory + WriteMemory + Send + Sync + ?Sized> GameMemory for T {}

fn to_array<const N: usize>(address: u64, bytes: &[u8]) -> Result<[u8; N]> {
    bytes.try_into().map_err(|_| Error::MemoryReadFailed {
        address,
        message: format!("short read: expected {} bytes, got {}", N, bytes.len()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct Flat(HashMap<u64, u64>);

    impl ReadMemory for Flat {
        fn read_bytes(&self, address: u64, size: usize) -> Result<Vec<u8>> {
            let value = self.0.get(&address).copied().unwrap_or(0);
            Ok(value.to_le_bytes()[..size].to_vec())
        }
    }

    #[test]
    fn test_read_pointer_path() {
        let mut mem = HashMap::new();
        mem.insert(0x1000 + 0x10, 0x2000);
        mem.insert(0x2000 + 0x8, 0x3000);
        let reader = Flat(mem);

        let addr = reader.read_pointer_path(0x1000, &[0x10, 0x8, 0x40]).unwrap();
        assert_eq!(addr, 0x3040);
    }

    #[test]
    fn test_read_pointer_path_null() {
        let reader = Flat(HashMap::new());
        assert!(reader.read_pointer_path(0x1000, &[0x10, 0x0]).is_err());
    }

    #[test]
    fn test_read_pointer_path_empty() {
        let reader = Flat(HashMap::new());
        assert_eq!(reader.read_pointer_path(0x1234, &[]).unwrap(), 0x1234);
    }
}
