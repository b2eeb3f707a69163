//! Export lookup in a module loaded in the target.
//!
//! The PE export directory is walked through `ReadMemory`, so the lookup
//! works on the remote image without loading the library locally.

use crate::error::{Error, Result};
use crate::process::ReadMemory;

const DOS_MAGIC: u16 = 0x5A4D;
const NT_SIGNATURE: u32 = 0x0000_4550;
const E_LFANEW_OFFSET: u64 = 0x3C;
/// Signature + file header + optional header up to the data directories
const EXPORT_DIRECTORY_ENTRY_OFFSET: u64 = 4 + 20 + 112;

mod export_dir {
    pub const NUMBER_OF_FUNCTIONS: u64 = 20;
    pub const NUMBER_OF_NAMES: u64 = 24;
    pub const ADDRESS_OF_FUNCTIONS: u64 = 28;
    pub const ADDRESS_OF_NAMES: u64 = 32;
    pub const ADDRESS_OF_NAME_ORDINALS: u64 = 36;
}

/// Resolves exported symbols of a loaded module
pub trait ExportTable {
    /// Absolute address of `symbol` in the module at `module_base`,
    /// `None` if the module does not export it
    fn export_address(&self, module_base: u64, symbol: &str) -> Result<Option<u64>>;
}

impl<T: ReadMemory + ?Sized> ExportTable for T {
    fn export_address(&self, module_base: u64, symbol: &str) -> Result<Option<u64>> {
        if self.read_u16(module_base)? != DOS_MAGIC {
            return Err(Error::InvalidSignature(format!(
                "no DOS header at {:#x}",
                module_base
            )));
        }

        let nt_headers = module_base + u64::from(self.read_u32(module_base + E_LFANEW_OFFSET)?);
        if self.read_u32(nt_headers)? != NT_SIGNATURE {
            return Err(Error::InvalidSignature(format!(
                "no PE signature at {:#x}",
                nt_headers
            )));
        }

        let directory_rva = self.read_u32(nt_headers + EXPORT_DIRECTORY_ENTRY_OFFSET)?;
        let directory_size = self.read_u32(nt_headers + EXPORT_DIRECTORY_ENTRY_OFFSET + 4)?;
        if directory_rva == 0 {
            return Ok(None);
        }

        let directory = module_base + u64::from(directory_rva);
        let function_count = self.read_u32(directory + export_dir::NUMBER_OF_FUNCTIONS)?;
        let name_count = self.read_u32(directory + export_dir::NUMBER_OF_NAMES)?;
        let functions = module_base + u64::from(self.read_u32(directory + export_dir::ADDRESS_OF_FUNCTIONS)?);
        let names = module_base + u64::from(self.read_u32(directory + export_dir::ADDRESS_OF_NAMES)?);
        let ordinals =
            module_base + u64::from(self.read_u32(directory + export_dir::ADDRESS_OF_NAME_ORDINALS)?);

        let mut wanted = symbol.as_bytes().to_vec();
        wanted.push(0);

        for i in 0..u64::from(name_count) {
            let name_rva = self.read_u32(names + i * 4)?;
            let name = self.read_bytes(module_base + u64::from(name_rva), wanted.len())?;
            if name != wanted {
                continue;
            }

            let ordinal = self.read_u16(ordinals + i * 2)?;
            if u32::from(ordinal) >= function_count {
                return Ok(None);
            }
            let function_rva = self.read_u32(functions + u64::from(ordinal) * 4)?;

            // Forwarded exports point back into the export directory
            if function_rva >= directory_rva && function_rva < directory_rva + directory_size {
                return Ok(None);
            }
            return Ok(Some(module_base + u64::from(function_rva)));
        }

        Ok(None)
    }
}
