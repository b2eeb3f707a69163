//! Our own address space, accessed with fault-tolerant Win32 calls

use std::ffi::c_void;
use std::mem::size_of;
use std::os::windows::ffi::OsStringExt;
use std::path::PathBuf;

use moveswap_core::{Error, ReadMemory, Result, WriteMemory};
use windows::Win32::Foundation::HMODULE;
use windows::Win32::System::Diagnostics::Debug::{ReadProcessMemory, WriteProcessMemory};
use windows::Win32::System::LibraryLoader::{
    GET_MODULE_HANDLE_EX_FLAG_FROM_ADDRESS, GET_MODULE_HANDLE_EX_FLAG_UNCHANGED_REFCOUNT,
    GetModuleFileNameW, GetModuleHandleExW, GetModuleHandleW,
};
use windows::Win32::System::ProcessStatus::{GetModuleInformation, MODULEINFO};
use windows::Win32::System::Threading::GetCurrentProcess;
use windows::core::PCWSTR;

/// Reads and writes through `ReadProcessMemory` on the current process so a
/// bad address fails instead of faulting
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalMemory;

impl ReadMemory for LocalMemory {
    fn read_bytes(&self, address: u64, size: usize) -> Result<Vec<u8>> {
        let mut buffer = vec![0u8; size];
        let mut read = 0usize;
        // SAFETY: the buffer holds `size` bytes.
        unsafe {
            ReadProcessMemory(
                GetCurrentProcess(),
                address as *const c_void,
                buffer.as_mut_ptr() as *mut c_void,
                size,
                Some(&mut read),
            )
        }
        .map_err(|e| Error::MemoryReadFailed {
            address,
            message: e.to_string(),
        })?;
        if read != size {
            return Err(Error::MemoryReadFailed {
                address,
                message: format!("read {} of {} bytes", read, size),
            });
        }
        Ok(buffer)
    }
}

impl WriteMemory for LocalMemory {
    fn write_bytes(&self, address: u64, data: &[u8]) -> Result<()> {
        // SAFETY: `data` is a valid slice.
        unsafe {
            WriteProcessMemory(
                GetCurrentProcess(),
                address as *const c_void,
                data.as_ptr() as *const c_void,
                data.len(),
                None,
            )
        }
        .map_err(|e| Error::MemoryWriteFailed {
            address,
            message: e.to_string(),
        })
    }
}

/// Base address and image size of the process executable
pub fn main_module() -> Result<(u64, usize)> {
    // SAFETY: plain Win32 queries on our own process.
    unsafe {
        let module = GetModuleHandleW(None).map_err(|e| Error::ProcessOpenFailed(e.to_string()))?;
        let mut info = MODULEINFO::default();
        GetModuleInformation(
            GetCurrentProcess(),
            module,
            &mut info,
            size_of::<MODULEINFO>() as u32,
        )
        .map_err(|e| Error::ProcessOpenFailed(e.to_string()))?;
        Ok((info.lpBaseOfDll as u64, info.SizeOfImage as usize))
    }
}

/// Directory holding this library
pub fn agent_directory() -> Option<PathBuf> {
    let mut module = HMODULE::default();
    let mut buffer = [0u16; 1024];
    // SAFETY: the address lies inside this library; the buffer is writable.
    let len = unsafe {
        GetModuleHandleExW(
            GET_MODULE_HANDLE_EX_FLAG_FROM_ADDRESS | GET_MODULE_HANDLE_EX_FLAG_UNCHANGED_REFCOUNT,
            PCWSTR(agent_directory as *const () as *const u16),
            &mut module,
        )
        .ok()?;
        GetModuleFileNameW(module, &mut buffer) as usize
    };
    if len == 0 {
        return None;
    }
    let path = PathBuf::from(std::ffi::OsString::from_wide(&buffer[..len]));
    path.parent().map(PathBuf::from)
}
