//! Win32 implementation of the target-process primitives

use std::ffi::{CStr, c_void};
use std::os::windows::ffi::OsStrExt;
use std::path::Path;

use tracing::debug;
use windows::Win32::Foundation::{CloseHandle, HANDLE, STILL_ACTIVE, WAIT_OBJECT_0};
use windows::Win32::System::Diagnostics::Debug::{ReadProcessMemory, WriteProcessMemory};
use windows::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, MODULEENTRY32W, Module32FirstW, Module32NextW, PROCESSENTRY32,
    Process32First, Process32Next, TH32CS_SNAPMODULE, TH32CS_SNAPMODULE32, TH32CS_SNAPPROCESS,
};
use windows::Win32::System::LibraryLoader::{GetModuleHandleA, GetProcAddress};
use windows::Win32::System::Memory::{
    MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_READWRITE, VirtualAllocEx, VirtualFreeEx,
};
use windows::Win32::System::Threading::{
    CreateRemoteThread, GetExitCodeProcess, GetExitCodeThread, INFINITE, OpenProcess,
    PROCESS_ALL_ACCESS, WaitForSingleObject,
};

use super::reader::{ReadMemory, WriteMemory};
use super::target::{RemoteThread, TargetProcess};
use crate::error::{Error, Result};

/// Find a process by executable name, return its PID
pub fn find_process_by_name(name: &str) -> Option<u32> {
    // SAFETY: the snapshot handle is closed on every path and the entry
    // struct is sized before the first call.
    unsafe {
        let snapshot = CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0).ok()?;

        let mut entry = PROCESSENTRY32 {
            dwSize: std::mem::size_of::<PROCESSENTRY32>() as u32,
            ..Default::default()
        };

        let mut found = None;
        if Process32First(snapshot, &mut entry).is_ok() {
            loop {
                let exe_name = CStr::from_ptr(entry.szExeFile.as_ptr()).to_string_lossy();
                if exe_name.eq_ignore_ascii_case(name) {
                    found = Some(entry.th32ProcessID);
                    break;
                }
                if Process32Next(snapshot, &mut entry).is_err() {
                    break;
                }
            }
        }

        let _ = CloseHandle(snapshot);
        found
    }
}

/// An opened handle to the target process
pub struct WindowsProcess {
    handle: HANDLE,
    pid: u32,
    base_address: u64,
}

// SAFETY: process handles may be used from any thread.
unsafe impl Send for WindowsProcess {}
unsafe impl Sync for WindowsProcess {}

impl WindowsProcess {
    pub fn open(pid: u32, exe_name: &str) -> Result<Self> {
        // SAFETY: OpenProcess has no memory-safety preconditions.
        let handle = unsafe { OpenProcess(PROCESS_ALL_ACCESS, false, pid) }
            .map_err(|e| Error::ProcessOpenFailed(e.to_string()))?;

        let mut process = Self {
            handle,
            pid,
            base_address: 0,
        };
        process.base_address = process
            .module_base(exe_name)?
            .ok_or_else(|| Error::ProcessOpenFailed(format!("{} has no main module", exe_name)))?;
        Ok(process)
    }

    /// Find a running process by executable name and open it
    pub fn find_and_open(exe_name: &str) -> Result<Self> {
        let pid = find_process_by_name(exe_name)
            .ok_or_else(|| Error::ProcessNotFound(exe_name.to_string()))?;
        Self::open(pid, exe_name)
    }

    fn wait_thread(&self, thread: HANDLE) -> Result<RemoteThread> {
        // SAFETY: `thread` is a live handle owned by the caller.
        unsafe {
            if WaitForSingleObject(thread, INFINITE) != WAIT_OBJECT_0 {
                return Err(Error::RemoteExecutionFailed("wait failed".to_string()));
            }
            let mut exit_code = 0u32;
            GetExitCodeThread(thread, &mut exit_code)
                .map_err(|e| Error::RemoteExecutionFailed(e.to_string()))?;
            Ok(RemoteThread::Finished { exit_code })
        }
    }
}

impl Drop for WindowsProcess {
    fn drop(&mut self) {
        if !self.handle.is_invalid() {
            // SAFETY: we own the handle.
            unsafe {
                let _ = CloseHandle(self.handle);
            }
        }
    }
}

impl ReadMemory for WindowsProcess {
    fn read_bytes(&self, address: u64, size: usize) -> Result<Vec<u8>> {
        let mut buffer = vec![0u8; size];
        let mut read = 0usize;
        // SAFETY: the buffer holds `size` bytes.
        unsafe {
            ReadProcessMemory(
                self.handle,
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
                message: format!("partial read: {} of {} bytes", read, size),
            });
        }
        Ok(buffer)
    }
}

impl WriteMemory for WindowsProcess {
    fn write_bytes(&self, address: u64, data: &[u8]) -> Result<()> {
        let mut written = 0usize;
        // SAFETY: `data` is a valid slice for the duration of the call.
        unsafe {
            WriteProcessMemory(
                self.handle,
                address as *const c_void,
                data.as_ptr() as *const c_void,
                data.len(),
                Some(&mut written),
            )
        }
        .map_err(|e| Error::MemoryWriteFailed {
            address,
            message: e.to_string(),
        })?;

        if written != data.len() {
            return Err(Error::MemoryWriteFailed {
                address,
                message: format!("partial write: {} of {} bytes", written, data.len()),
            });
        }
        Ok(())
    }
}

impl TargetProcess for WindowsProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn main_module_base(&self) -> u64 {
        self.base_address
    }

    fn is_running(&self) -> bool {
        let mut code = 0u32;
        // SAFETY: the handle stays valid for the lifetime of self.
        match unsafe { GetExitCodeProcess(self.handle, &mut code) } {
            Ok(()) => code == STILL_ACTIVE.0 as u32,
            Err(_) => false,
        }
    }

    fn allocate(&self, size: usize) -> Result<u64> {
        // SAFETY: allocation in another process does not touch our memory.
        let mem = unsafe {
            VirtualAllocEx(
                self.handle,
                None,
                size,
                MEM_COMMIT | MEM_RESERVE,
                PAGE_READWRITE,
            )
        };
        if mem.is_null() {
            return Err(Error::AllocationFailed {
                size,
                message: "VirtualAllocEx failed".to_string(),
            });
        }
        Ok(mem as u64)
    }

    fn free(&self, address: u64) -> Result<()> {
        // SAFETY: MEM_RELEASE of a block we allocated in the target.
        unsafe { VirtualFreeEx(self.handle, address as *mut c_void, 0, MEM_RELEASE) }.map_err(
            |e| Error::MemoryWriteFailed {
                address,
                message: e.to_string(),
            },
        )
    }

    fn load_library(&self, path: &Path) -> Result<()> {
        let wide: Vec<u16> = path
            .as_os_str()
            .encode_wide()
            .chain(std::iter::once(0))
            .collect();
        let bytes: Vec<u8> = wide.iter().flat_map(|c| c.to_le_bytes()).collect();

        let remote_path = self.allocate(bytes.len())?;
        let result = self.write_bytes(remote_path, &bytes).and_then(|()| {
            // SAFETY: kernel32 is mapped at the same address in every process
            // of a session, so the local LoadLibraryW address is valid remotely.
            let load_library = unsafe {
                let kernel32 = GetModuleHandleA(windows::core::s!("kernel32.dll"))
                    .map_err(|e| Error::InjectionFailed(e.to_string()))?;
                GetProcAddress(kernel32, windows::core::s!("LoadLibraryW"))
                    .ok_or_else(|| Error::InjectionFailed("LoadLibraryW not found".to_string()))?
            };
            match self.create_remote_thread(load_library as usize as u64, remote_path, true)? {
                RemoteThread::Finished { exit_code: 0 } => Err(Error::InjectionFailed(format!(
                    "LoadLibraryW returned null for {}",
                    path.display()
                ))),
                _ => Ok(()),
            }
        });

        let _ = self.free(remote_path);
        result
    }

    fn module_base(&self, module_name: &str) -> Result<Option<u64>> {
        // SAFETY: the snapshot handle is closed before returning.
        unsafe {
            let snapshot =
                CreateToolhelp32Snapshot(TH32CS_SNAPMODULE | TH32CS_SNAPMODULE32, self.pid)
                    .map_err(|e| Error::ProcessOpenFailed(e.to_string()))?;

            let mut entry = MODULEENTRY32W {
                dwSize: std::mem::size_of::<MODULEENTRY32W>() as u32,
                ..Default::default()
            };

            let mut found = None;
            if Module32FirstW(snapshot, &mut entry).is_ok() {
                loop {
                    let len = entry
                        .szModule
                        .iter()
                        .position(|&c| c == 0)
                        .unwrap_or(entry.szModule.len());
                    let name = String::from_utf16_lossy(&entry.szModule[..len]);
                    if name.eq_ignore_ascii_case(module_name) {
                        found = Some(entry.modBaseAddr as u64);
                        break;
                    }
                    if Module32NextW(snapshot, &mut entry).is_err() {
                        break;
                    }
                }
            }

            let _ = CloseHandle(snapshot);
            Ok(found)
        }
    }

    fn create_remote_thread(
        &self,
        start: u64,
        parameter: u64,
        wait: bool,
    ) -> Result<RemoteThread> {
        debug!("Creating remote thread at {:#x} (wait: {})", start, wait);
        // SAFETY: `start` is an address inside the target process; the thread
        // runs there, not in ours.
        unsafe {
            let routine = std::mem::transmute::<
                usize,
                unsafe extern "system" fn(*mut c_void) -> u32,
            >(start as usize);
            let thread = CreateRemoteThread(
                self.handle,
                None,
                0,
                Some(routine),
                Some(parameter as *const c_void),
                0,
                None,
            )
            .map_err(|e| Error::RemoteExecutionFailed(e.to_string()))?;

            let result = if wait {
                self.wait_thread(thread)
            } else {
                Ok(RemoteThread::Started)
            };
            let _ = CloseHandle(thread);
            result
        }
    }
}
