//! In-memory target process for tests

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

use super::reader::{ReadMemory, WriteMemory};
use super::target::{RemoteThread, TargetProcess};
use crate::error::{Error, Result};

const ALLOCATION_BASE: u64 = 0x7ff0_0000_0000;

pub struct MockProcess {
    pid: u32,
    running: AtomicBool,
    memory: Mutex<HashMap<u64, u8>>,
    next_alloc: AtomicU64,
    modules: Mutex<HashMap<String, u64>>,
    /// Module registered when `load_library` succeeds
    library_module: Mutex<Option<(String, u64)>>,
    loaded_libraries: Mutex<Vec<PathBuf>>,
    threads: Mutex<Vec<(u64, bool)>>,
    freed: Mutex<Vec<u64>>,
    fail_load_library: AtomicBool,
    fail_threads: AtomicBool,
    thread_exit_code: AtomicU32,
}

impl MockProcess {
    pub fn new(pid: u32) -> Self {
        Self {
            pid,
            running: AtomicBool::new(true),
            memory: Mutex::new(HashMap::new()),
            next_alloc: AtomicU64::new(ALLOCATION_BASE),
            modules: Mutex::new(HashMap::new()),
            library_module: Mutex::new(None),
            loaded_libraries: Mutex::new(Vec::new()),
            threads: Mutex::new(Vec::new()),
            freed: Mutex::new(Vec::new()),
            fail_load_library: AtomicBool::new(false),
            fail_threads: AtomicBool::new(false),
            thread_exit_code: AtomicU32::new(1),
        }
    }

    pub fn with_module(self, name: &str, base: u64) -> Self {
        self.modules
            .lock()
            .unwrap()
            .insert(name.to_ascii_lowercase(), base);
        self
    }

    /// Make a successful `load_library` register `name` at `base`
    pub fn with_library_module(self, name: &str, base: u64) -> Self {
        *self.library_module.lock().unwrap() = Some((name.to_ascii_lowercase(), base));
        self
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    pub fn fail_load_library(&self, fail: bool) {
        self.fail_load_library.store(fail, Ordering::SeqCst);
    }

    pub fn fail_threads(&self, fail: bool) {
        self.fail_threads.store(fail, Ordering::SeqCst);
    }

    /// Exit code reported by waited remote threads (default 1)
    pub fn set_thread_exit_code(&self, code: u32) {
        self.thread_exit_code.store(code, Ordering::SeqCst);
    }

    pub fn loaded_libraries(&self) -> Vec<PathBuf> {
        self.loaded_libraries.lock().unwrap().clone()
    }

    /// Remote threads started so far, as `(start address, waited)`
    pub fn threads(&self) -> Vec<(u64, bool)> {
        self.threads.lock().unwrap().clone()
    }

    pub fn freed(&self) -> Vec<u64> {
        self.freed.lock().unwrap().clone()
    }
}

impl ReadMemory for MockProcess {
    fn read_bytes(&self, address: u64, size: usize) -> Result<Vec<u8>> {
        let memory = self.memory.lock().unwrap();
        Ok((0..size as u64)
            .map(|i| memory.get(&(address + i)).copied().unwrap_or(0))
            .collect())
    }
}

impl WriteMemory for MockProcess {
    fn write_bytes(&self, address: u64, data: &[u8]) -> Result<()> {
        if !self.is_running() {
            return Err(Error::MemoryWriteFailed {
                address,
                message: "process exited".to_string(),
            });
        }
        let mut memory = self.memory.lock().unwrap();
        for (i, byte) in data.iter().enumerate() {
            memory.insert(address + i as u64, *byte);
        }
        Ok(())
    }
}

impl TargetProcess for MockProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn main_module_base(&self) -> u64 {
        0x1_4000_0000
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn allocate(&self, size: usize) -> Result<u64> {
        let aligned = (size as u64 + 0xfff) & !0xfff;
        Ok(self.next_alloc.fetch_add(aligned.max(0x1000), Ordering::SeqCst))
    }

    fn free(&self, address: u64) -> Result<()> {
        self.freed.lock().unwrap().push(address);
        Ok(())
    }

    fn load_library(&self, path: &Path) -> Result<()> {
        if self.fail_load_library.load(Ordering::SeqCst) {
            return Err(Error::InjectionFailed("LoadLibrary failed".to_string()));
        }
        self.loaded_libraries.lock().unwrap().push(path.to_path_buf());
        if let Some((name, base)) = self.library_module.lock().unwrap().clone() {
            self.modules.lock().unwrap().insert(name, base);
        }
        Ok(())
    }

    fn module_base(&self, module_name: &str) -> Result<Option<u64>> {
        Ok(self
            .modules
            .lock()
            .unwrap()
            .get(&module_name.to_ascii_lowercase())
            .copied())
    }

    fn create_remote_thread(
        &self,
        start: u64,
        _parameter: u64,
        wait: bool,
    ) -> Result<RemoteThread> {
        if self.fail_threads.load(Ordering::SeqCst) {
            return Err(Error::RemoteExecutionFailed(format!("{:#x}", start)));
        }
        self.threads.lock().unwrap().push((start, wait));
        Ok(if wait {
            RemoteThread::Finished {
                exit_code: self.thread_exit_code.load(Ordering::SeqCst),
            }
        } else {
            RemoteThread::Started
        })
    }
}
