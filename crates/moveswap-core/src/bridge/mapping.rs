//! Opening the named shared region from the controller side

use std::sync::Arc;

use crate::error::Result;
use crate::protocol::SharedRegion;

/// A mapped view of the shared region
pub trait MappedRegion: Send + Sync {
    fn region(&self) -> &SharedRegion;
}

impl MappedRegion for Arc<SharedRegion> {
    fn region(&self) -> &SharedRegion {
        self
    }
}

/// Opens an existing region by name
pub trait RegionMapper: Send + Sync {
    /// `Ok(None)` while nobody has created the region yet
    fn open(&self, name: &str) -> Result<Option<Box<dyn MappedRegion>>>;
}

#[cfg(any(test, feature = "test-support"))]
pub use heap::HeapMapper;

#[cfg(any(test, feature = "test-support"))]
mod heap {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex, MutexGuard};

    use super::{MappedRegion, RegionMapper};
    use crate::error::Result;
    use crate::protocol::SharedRegion;

    /// In-memory mapper: regions are plain heap allocations keyed by name
    #[derive(Default)]
    pub struct HeapMapper {
        regions: Mutex<HashMap<String, Arc<SharedRegion>>>,
    }

    impl HeapMapper {
        pub fn new() -> Self {
            Self::default()
        }

        fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<SharedRegion>>> {
            self.regions.lock().unwrap_or_else(|e| e.into_inner())
        }

        /// Create (or replace) a region the way the agent does
        pub fn create(&self, name: &str, title_id: u32) -> Arc<SharedRegion> {
            let region = Arc::new(SharedRegion::default());
            region.initialize(title_id);
            region.set_agent_running(true);
            self.insert(name, region.clone());
            region
        }

        pub fn insert(&self, name: &str, region: Arc<SharedRegion>) {
            self.lock().insert(name.to_string(), region);
        }
    }

    impl RegionMapper for HeapMapper {
        fn open(&self, name: &str) -> Result<Option<Box<dyn MappedRegion>>> {
            let region = self.lock().get(name).cloned();
            match region {
                Some(region) => {
                    region.validate()?;
                    Ok(Some(Box::new(region)))
                }
                None => Ok(None),
            }
        }
    }
}

#[cfg(target_os = "windows")]
pub use windows_impl::WindowsMapper;

#[cfg(target_os = "windows")]
mod windows_impl {
    use windows::Win32::Foundation::{CloseHandle, ERROR_FILE_NOT_FOUND, HANDLE};
    use windows::Win32::System::Memory::{
        FILE_MAP_ALL_ACCESS, MEMORY_MAPPED_VIEW_ADDRESS, MapViewOfFile, OpenFileMappingW,
        UnmapViewOfFile,
    };
    use windows::core::HSTRING;

    use super::{MappedRegion, RegionMapper};
    use crate::error::{Error, Result};
    use crate::protocol::SharedRegion;
    use crate::protocol::layout::REGION_MAX_SIZE;

    /// Opens regions created by the agent through `CreateFileMappingW`
    #[derive(Debug, Default, Clone, Copy)]
    pub struct WindowsMapper;

    struct WindowsMapping {
        handle: HANDLE,
        view: MEMORY_MAPPED_VIEW_ADDRESS,
    }

    // SAFETY: the view is only accessed through atomics.
    unsafe impl Send for WindowsMapping {}
    unsafe impl Sync for WindowsMapping {}

    impl MappedRegion for WindowsMapping {
        fn region(&self) -> &SharedRegion {
            // SAFETY: validated in `open`, unmapped only on drop.
            unsafe { &*(self.view.Value as *const SharedRegion) }
        }
    }

    impl Drop for WindowsMapping {
        fn drop(&mut self) {
            // SAFETY: we own both the view and the handle.
            unsafe {
                let _ = UnmapViewOfFile(self.view);
                let _ = CloseHandle(self.handle);
            }
        }
    }

    impl RegionMapper for WindowsMapper {
        fn open(&self, name: &str) -> Result<Option<Box<dyn MappedRegion>>> {
            let name = HSTRING::from(name);
            // SAFETY: plain Win32 calls; handles are closed by WindowsMapping.
            unsafe {
                let handle = match OpenFileMappingW(FILE_MAP_ALL_ACCESS.0, false, &name) {
                    Ok(handle) => handle,
                    Err(e) if e.code() == ERROR_FILE_NOT_FOUND.to_hresult() => return Ok(None),
                    Err(e) => return Err(Error::RegionUnavailable(e.to_string())),
                };

                let view = MapViewOfFile(handle, FILE_MAP_ALL_ACCESS, 0, 0, REGION_MAX_SIZE);
                if view.Value.is_null() {
                    let _ = CloseHandle(handle);
                    return Err(Error::RegionUnavailable(format!(
                        "MapViewOfFile failed for {}",
                        name
                    )));
                }

                let mapping = WindowsMapping { handle, view };
                SharedRegion::view(view.Value as *const u8, REGION_MAX_SIZE)?.validate()?;
                Ok(Some(Box::new(mapping)))
            }
        }
    }
}
