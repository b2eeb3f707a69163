//! Creating the shared region from inside the target

use moveswap_core::protocol::layout::REGION_MAX_SIZE;
use moveswap_core::{Error, MappedRegion, Result, SharedRegion};
use tracing::{info, warn};
use windows::Win32::Foundation::{
    CloseHandle, ERROR_ALREADY_EXISTS, GetLastError, HANDLE, INVALID_HANDLE_VALUE,
};
use windows::Win32::System::Memory::{
    CreateFileMappingW, FILE_MAP_ALL_ACCESS, MEMORY_MAPPED_VIEW_ADDRESS, MapViewOfFile,
    PAGE_READWRITE, UnmapViewOfFile,
};
use windows::core::HSTRING;

/// A pagefile-backed mapping owned by the agent
pub struct OwnedRegion {
    handle: HANDLE,
    view: MEMORY_MAPPED_VIEW_ADDRESS,
    fresh: bool,
}

// SAFETY: the view is only accessed through atomics.
unsafe impl Send for OwnedRegion {}
unsafe impl Sync for OwnedRegion {}

impl OwnedRegion {
    /// Create the region, or attach to the one an earlier load left behind.
    ///
    /// A fresh region stays invisible to the controller until
    /// [`SharedRegion::initialize`] is called on it.
    pub fn create(name: &str) -> Result<Self> {
        let wide = HSTRING::from(name);
        // SAFETY: plain Win32 calls; handles are closed on error or drop.
        unsafe {
            let handle = CreateFileMappingW(
                INVALID_HANDLE_VALUE,
                None,
                PAGE_READWRITE,
                0,
                REGION_MAX_SIZE as u32,
                &wide,
            )
            .map_err(|e| Error::RegionUnavailable(e.to_string()))?;
            let existed = GetLastError() == ERROR_ALREADY_EXISTS;

            let view = MapViewOfFile(handle, FILE_MAP_ALL_ACCESS, 0, 0, REGION_MAX_SIZE);
            if view.Value.is_null() {
                let _ = CloseHandle(handle);
                return Err(Error::RegionUnavailable(format!(
                    "MapViewOfFile failed for {}",
                    name
                )));
            }
            let mut owned = Self {
                handle,
                view,
                fresh: true,
            };

            let region = owned.region();
            if existed && region.layout_size() != 0 {
                if let Err(e) = region.validate() {
                    warn!("Existing region {} is unusable: {}", name, e);
                    return Err(e);
                }
                owned.fresh = false;
                info!("Attached to existing region {}", name);
            } else {
                info!("Created region {}", name);
            }
            Ok(owned)
        }
    }

    /// The region still has to be initialized
    pub fn is_fresh(&self) -> bool {
        self.fresh
    }
}

impl MappedRegion for OwnedRegion {
    fn region(&self) -> &SharedRegion {
        // SAFETY: the view is REGION_MAX_SIZE bytes, page aligned, mapped
        // until drop, and the layout was checked at creation.
        unsafe { &*(self.view.Value as *const SharedRegion) }
    }
}

impl Drop for OwnedRegion {
    fn drop(&mut self) {
        // SAFETY: we own both the view and the handle.
        unsafe {
            let _ = UnmapViewOfFile(self.view);
            let _ = CloseHandle(self.handle);
        }
    }
}
