//! Platform access to the target process and the shared region

use std::sync::Arc;

use moveswap_core::{RegionMapper, Result, TargetProcess};

#[cfg(target_os = "windows")]
pub fn region_mapper() -> Result<Arc<dyn RegionMapper>> {
    Ok(Arc::new(moveswap_core::bridge::WindowsMapper))
}

#[cfg(target_os = "windows")]
pub fn find_target(process_name: &str) -> Result<Arc<dyn TargetProcess>> {
    let process = moveswap_core::process::WindowsProcess::find_and_open(process_name)?;
    Ok(Arc::new(process))
}

#[cfg(not(target_os = "windows"))]
pub fn region_mapper() -> Result<Arc<dyn RegionMapper>> {
    Err(moveswap_core::Error::UnsupportedPlatform("Mapping the shared region"))
}

#[cfg(not(target_os = "windows"))]
pub fn find_target(_process_name: &str) -> Result<Arc<dyn TargetProcess>> {
    Err(moveswap_core::Error::UnsupportedPlatform("Attaching to the target"))
}
