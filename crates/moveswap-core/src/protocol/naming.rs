/// Version token both sides must agree on
pub const PROTOCOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the shared region for a given title and target process
pub fn region_name(title: &str, pid: u32) -> String {
    format!("Local\\moveswap_{}_{}", title, pid)
}
