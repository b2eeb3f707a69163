//! Win32 glue: region creation, inline hooks and exported entry points

mod detour;
mod entry;
mod functions;
mod hooks;
mod memory;
mod region;
