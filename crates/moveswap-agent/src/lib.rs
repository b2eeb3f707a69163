//! moveswap agent library
//!
//! Loaded into the target process by the controller. It maps the shared
//! region the controller talks through, intercepts the target functions
//! listed by the title, and substitutes published payloads when the target
//! initializes a player entity.
//!
//! The interception logic only reaches the target through [`GameFunctions`]
//! and [`GameMemory`](moveswap_core::GameMemory), so everything outside the
//! `windows` module runs on any platform against fakes.
//!
//! # Entry points
//! On Windows the library exports `AgentInit`, `AgentRun`, `AgentStop`,
//! `ExecuteExtraprop` and `AgentDebug`, called by the controller through
//! remote threads.

pub mod context;
pub mod debug;
pub mod extra_prop;
pub mod functions;
pub mod game;
pub mod hooks;
pub mod peer;
pub mod runtime;
pub mod sync;
#[cfg(target_os = "windows")]
mod windows;

#[cfg(test)]
pub(crate) mod testing;

pub use context::{AgentContext, AgentContextBuilder};
pub use functions::LocatedFunctions;
pub use game::GameFunctions;
pub use peer::{LobbyService, NoLobby, PeerEvent, PeerLink};
pub use sync::{Clock, SyncTracker, SystemClock};
