//! Upstream program handles.

mod pty;
mod types;

pub use pty::PtySpawner;
pub use types::{
    ProgramControl, ProgramEvent, ProgramHandle, ProgramSpawner, SpawnError, SpawnSpec, TermSignal,
};
