//! Records kept in the local state store.
//!
//! - [`IngestedNote`]: a `.note` file that has been uploaded, keyed by path.
//!   Its mtime and content hash decide whether the next event is a no-op.
//! - [`ExportedDoc`]: a server document mirrored onto the device, keyed by
//!   document ID. Each record owns exactly one local file.
//!
//! Neither carries business logic; they only make re-runs idempotent.

mod export;
mod note;

pub use export::*;
pub use note::*;
