/// Hosts directories
///
/// A directory is the `name=destination` list a jump service publishes.
/// The same type holds the local directory, every mirrored peer snapshot
/// and the pending registration queue.

mod hosts;
mod store;

pub use hosts::{Directory, HostRecord};
pub use store::{backup_original, load, persist, write_atomic};
