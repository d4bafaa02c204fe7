pub mod profile;
pub mod queue_item;

pub use profile::Profile;
pub use queue_item::{QueueItem, QueueStatus};
