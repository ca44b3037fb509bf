pub mod certificate;
pub mod engine;
pub mod health;
pub mod inventory;
pub mod progress;
pub mod registry;
pub mod supervisor;

pub use engine::{SanitizeEngine, WipeConfig};
pub use inventory::{Device, DeviceClass, DeviceInventory, Inventory, MobileDevice};
pub use progress::{ProgressEvent, ProgressSink};
pub use supervisor::JobSupervisor;
