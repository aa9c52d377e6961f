pub mod memory;
pub mod mongo;
pub mod provisioner;
pub mod target;

pub use memory::{InMemoryTarget, MemoryHandle};
pub use mongo::MongoTarget;
pub use provisioner::{ProvisionError, Provisioner};
pub use target::{IndexInfo, ProvisionTarget};
