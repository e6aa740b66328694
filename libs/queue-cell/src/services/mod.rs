pub mod events;
pub mod numbering;
pub mod ordering;
pub mod queue;
pub mod store;

pub use events::{QueueEvent, QueueEventBus, QueueEventKind, QueueEventReceiver};
pub use numbering::assign_queue_number;
pub use ordering::{reorder, with_positions};
pub use queue::QueueManager;
pub use store::{InMemoryVisitStore, VisitStore};
