pub mod conflict;
pub mod ledger;
pub mod lifecycle;
pub mod store;

pub use ledger::AppointmentLedger;
pub use lifecycle::AppointmentLifecycleService;
pub use store::{AppointmentStore, InMemoryAppointmentStore};
