pub mod facade;
pub mod patients;

pub use facade::SchedulingFacade;
pub use patients::{PatientDirectory, PatientRecord, StaticPatientDirectory, SupabasePatientDirectory};
