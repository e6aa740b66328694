pub mod shifts;
pub mod slots;

pub use shifts::ShiftDirectory;
pub use slots::{annotate, availability_view, generate_slots, mark_past};
