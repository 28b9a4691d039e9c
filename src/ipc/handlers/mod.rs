pub mod availability;
pub mod core;
pub mod exceptions;
pub mod setup;
pub mod timetable;
