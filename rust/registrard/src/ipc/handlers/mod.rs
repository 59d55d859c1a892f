pub mod analytics;
pub mod calendar;
pub mod core;
pub mod course_slips;
pub mod courses;
pub mod departments;
pub mod grades;
pub mod registrations;
pub mod session;
pub mod setup;
pub mod students;
pub mod users;
