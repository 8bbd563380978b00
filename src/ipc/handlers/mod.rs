pub mod assessments;
pub mod attendance;
pub mod backup_exchange;
pub mod core;
pub mod courses;
pub mod dashboard;
pub mod grades;
pub mod softskills;
