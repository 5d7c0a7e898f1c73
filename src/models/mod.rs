pub mod activity;
pub mod analytics;
pub mod assignment;

pub use activity::{CompletionRecord, SetLogEntry};
pub use analytics::{Notification, NotificationType, PersonalRecord, StreakState};
pub use assignment::{NewAssignment, ProgramAssignment, WorkoutDefinition};
