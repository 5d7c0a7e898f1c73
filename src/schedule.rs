//! Schedule Resolver
//!
//! Read-side projection answering "what is due for this client, and did they
//! do it". Every active assignment contributes its program's top-level
//! workouts to a `week -> day -> [workout]` grid; several assignments may put
//! workouts on the same slot, so slots are lists.
//!
//! Completions are indexed under three keys of decreasing specificity:
//! - `date:workout:assignment` (exact)
//! - `date:workout` (records written before assignments were linked)
//! - `date:any` (the client trained that day at all)

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::debug;

use crate::dates::{
    exact_completion_key, loose_completion_key, month_days, program_week, sunday_based_weekday,
    workout_completion_key,
};
use crate::models::{CompletionRecord, ProgramAssignment, WorkoutDefinition};

/// How far back completions are indexed
pub const COMPLETION_LOOKBACK_DAYS: u64 = 90;

const DAYS_PER_WEEK: u8 = 7;

#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

// ---------------------------------------------------------------------------
/// Inputs
// ---------------------------------------------------------------------------

/// An active assignment joined with its program name
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ActiveAssignment {
    #[sqlx(flatten)]
    pub assignment: ProgramAssignment,
    pub program_name: String,
}

// ---------------------------------------------------------------------------
/// Output types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledWorkout {
    pub workout_id: i64,
    pub name: String,
    pub program_id: i64,
    pub program_name: String,
    pub assignment_id: i64,
    pub week_number: i64,
    pub day_of_week: Option<u8>,
}

/// Date range of one active assignment and the length of its program
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentWindow {
    pub assignment_id: i64,
    pub program_id: i64,
    pub program_name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub program_weeks: i64,
}

impl AssignmentWindow {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionMatch {
    /// date + workout + assignment
    Exact,
    /// date + workout, completion not linked to a different assignment
    Workout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionHit {
    pub completion_id: i64,
    pub assignment_id: Option<i64>,
}

/// Completion lookup keyed at three specificities
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompletionIndex {
    entries: BTreeMap<String, CompletionHit>,
}

impl CompletionIndex {
    pub fn insert(&mut self, record: &CompletionRecord) {
        let hit = CompletionHit {
            completion_id: record.id,
            assignment_id: record.assignment_id,
        };
        let date = record.scheduled_date;

        if let Some(assignment_id) = record.assignment_id {
            self.entries
                .entry(exact_completion_key(date, record.workout_id, assignment_id))
                .or_insert(hit);
        }

        // Unlinked records win the workout key: they are the ones that need it
        let workout_key = workout_completion_key(date, record.workout_id);
        let replace = match self.entries.get(&workout_key) {
            Some(existing) => existing.assignment_id.is_some() && record.assignment_id.is_none(),
            None => true,
        };
        if replace {
            self.entries.insert(workout_key, hit);
        }

        self.entries.entry(loose_completion_key(date)).or_insert(hit);
    }

    /// Find the completion for a due workout, falling back from the exact key
    /// to the workout key when the record carries no conflicting assignment.
    pub fn lookup(
        &self,
        date: NaiveDate,
        workout_id: i64,
        assignment_id: Option<i64>,
    ) -> Option<(CompletionMatch, CompletionHit)> {
        if let Some(assignment_id) = assignment_id {
            if let Some(hit) = self
                .entries
                .get(&exact_completion_key(date, workout_id, assignment_id))
            {
                return Some((CompletionMatch::Exact, *hit));
            }
        }

        let hit = self.entries.get(&workout_completion_key(date, workout_id))?;
        let compatible = match (hit.assignment_id, assignment_id) {
            (Some(linked), Some(wanted)) => linked == wanted,
            _ => true,
        };
        compatible.then_some((CompletionMatch::Workout, *hit))
    }

    /// Whether any workout was completed on `date`
    pub fn has_any(&self, date: NaiveDate) -> bool {
        self.entries.contains_key(&loose_completion_key(date))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DueWorkout {
    #[serde(flatten)]
    pub workout: ScheduledWorkout,
    pub completed: bool,
    pub matched_by: Option<CompletionMatch>,
    pub completion_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayStatus {
    pub date: NaiveDate,
    pub due: Vec<DueWorkout>,
    /// Any completion on this date, scheduled or not
    pub has_completion: bool,
    pub on_schedule: bool,
}

pub type DaySlots = BTreeMap<u8, Vec<ScheduledWorkout>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleResolution {
    pub by_week_and_day: BTreeMap<i64, DaySlots>,
    /// Week 1 only, for single-week consumers
    pub by_day: DaySlots,
    pub unscheduled: Vec<ScheduledWorkout>,
    pub completion_index: CompletionIndex,
    /// `date:workout` keys only
    pub legacy_completions: BTreeSet<String>,
    pub max_week: i64,
    pub earliest_start: Option<NaiveDate>,
    pub assignments: Vec<AssignmentWindow>,
}

fn empty_week() -> DaySlots {
    (0..DAYS_PER_WEEK).map(|day| (day, Vec::new())).collect()
}

impl Default for ScheduleResolution {
    fn default() -> Self {
        let mut by_week_and_day = BTreeMap::new();
        by_week_and_day.insert(1, empty_week());
        Self {
            by_week_and_day,
            by_day: empty_week(),
            unscheduled: Vec::new(),
            completion_index: CompletionIndex::default(),
            legacy_completions: BTreeSet::new(),
            max_week: 1,
            earliest_start: None,
            assignments: Vec::new(),
        }
    }
}

impl ScheduleResolution {
    /// Build the projection from already-loaded rows
    pub fn build(
        assignments: &[ActiveAssignment],
        workouts: &[WorkoutDefinition],
        completions: &[CompletionRecord],
    ) -> Self {
        let mut resolution = Self::default();

        for active in assignments {
            let assignment = &active.assignment;
            let program_workouts: Vec<&WorkoutDefinition> = workouts
                .iter()
                .filter(|w| w.program_id == assignment.program_id && w.is_top_level())
                .collect();

            let program_weeks = program_workouts
                .iter()
                .map(|w| w.week_number.max(1))
                .max()
                .unwrap_or(1);

            for workout in program_workouts {
                let week_number = workout.week_number.max(1);
                let day = workout
                    .day_of_week
                    .and_then(|d| u8::try_from(d).ok())
                    .filter(|d| *d < DAYS_PER_WEEK);

                let scheduled = ScheduledWorkout {
                    workout_id: workout.id,
                    name: workout.name.clone(),
                    program_id: assignment.program_id,
                    program_name: active.program_name.clone(),
                    assignment_id: assignment.id,
                    week_number,
                    day_of_week: day,
                };

                match day {
                    Some(day) => {
                        resolution.max_week = resolution.max_week.max(week_number);
                        resolution
                            .by_week_and_day
                            .entry(week_number)
                            .or_insert_with(empty_week)
                            .entry(day)
                            .or_default()
                            .push(scheduled);
                    }
                    None => resolution.unscheduled.push(scheduled),
                }
            }

            resolution.earliest_start = Some(match resolution.earliest_start {
                Some(current) => current.min(assignment.start_date),
                None => assignment.start_date,
            });

            resolution.assignments.push(AssignmentWindow {
                assignment_id: assignment.id,
                program_id: assignment.program_id,
                program_name: active.program_name.clone(),
                start_date: assignment.start_date,
                end_date: assignment.end_date,
                program_weeks,
            });
        }

        for week in 1..=resolution.max_week {
            resolution
                .by_week_and_day
                .entry(week)
                .or_insert_with(empty_week);
        }
        if let Some(first_week) = resolution.by_week_and_day.get(&1) {
            resolution.by_day = first_week.clone();
        }

        for record in completions {
            resolution.completion_index.insert(record);
            resolution
                .legacy_completions
                .insert(workout_completion_key(record.scheduled_date, record.workout_id));
        }

        resolution
    }

    /// Workouts due on `date` across every active assignment covering it
    pub fn due_on(&self, date: NaiveDate) -> Vec<DueWorkout> {
        let day = sunday_based_weekday(date);
        let mut due = Vec::new();

        for window in self.assignments.iter().filter(|w| w.contains(date)) {
            let Some(week) = program_week(window.start_date, date, window.program_weeks) else {
                continue;
            };
            let Some(slot) = self.by_week_and_day.get(&week).and_then(|days| days.get(&day)) else {
                continue;
            };

            for workout in slot.iter().filter(|w| w.assignment_id == window.assignment_id) {
                let found =
                    self.completion_index
                        .lookup(date, workout.workout_id, Some(window.assignment_id));
                due.push(DueWorkout {
                    workout: workout.clone(),
                    completed: found.is_some(),
                    matched_by: found.map(|(m, _)| m),
                    completion_id: found.map(|(_, hit)| hit.completion_id),
                });
            }
        }

        due
    }

    pub fn day_status(&self, date: NaiveDate) -> DayStatus {
        let due = self.due_on(date);
        let has_completion = self.completion_index.has_any(date);
        let on_schedule = due.is_empty() || has_completion || due.iter().all(|w| w.completed);
        DayStatus {
            date,
            due,
            has_completion,
            on_schedule,
        }
    }

    /// Day statuses for a calendar month, None for an invalid month
    pub fn month(&self, year: i32, month: u32) -> Option<Vec<DayStatus>> {
        let days = month_days(year, month)?;
        Some(days.into_iter().map(|d| self.day_status(d)).collect())
    }
}

// ---------------------------------------------------------------------------
// Database Operations
// ---------------------------------------------------------------------------

/// Resolve a client's schedule as of `now`. A client without active
/// assignments gets the default (one empty week), not an error.
pub async fn resolve(
    pool: &SqlitePool,
    client_id: i64,
    now: DateTime<Utc>,
) -> Result<ScheduleResolution, ScheduleError> {
    let mut conn = pool.acquire().await?;

    let assignments = sqlx::query_as::<_, ActiveAssignment>(
        r#"
        SELECT pa.id, pa.client_id, pa.program_id, pa.start_date, pa.end_date,
               pa.duration_weeks, pa.order_index, pa.is_active,
               p.name AS program_name
        FROM program_assignments pa
        JOIN programs p ON p.id = pa.program_id
        WHERE pa.client_id = ? AND pa.is_active = 1
        ORDER BY pa.order_index, pa.id
        "#,
    )
    .bind(client_id)
    .fetch_all(&mut *conn)
    .await?;

    if assignments.is_empty() {
        debug!(client_id, "no active assignments");
        return Ok(ScheduleResolution::default());
    }

    let workouts = sqlx::query_as::<_, WorkoutDefinition>(
        r#"
        SELECT id, program_id, name, day_of_week, week_number, parent_workout_id, order_index
        FROM workouts
        WHERE parent_workout_id IS NULL
          AND program_id IN (
            SELECT program_id FROM program_assignments
            WHERE client_id = ? AND is_active = 1
          )
        ORDER BY week_number, day_of_week, order_index, id
        "#,
    )
    .bind(client_id)
    .fetch_all(&mut *conn)
    .await?;

    let window_start = now
        .date_naive()
        .checked_sub_days(Days::new(COMPLETION_LOOKBACK_DAYS))
        .unwrap_or(NaiveDate::MIN);

    let completions = sqlx::query_as::<_, CompletionRecord>(
        r#"
        SELECT id, client_id, workout_id, assignment_id, scheduled_date, completed_at
        FROM workout_completions
        WHERE client_id = ? AND scheduled_date >= ?
        ORDER BY scheduled_date, id
        "#,
    )
    .bind(client_id)
    .bind(window_start)
    .fetch_all(&mut *conn)
    .await?;

    debug!(
        client_id,
        assignments = assignments.len(),
        workouts = workouts.len(),
        completions = completions.len(),
        "resolved schedule"
    );

    Ok(ScheduleResolution::build(&assignments, &workouts, &completions))
}

// ---------------------------------------------------------------------------
/// Tests
// ---------------------------------------------------------------------------
