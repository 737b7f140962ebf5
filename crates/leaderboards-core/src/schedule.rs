//! Compiled reset schedules and the epoch calculator.
//!
//! The epoch of a reference time is the number of schedule occurrences in `(0, ref]`, so a
//! reference before the first occurrence is epoch 0. Schedules with a constant cadence use
//! closed-form arithmetic; calendar-dependent schedules (monthly, weekday sets, irregular
//! minute lists) count occurrences by walking the calendar, warm-started from the last
//! resolved checkpoint.

use std::sync::{Mutex, PoisonError};

use time::OffsetDateTime;

use crate::{cron::CronExpression, CoreError, ResetSchedule};

#[derive(Debug)]
pub struct CompiledSchedule {
    schedule: ResetSchedule,
    cadence: Cadence,
    checkpoint: Mutex<Option<Checkpoint>>,
}

#[derive(Debug)]
enum Cadence {
    Manual {
        epoch: i64,
    },
    Uniform {
        expression: CronExpression,
        first: i64,
        interval: i64,
    },
    Calendar {
        expression: CronExpression,
        first: i64,
    },
}

/// Epoch resolved at `resolved_at`, valid until `next_reset` (exclusive)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Checkpoint {
    epoch: i64,
    resolved_at: i64,
    next_reset: i64,
}

impl CompiledSchedule {
    pub fn compile(schedule: &ResetSchedule) -> Result<Self, CoreError> {
        let cadence = match schedule {
            ResetSchedule::Manual { epoch } => Cadence::Manual { epoch: *epoch },
            _ => {
                let source = schedule.expression().unwrap_or_default();
                let expression = CronExpression::parse(source)?;
                let first = expression
                    .next_after(0)
                    .ok_or_else(|| CoreError::invalid_schedule(source, "never fires"))?;
                let second = expression
                    .next_after(first)
                    .ok_or_else(|| CoreError::invalid_schedule(source, "fires only once"))?;

                match expression.uniform_interval() {
                    Some(interval) if interval == second - first => Cadence::Uniform {
                        expression,
                        first,
                        interval,
                    },
                    _ => Cadence::Calendar { expression, first },
                }
            }
        };

        Ok(Self {
            schedule: schedule.clone(),
            cadence,
            checkpoint: Mutex::new(None),
        })
    }

    pub fn schedule(&self) -> &ResetSchedule {
        &self.schedule
    }

    /// Constant spacing between resets, if the schedule has one
    pub fn interval(&self) -> Option<i64> {
        match &self.cadence {
            Cadence::Uniform { interval, .. } => Some(*interval),
            _ => None,
        }
    }

    pub fn epoch(&self, reference: OffsetDateTime) -> i64 {
        self.epoch_at(reference.unix_timestamp())
    }

    /// Epoch for a unix timestamp. Non-decreasing in `reference`.
    pub fn epoch_at(&self, reference: i64) -> i64 {
        match &self.cadence {
            Cadence::Manual { epoch } => *epoch,
            Cadence::Uniform {
                first, interval, ..
            } => {
                if reference < *first {
                    0
                } else {
                    (reference - first).div_euclid(*interval) + 1
                }
            }
            Cadence::Calendar { expression, first } => {
                if reference < *first {
                    0
                } else {
                    self.walk_epoch(expression, reference)
                }
            }
        }
    }

    fn walk_epoch(&self, expression: &CronExpression, reference: i64) -> i64 {
        let cached = *self.lock_checkpoint();

        let epoch = match cached {
            Some(checkpoint)
                if checkpoint.resolved_at <= reference && reference < checkpoint.next_reset =>
            {
                return checkpoint.epoch;
            }
            Some(checkpoint) if checkpoint.resolved_at <= reference => {
                checkpoint.epoch + expression.count_between(checkpoint.resolved_at, reference)
            }
            // earlier than anything cached: answer from the origin
            _ => expression.count_between(0, reference),
        };

        let next_reset = expression.next_after(reference).unwrap_or(i64::MAX);
        let mut guard = self.lock_checkpoint();
        if guard.map_or(true, |current| current.resolved_at <= reference) {
            *guard = Some(Checkpoint {
                epoch,
                resolved_at: reference,
                next_reset,
            });
        }
        epoch
    }

    fn lock_checkpoint(&self) -> std::sync::MutexGuard<'_, Option<Checkpoint>> {
        self.checkpoint
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Next reset strictly after `reference`; `None` for manual schedules
    pub fn next(&self, reference: OffsetDateTime) -> Option<OffsetDateTime> {
        self.next_unix(reference)
            .and_then(|ts| OffsetDateTime::from_unix_timestamp(ts).ok())
    }

    pub fn next_unix(&self, reference: OffsetDateTime) -> Option<i64> {
        match &self.cadence {
            Cadence::Manual { .. } => None,
            Cadence::Uniform { expression, .. } | Cadence::Calendar { expression, .. } => {
                expression.next_after(reference.unix_timestamp())
            }
        }
    }
}
