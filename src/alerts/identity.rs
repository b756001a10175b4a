//! Platform-safe alert identifiers.
//!
//! Alert channels address alerts by a 32-bit signed integer. Identifiers are
//! derived deterministically from the schedule id so that a later
//! reconciliation can cancel everything a schedule ever registered without
//! having to remember what was registered:
//!
//! | band            | identifier                          |
//! |-----------------|-------------------------------------|
//! | dose            | `base + offset * 1_000`             |
//! | snooze (odd)    | `root + 10_000`                     |
//! | snooze (even)   | `root + 50_000`                     |
//! | out of stock    | `base + 30_000`                     |
//!
//! `base` is the decimal digits of the schedule id reduced modulo `100_000`.
//! Alternating the snooze band by generation means a re-snooze never reuses
//! the identifier of the alert being snoozed. Two different schedules can
//! still collide when their digits agree modulo `100_000`; the delivery chain
//! detects that case when it verifies a registration.

/// Modulus applied to the schedule id digits.
pub const ID_MODULUS: i32 = 100_000;
/// Distance between consecutive day offsets of the same schedule.
pub const DAY_STRIDE: i32 = 1_000;
/// Offset of odd snooze generations.
pub const SNOOZE_OFFSET: i32 = 10_000;
/// Offset of the one-shot out-of-stock alert.
pub const OUT_OF_STOCK_OFFSET: i32 = 30_000;
/// Offset of even snooze generations.
pub const RESNOOZE_OFFSET: i32 = 50_000;
/// Largest lookahead that keeps the dose band clear of the snooze band.
pub const MAX_LOOKAHEAD_DAYS: u32 = 10;

/// Digits of `schedule_id` reduced modulo [`ID_MODULUS`]; `0` when the id has no digits.
#[must_use]
pub fn schedule_base(schedule_id: &str) -> i32 {
    schedule_id
        .chars()
        .filter_map(|c| c.to_digit(10))
        .fold(0_i32, |acc, digit| {
            // acc < ID_MODULUS so acc * 10 + 9 stays far below i32::MAX.
            (acc * 10 + i32::try_from(digit).unwrap_or(0)) % ID_MODULUS
        })
}

/// Identifier of the dose alert for `day_offset`.
#[must_use]
pub fn dose_id(schedule_id: &str, day_offset: u32) -> i32 {
    let offset = i32::try_from(day_offset).unwrap_or(i32::MAX);
    schedule_base(schedule_id).saturating_add(offset.saturating_mul(DAY_STRIDE))
}

/// Identifier of snooze `generation` (1-based) of the alert rooted at `root_id`.
#[must_use]
pub fn snooze_id(root_id: i32, generation: u32) -> i32 {
    if generation % 2 == 1 {
        root_id.saturating_add(SNOOZE_OFFSET)
    } else {
        root_id.saturating_add(RESNOOZE_OFFSET)
    }
}

/// Identifier of the schedule's one-shot out-of-stock alert.
#[must_use]
pub fn out_of_stock_id(schedule_id: &str) -> i32 {
    schedule_base(schedule_id).saturating_add(OUT_OF_STOCK_OFFSET)
}

/// Every dose and snooze identifier the schedule can own within `lookahead_days`.
///
/// Used to cancel a schedule's alerts regardless of what the cache remembers.
#[must_use]
pub fn window_ids(schedule_id: &str, lookahead_days: u32) -> Vec<i32> {
    let mut ids = Vec::with_capacity(lookahead_days as usize * 3);
    for offset in 0..lookahead_days {
        let dose = dose_id(schedule_id, offset);
        ids.push(dose);
        ids.push(snooze_id(dose, 1));
        ids.push(snooze_id(dose, 2));
    }
    ids
}
