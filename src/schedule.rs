//! Bookable time slots

use chrono::NaiveDate;

use crate::models::Appointment;

/// Half-hour slots offered each day
pub const TIME_SLOTS: [&str; 16] = [
    "08:00", "08:30", "09:00", "09:30", "10:00", "10:30", "11:00", "11:30", "14:00", "14:30",
    "15:00", "15:30", "16:00", "16:30", "17:00", "17:30",
];

/// Reduce `HH:MM[:SS]` to `HH:MM`.
pub fn normalize_time(time: &str) -> &str {
    let time = time.trim();
    match time.char_indices().nth(5) {
        Some((idx, ':')) => &time[..idx],
        _ => time,
    }
}

/// Whether `time` is one of the offered slots
pub fn is_slot(time: &str) -> bool {
    TIME_SLOTS.contains(&normalize_time(time))
}

/// Slots on `date` not taken by an appointment that is not cancelled.
pub fn available_slots(date: NaiveDate, booked: &[Appointment]) -> Vec<&'static str> {
    TIME_SLOTS
        .iter()
        .copied()
        .filter(|slot| {
            !booked.iter().any(|appointment| {
                appointment.date == date
                    && appointment.status.occupies_slot()
                    && normalize_time(&appointment.time) == *slot
            })
        })
        .collect()
}
