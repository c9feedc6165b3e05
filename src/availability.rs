use serde_json::Value;

use crate::limits::{DAY_MS, MAX_AVAILABILITY_JSON_LEN, MINUTE_MS};
use crate::model::{Ms, Span};

// ── Weekly recurring availability ────────────────────────────────

pub const DAY_NAMES: [&str; 7] = ["MON", "TUE", "WED", "THU", "FRI", "SAT", "SUN"];

/// Minutes-since-midnight window inside one day. `end` may be 1440 ("24:00").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start_min: u32,
    pub end_min: u32,
}

/// A tutor's declared weekly schedule: one entry per weekday, Monday first.
/// Constructed only through [`WeeklyAvailability::parse`], which never fails
/// hard — anything malformed means "no declared availability".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeeklyAvailability {
    /// `days[0]` is Monday. An off day has an empty window list.
    days: [Vec<Window>; 7],
}

/// `"HH:MM"` to minutes since midnight; the literal `"24:00"` maps to 1440.
pub fn to_minutes(s: &str) -> Option<u32> {
    if s == "24:00" {
        return Some(1440);
    }
    let (h, m) = s.split_once(':')?;
    if h.len() != 2 || m.len() != 2 {
        return None;
    }
    let h: u32 = h.parse().ok()?;
    let m: u32 = m.parse().ok()?;
    if h > 23 || m > 59 {
        return None;
    }
    Some(h * 60 + m)
}

/// Minutes since midnight back to `"HH:MM"`, with 1440 rendered as `"24:00"`.
pub fn to_hhmm(min: u32) -> String {
    format!("{:02}:{:02}", min / 60, min % 60)
}

fn day_index(name: &str) -> Option<usize> {
    DAY_NAMES.iter().position(|d| d.eq_ignore_ascii_case(name))
}

/// Weekday (Monday = 0) of an operating-timezone day index. 1970-01-01 was a
/// Thursday.
pub fn weekday_of_day(day: i64) -> usize {
    (day.rem_euclid(7) as usize + 3) % 7
}

/// Midnight of the day containing `t`.
pub fn day_start(t: Ms) -> Ms {
    t.div_euclid(DAY_MS) * DAY_MS
}

impl WeeklyAvailability {
    /// Parse the persisted JSON array `[{day, off, slots:[{start,end}]}]`.
    /// Malformed, missing, or non-array input yields `None` — never an error.
    /// Absent day entries are off; overlapping windows within a day make the
    /// whole declaration unusable.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.len() > MAX_AVAILABILITY_JSON_LEN {
            return None;
        }
        let value: Value = serde_json::from_str(raw).ok()?;
        let entries = value.as_array()?;

        let mut days: [Vec<Window>; 7] = Default::default();
        for entry in entries {
            let obj = entry.as_object()?;
            let day = day_index(obj.get("day")?.as_str()?)?;
            let off = obj.get("off").and_then(Value::as_bool).unwrap_or(false);
            if off {
                days[day] = Vec::new();
                continue;
            }
            let mut windows = Vec::new();
            if let Some(slots) = obj.get("slots").and_then(Value::as_array) {
                for slot in slots {
                    let slot = slot.as_object()?;
                    let start = to_minutes(slot.get("start")?.as_str()?)?;
                    let end = to_minutes(slot.get("end")?.as_str()?)?;
                    if start >= end || end > 1440 {
                        return None;
                    }
                    windows.push(Window {
                        start_min: start,
                        end_min: end,
                    });
                }
            }
            windows.sort_by_key(|w| w.start_min);
            for pair in windows.windows(2) {
                if pair[1].start_min < pair[0].end_min {
                    return None; // overlapping windows within one day
                }
            }
            days[day] = windows;
        }
        Some(Self { days })
    }

    /// Render back to the canonical persisted form, seven entries MON..SUN.
    pub fn to_json(&self) -> String {
        let entries: Vec<Value> = DAY_NAMES
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let slots: Vec<Value> = self.days[i]
                    .iter()
                    .map(|w| {
                        serde_json::json!({
                            "start": to_hhmm(w.start_min),
                            "end": to_hhmm(w.end_min),
                        })
                    })
                    .collect();
                serde_json::json!({
                    "day": name,
                    "off": self.days[i].is_empty(),
                    "slots": slots,
                })
            })
            .collect();
        Value::Array(entries).to_string()
    }

    /// Declared windows for a weekday (Monday = 0), sorted by start.
    pub fn windows(&self, weekday: usize) -> &[Window] {
        &self.days[weekday]
    }

    /// Whether `span` fits entirely within a single declared window on a
    /// single calendar day. Spans touching midnight only qualify via a
    /// window ending at `"24:00"`.
    pub fn covers(&self, span: &Span) -> bool {
        if !span.same_day() {
            return false;
        }
        let day = span.start.div_euclid(DAY_MS);
        let start_min = ((span.start - day * DAY_MS) / MINUTE_MS) as u32;
        let end_min = ((span.end - day * DAY_MS) / MINUTE_MS) as u32;
        // span ending exactly at next midnight maps to minute 1440
        let end_min = if span.end == (day + 1) * DAY_MS { 1440 } else { end_min };
        self.days[weekday_of_day(day)]
            .iter()
            .any(|w| w.start_min <= start_min && end_min <= w.end_min)
    }

    /// True when no window is declared on any day.
    pub fn is_empty(&self) -> bool {
        self.days.iter().all(Vec::is_empty)
    }
}
