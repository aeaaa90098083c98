//! Device-switch rate limiting.
//!
//! A license is bound to one device at a time. Rebinding to another device is
//! allowed only once the cooldown since the previous switch has fully elapsed.
//! A license that has never switched may switch immediately.

pub const SWITCH_COOLDOWN_SECS: i64 = 24 * 3600;

const SECONDS_PER_HOUR: i64 = 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchVerdict {
    Permitted,
    /// Whole hours (rounded up) until the next switch is permitted
    Cooldown { remaining_hours: i64 },
}

pub fn evaluate_switch(last_switch_at: Option<i64>, now: i64) -> SwitchVerdict {
    let Some(last) = last_switch_at else {
        return SwitchVerdict::Permitted;
    };

    let elapsed = now - last;
    if elapsed > SWITCH_COOLDOWN_SECS {
        return SwitchVerdict::Permitted;
    }

    let remaining = SWITCH_COOLDOWN_SECS - elapsed;
    // ceil to whole hours; at the exact boundary still report one hour
    let remaining_hours = ((remaining + SECONDS_PER_HOUR - 1) / SECONDS_PER_HOUR).max(1);
    SwitchVerdict::Cooldown { remaining_hours }
}

pub fn cooldown_message(remaining_hours: i64) -> String {
    let unit = if remaining_hours == 1 { "hour" } else { "hours" };
    format!(
        "This license was moved to another device recently. Try again in {} {}.",
        remaining_hours, unit
    )
}
