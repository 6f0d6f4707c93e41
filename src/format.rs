//! Human-readable rendering of byte rates, byte totals and tunnel uptime.
//!
//! Everything here is a pure function of its inputs. Formatting happens at
//! render time and never touches stored dashboard state.

use chrono::{DateTime, Utc};

const KIB: f64 = 1024.0;

const RATE_UNITS: [&str; 4] = ["B/s", "KB/s", "MB/s", "GB/s"];
const TOTAL_UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// Scale `value` by powers of 1024 and pick the matching unit.
///
/// The unit index is `floor(log_1024(value))`, clamped to the ladder. Values
/// past the top unit keep the top unit (e.g. "2048.00 GB/s"), values below 1
/// stay in the base unit.
fn scale(value: f64, units: &[&str]) -> String {
    if value == 0.0 {
        return format!("0 {}", units[0]);
    }

    // Repeated division instead of ln() ratios: exact powers of 1024 must not
    // land one unit low through rounding.
    let mut scaled = value;
    let mut index = 0;
    while scaled >= KIB && index < units.len() - 1 {
        scaled /= KIB;
        index += 1;
    }

    format!("{:.2} {}", scaled, units[index])
}

/// Format an instantaneous rate in bytes per second, e.g. `"1.50 KB/s"`.
pub fn format_rate(bytes_per_second: f64) -> String {
    scale(bytes_per_second, &RATE_UNITS)
}

/// Format a cumulative byte count, e.g. `"1.00 GB"`.
pub fn format_total(bytes: u64) -> String {
    scale(bytes as f64, &TOTAL_UNITS)
}

/// Time elapsed since `connected_at`, measured against the local clock.
pub fn format_uptime(connected_at: DateTime<Utc>) -> String {
    format_uptime_at(connected_at, Utc::now())
}

/// Same as [`format_uptime`] with an explicit "now".
pub fn format_uptime_at(connected_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    format_elapsed_secs((now - connected_at).num_seconds())
}

/// Render a duration in whole seconds using at most two units.
///
/// The largest non-zero unit is shown together with the remainder in the
/// next unit down: `"3d 2h"`, `"4h 12m"`, `"45m 10s"`, `"5s"`. Negative input
/// (a `connectedAt` ahead of the local clock) renders as `"0s"`.
pub fn format_elapsed_secs(secs: i64) -> String {
    let seconds = secs.max(0);
    let minutes = seconds / 60;
    let hours = minutes / 60;
    let days = hours / 24;

    if days > 0 {
        format!("{}d {}h", days, hours % 24)
    } else if hours > 0 {
        format!("{}h {}m", hours, minutes % 60)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds % 60)
    } else {
        format!("{}s", seconds)
    }
}
