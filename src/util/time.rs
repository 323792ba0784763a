//! Millisecond-precision timestamps: the one place "now" is read from
//! the system clock, so every caller goes through the same function.

use std::time::{SystemTime, UNIX_EPOCH};

pub fn now_msec() -> u64 {
	now_system_time()
		.duration_since(UNIX_EPOCH)
		.expect("clock is before the Unix epoch")
		.as_millis() as u64
}

fn now_system_time() -> SystemTime {
	SystemTime::now()
}

pub fn msec_to_rfc3339(msec: u64) -> String {
	let secs = (msec / 1000) as i64;
	let nanos = ((msec % 1000) * 1_000_000) as u32;
	chrono::DateTime::<chrono::Utc>::from_timestamp(secs, nanos)
		.unwrap_or_default()
		.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
