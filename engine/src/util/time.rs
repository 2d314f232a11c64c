// SPDX-License-Identifier: Apache-2.0

//! The engine's one clock dependency: wall-clock instants as Unix epoch
//! nanoseconds, matching the wire `Envelope`'s timestamp fields, where
//! zero means unset.

/// Current wall-clock time, stamped onto an envelope whose plugin left
/// `resolved_at` unset.
pub fn now_unix_nanos() -> i64 {
	jiff::Timestamp::now()
		.as_nanosecond()
		.try_into()
		.unwrap_or(i64::MAX)
}
