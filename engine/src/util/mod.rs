// SPDX-License-Identifier: Apache-2.0

pub mod redacted;
pub mod time;
