// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::fmt;

use serde::{Deserialize, Serialize};

/// Application lifecycle transitions the host forwards to the client.
///
/// - `EnteringBackground`: state is saved, a flush is requested when
///   `flush_on_background` is set, and the flush timer pauses.
/// - `BecomingActive`: the flush timer resumes.
/// - `Terminating`: state is saved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleSignal {
	EnteringBackground,
	BecomingActive,
	Terminating,
}

impl fmt::Display for LifecycleSignal {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			LifecycleSignal::EnteringBackground => write!(f, "entering_background"),
			LifecycleSignal::BecomingActive => write!(f, "becoming_active"),
			LifecycleSignal::Terminating => write!(f, "terminating"),
		}
	}
}
