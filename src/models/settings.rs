// src/models/settings.rs

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Setting key holding the limited-time quiz duration, in seconds.
pub const TIME_LIMIT_KEY: &str = "time_limit";

/// A named quiz setting. Values are stored as text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct Setting {
    #[validate(length(min = 1, max = 64))]
    pub name: String,
    #[validate(length(max = 256))]
    pub value: String,
}
