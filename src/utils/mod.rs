//! Shared utility functions

pub mod phone;

pub use phone::{PhoneNumberError, normalize_e164};
