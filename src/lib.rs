//! Welcome bot — guided onboarding for new Discord community members.

pub mod config;
pub mod error;
pub mod gateway;
pub mod identity;
pub mod karma;
pub mod marketing;
pub mod onboarding;
pub mod poll;
pub mod store;
