//! CLI Commands

pub mod account;
pub mod compare;
pub mod diff;
pub mod observation;
