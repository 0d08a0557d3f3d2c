#![doc = include_str!("../README.md")]
#![deny(missing_docs)]
pub extern crate bitcoin;

pub mod actuator;
pub mod chain;
pub mod coordinator;
pub mod error;
pub mod ledger;
pub mod protocol;
pub mod utill;
