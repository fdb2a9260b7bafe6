//! Data structures shared by the nanokern kernel crates.

#![no_std]
#![deny(missing_docs)]

extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod ring;
pub mod wait_list;
