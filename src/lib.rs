#![no_std]
#[cfg(feature = "std")]
extern crate std;


pub mod record;
#[cfg(feature = "master")]
pub mod master;
