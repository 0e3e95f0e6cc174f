//! Drivers for the devices on the module under test.

pub mod as7265x;
