//! Client integration tests
//!
//! Drive a real client against the mock gateway over loopback HTTP/2.

mod delivery;
mod faults;
mod shutdown;
mod transport;
