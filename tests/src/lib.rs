//! Corner-based design integration tests.

#[cfg(test)]
pub mod design;
#[cfg(test)]
pub mod dispatch;
pub mod paths;
#[cfg(test)]
pub mod problem;
pub mod shared;
