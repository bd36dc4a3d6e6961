pub mod cache;
pub mod clock;
pub mod test_utils;
