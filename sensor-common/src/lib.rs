pub mod dead_letter;
pub mod metrics;
pub mod normalizer;
pub mod reading;
pub mod store;
pub mod test_utils;
pub mod time;
pub mod validator;
