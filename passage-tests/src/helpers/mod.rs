pub mod harness;
pub mod scripted_backend;
pub mod wait_utils;
