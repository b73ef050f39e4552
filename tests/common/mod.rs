#![allow(dead_code)]

pub use datapipe_test_utils::{init_tracing, with_timeout};
