#![allow(dead_code)]

mod registry;

pub use registry::{StaticProvider, create_test_store, follow};
