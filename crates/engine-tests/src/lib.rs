#![allow(dead_code)]

pub mod trigger;
pub mod utils;
