#[path = "../support/mod.rs"]
mod support;

mod runner;
mod source;
