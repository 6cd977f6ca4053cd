pub mod escape;
pub mod locator;
pub mod parse;
pub mod runner;
pub mod service;
