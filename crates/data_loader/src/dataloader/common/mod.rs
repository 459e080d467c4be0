//! Common utilities shared by the worker and consumer sides of the loader.

pub mod thread;
