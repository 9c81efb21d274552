mod common;
mod repositories_tests;
mod resolve_tests;
