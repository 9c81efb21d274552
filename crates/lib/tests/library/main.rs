mod common;
mod evaluation_tests;
mod resolver_tests;
