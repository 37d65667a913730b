mod if_expression;
mod label_filter;
mod relabel;
mod relabel_config;
#[cfg(test)]
mod relabel_tests;
mod utils;

pub use if_expression::*;
pub use label_filter::*;
pub use relabel::*;
pub use relabel_config::*;
