pub mod label_compressor;
pub mod labels;
pub mod regex_util;
pub mod time;
pub mod types;

pub use time::*;
pub use types::METRIC_NAME_LABEL;
