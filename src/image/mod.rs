//! Sensor line data model and preprocessing.

pub mod line;
pub mod preprocessor;

pub use line::{DmxZoneMeans, ImageLine, PreprocessedLine};
pub use preprocessor::ImagePreprocessor;
