//! Model module: the selectable classifier networks
//!
//! The networks are black boxes to the rest of the crate: an image batch
//! goes in, one row of class scores per image comes out.
//!
//! - `cnn`: four convolutional blocks and a two-layer head
//! - `cnn_lite`: three narrower blocks, faster on CPU

pub mod checkpoint;
pub mod cnn;

use std::fmt;
use std::str::FromStr;

use crate::utils::error::PredictError;

pub use checkpoint::{latest_checkpoint, load_network};
pub use cnn::{ClassifierConfig, CnnClassifier, CnnLiteClassifier, ConvBlock, Network};

/// Network identifier accepted by the `net` option
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Net {
    Cnn,
    CnnLite,
}

impl Net {
    pub fn as_str(&self) -> &'static str {
        match self {
            Net::Cnn => "cnn",
            Net::CnnLite => "cnn_lite",
        }
    }
}

impl fmt::Display for Net {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Net {
    type Err = PredictError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cnn" => Ok(Net::Cnn),
            "cnn_lite" | "cnn-lite" => Ok(Net::CnnLite),
            other => Err(PredictError::Config(format!(
                "Unknown network '{other}' (expected 'cnn' or 'cnn_lite')"
            ))),
        }
    }
}
