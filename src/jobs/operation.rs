use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Compute operations forwarded to the external tool. Each one is exposed as
/// `POST /<name>` and invoked as the tool subcommand of the same name.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Infer,
    BatchInfer,
    Tts,
    Preprocess,
    Extract,
    Train,
    Index,
    ModelInformation,
    ModelFusion,
    Download,
}

impl Operation {
    pub const ALL: [Operation; 10] = [
        Operation::Infer,
        Operation::BatchInfer,
        Operation::Tts,
        Operation::Preprocess,
        Operation::Extract,
        Operation::Train,
        Operation::Index,
        Operation::ModelInformation,
        Operation::ModelFusion,
        Operation::Download,
    ];

    #[must_use]
    pub fn subcommand(&self) -> &'static str {
        match self {
            Operation::Infer => "infer",
            Operation::BatchInfer => "batch_infer",
            Operation::Tts => "tts",
            Operation::Preprocess => "preprocess",
            Operation::Extract => "extract",
            Operation::Train => "train",
            Operation::Index => "index",
            Operation::ModelInformation => "model_information",
            Operation::ModelFusion => "model_fusion",
            Operation::Download => "download",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.subcommand())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownOperation(pub String);

impl fmt::Display for UnknownOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown operation {:?}", self.0)
    }
}

impl FromStr for Operation {
    type Err = UnknownOperation;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .into_iter()
            .find(|operation| operation.subcommand() == value)
            .ok_or_else(|| UnknownOperation(value.to_string()))
    }
}
