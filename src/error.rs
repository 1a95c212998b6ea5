use thiserror::Error;

/// Errors produced while detecting, describing or matching features.
#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown detector type `{0}`")]
    UnknownDetector(String),
    #[error("unknown descriptor type `{0}`")]
    UnknownDescriptor(String),
    #[error("unknown descriptor family `{0}`")]
    UnknownDescriptorKind(String),
    #[error("unknown matcher type `{0}`")]
    UnknownMatcher(String),
    #[error("unknown selector type `{0}`")]
    UnknownSelector(String),
    #[error(
        "{descriptor} descriptors can only be computed for keypoints found by the {descriptor} \
         detector"
    )]
    IncompatibleKeypoints { descriptor: &'static str },
    #[error("the hamming norm can only be used with binary descriptors")]
    HammingRequiresBinary,
    #[error("descriptor widths differ: query has {query}, train has {train}")]
    DimensionMismatch { query: usize, train: usize },
    #[error("cross-checked matching only supports a single neighbor, but {0} were requested")]
    CrossCheckNeighbors(usize),
    #[error("the input image is empty")]
    EmptyImage,
}

pub type Result<T> = std::result::Result<T, Error>;
