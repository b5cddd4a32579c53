use std::io;
use std::path::PathBuf;
use std::result;

use thiserror::Error;

use crate::array::DType;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    IO(#[from] io::Error),

    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[cfg(feature = "netcdf")]
    #[error("netCDF error: {0}")]
    NetCdf(#[from] netcdf::error::Error),

    #[error("files_to_concat cannot be empty")]
    NoInputFiles,

    #[error("input path '{}' is not a valid file or directory", .0.display())]
    BadInputPath(PathBuf),

    #[error("output path '{}' is a directory; please specify a file path", .0.display())]
    OutputIsDirectory(PathBuf),

    #[error("file already exists at '{}'; set overwrite to replace it", .0.display())]
    OutputExists(PathBuf),

    #[error(
        "unexpected concatenation method '{0}'; supported methods are axis-concat and coordinate-combine"
    )]
    BadConcatMethod(String),

    #[error(
        "concat_dim is required when using the 'axis-concat' method; specify a concat_dim or use 'coordinate-combine'"
    )]
    MissingConcatDim,

    #[error("unknown option '{0}'")]
    UnknownOption(String),

    #[error("invalid value for option '{name}': {reason}")]
    BadOption { name: String, reason: String },

    #[error("unrecognized container format for '{}'", .0.display())]
    UnknownFormat(PathBuf),

    #[error("support for {0} containers was not compiled in")]
    FormatUnavailable(&'static str),

    #[error("corrupt container: {0}")]
    Corrupt(String),

    #[error("unsupported data type: {0}")]
    UnsupportedType(String),

    #[error(
        "file {index} ({}) has mismatched groups; expected {expected:?}, found {found:?}, differing paths {differences:?}",
        .file.display()
    )]
    MismatchedStructure {
        index: usize,
        file: PathBuf,
        expected: Vec<String>,
        found: Vec<String>,
        differences: Vec<String>,
    },

    #[error("'{first}' and '{second}' both flatten to '{name}'")]
    NameCollision {
        name: String,
        first: String,
        second: String,
    },

    #[error("'{path}' cannot be flattened reversibly with group delimiter '{delimiter}'")]
    IrreversibleName { path: String, delimiter: String },

    #[error("name '{0}' is already defined in this group")]
    DuplicateName(String),

    #[error("variable '{variable}' references unknown dimension '{dimension}'")]
    UnknownDimension { variable: String, dimension: String },

    #[error("variable '{variable}' would see dimension '{dimension}' shadowed by group '{group}'")]
    ShadowedDimension {
        variable: String,
        dimension: String,
        group: String,
    },

    #[error("variable '{variable}' has data of rank {rank} but {dimensions} dimensions")]
    RankMismatch {
        variable: String,
        rank: usize,
        dimensions: usize,
    },

    #[error(
        "variable '{variable}' repeats dimensions {dimensions:?}; only a single repeated pair can be repaired"
    )]
    UnsupportedDuplicateDimensions {
        variable: String,
        dimensions: Vec<String>,
    },

    #[error("cannot extract a sorting value from '{variable}' in {}", .file.display())]
    MissingSortVariable { variable: String, file: PathBuf },

    #[error("'{0}' is not present in all datasets")]
    NotInAllDatasets(String),

    #[error("dimension '{dimension}' has inconsistent sizes {sizes:?}")]
    DimensionMismatch { dimension: String, sizes: Vec<usize> },

    #[error("conflicting values: {0}")]
    Conflict(String),

    #[error("expected {expected} data, found {found}")]
    DTypeMismatch { expected: DType, found: DType },

    #[error("cannot combine datasets: {0}")]
    CannotCombine(String),

    #[error("no datasets to concatenate")]
    NothingToConcatenate,

    #[error("variable '{name}': {source}")]
    InVariable {
        name: String,
        #[source]
        source: Box<Error>,
    },

    #[error("group '{path}': {source}")]
    InGroup {
        path: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub(crate) fn in_variable<S: Into<String>>(name: S) -> impl FnOnce(Error) -> Error {
        let name = name.into();
        move |source| Error::InVariable {
            name,
            source: Box::new(source),
        }
    }

    pub(crate) fn in_group<S: Into<String>>(path: S) -> impl FnOnce(Error) -> Error {
        let path = path.into();
        move |source| Error::InGroup {
            path,
            source: Box::new(source),
        }
    }
}

pub type Result<T> = result::Result<T, Error>;
