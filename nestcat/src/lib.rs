mod array;
mod attributes;
mod codec;
mod concat;
mod config;
mod dataset;
mod duplicates;
mod emptiness;
mod errors;
mod extio;
mod flatten;
mod history;
mod inputs;
mod paths;
mod regroup;
mod stitch;

#[cfg(test)]
mod testing;

pub use array::ArrayData;
pub use array::DType;
pub use array::Value;

pub use attributes::AttrValue;
pub use attributes::Attributes;

pub use codec::copy_atomically;
pub use codec::open;
pub use codec::persist;
pub use codec::Codec;
pub use codec::Format;
pub use codec::NETCDF_EXTENSIONS;
pub use codec::SNAPSHOT_EXTENSION;

pub use concat::combine_attributes;
pub use concat::combine_by_coords;
pub use concat::concat;
pub use concat::CombineAttrs;
pub use concat::Compat;
pub use concat::ConcatMethod;
pub use concat::ConcatOptions;
pub use concat::Join;

pub use config::validate_concat_method_and_dim;
pub use config::Config;

pub use dataset::Container;
pub use dataset::Dimension;
pub use dataset::Encoding;
pub use dataset::Group;
pub use dataset::Variable;

pub use duplicates::resolve as resolve_duplicate_dimensions;
pub use duplicates::DimensionClone;

pub use emptiness::classify;
pub use emptiness::filter_workable;
pub use emptiness::is_empty;
pub use emptiness::variable_is_empty;
pub use emptiness::Workability;

pub use errors::Error;
pub use errors::Result;

pub use flatten::FlatTree;
pub use flatten::Flattened;
pub use flatten::Flattener;
pub use flatten::GroupMeta;

pub use history::collect_history;
pub use history::retrieve_history;
pub use history::HistoryRecord;
pub use history::HISTORY_ATTRIBUTE;

pub use inputs::add_label_to_path;
pub use inputs::resolve_input_paths;
pub use inputs::validate_output_path;

pub use paths::rename_coordinate;
pub use paths::PathCodec;
pub use paths::DEFAULT_COORDINATE_DELIMITER;
pub use paths::DEFAULT_GROUP_DELIMITER;

pub use regroup::chunk_sizes;
pub use regroup::storage_plan;
pub use regroup::Regrouper;

pub use stitch::Stitcher;
