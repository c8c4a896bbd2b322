pub mod align;
pub mod asset;
pub mod calendar;
pub mod config;
pub mod data;
pub mod error;
pub mod feature;
pub mod label;
pub mod loader;
pub mod output;
pub mod pipeline;
pub mod quality;
pub mod returns;
pub mod series;
pub mod standardize;

pub use asset::{AssetClass, AssetRegistry};
pub use config::DesignMatrixConfig;
pub use data::{AssetSource, CsvAssetStore, MemorySource, RemoteSource};
pub use error::PipelineError;
pub use feature::FeatureSet;
pub use label::{Label, LabelSource, LabelSpec};
pub use pipeline::{DataRequest, DesignData, DesignMatrix, build_design_data};
pub use quality::{DataQualityWarning, Diagnostics, SampleRow};
pub use returns::{ReturnsMatrix, ReturnsMatrixOptions, build_returns_matrix};
pub use series::TimeSeries;
