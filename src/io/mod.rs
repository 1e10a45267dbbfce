//! I/O modules for gridded sources, stage containers and exported point files

pub mod source;
pub mod netcdf;
pub mod container;
pub mod geojson;
pub mod metadata;

pub use source::{GriddedReader, MemoryReader, SourceField, VariableInfo};
pub use netcdf::{decode_time, NetcdfReader};
pub use container::{ArchiveReader, ArchiveWriter};
pub use geojson::{GeoJsonExporter, PointCollection, PointFeature};
pub use metadata::ExportMetadata;
