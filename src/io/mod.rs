//! I/O modules for observation tables, sample tables, render manifests and rasters

pub mod manifest;
pub mod observations;
pub mod samples;
#[cfg(feature = "gdal")]
pub mod geotiff;

pub use manifest::{ColorScale, ManifestLayer, RenderManifest};
pub use observations::{read_land_cover_csv, read_observations_csv, LandCoverLoad, ObservationLoad};
pub use samples::{read_scatter_csv, write_samples_csv, ScatterLoad};
#[cfg(feature = "gdal")]
pub use geotiff::{read_land_cover_geotiff, write_distribution_geotiff, write_mask_geotiff, write_trend_geotiff};
