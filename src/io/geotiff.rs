//! GeoTIFF export of result rasters and land-cover import (feature `gdal`).
//!
//! Result rasters use NaN as no data. Band order and descriptions are fixed:
//! trend rasters carry the slope at the reporting cadence then the intercept;
//! distribution rasters carry `Mean`, `StdDev`, `Lower_95`, `Upper_95`.

use std::path::Path;

use gdal::raster::Buffer;
use gdal::spatial_ref::SpatialRef;
use gdal::{Dataset, DriverManager, Metadata};
use ndarray::Array2;

use crate::types::{
    DistributionRaster, EviError, EviResult, GeoTransform, LandCoverMap, ReportingCadence, TrendRaster,
};

/// Land-cover value treated as no data when the file declares none
const LAND_COVER_FILL: f64 = 255.0;

fn create_f64<P: AsRef<Path>>(
    path: P,
    shape: (usize, usize),
    bands: usize,
    transform: &GeoTransform,
    epsg: u32,
) -> EviResult<Dataset> {
    let (height, width) = shape;
    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let mut dataset =
        driver.create_with_band_type::<f64, _>(path.as_ref(), width as isize, height as isize, bands as isize)?;
    dataset.set_geo_transform(&transform.to_gdal())?;
    dataset.set_spatial_ref(&SpatialRef::from_epsg(epsg)?)?;
    Ok(dataset)
}

fn write_band(dataset: &Dataset, index: usize, name: &str, band: &Array2<f64>) -> EviResult<()> {
    let (height, width) = band.dim();
    let mut rasterband = dataset.rasterband(index as isize)?;
    let buffer = Buffer::new((width, height), band.iter().copied().collect());
    rasterband.write((0, 0), (width, height), &buffer)?;
    rasterband.set_no_data_value(Some(f64::NAN))?;
    rasterband.set_description(name)?;
    Ok(())
}

/// Slope (band 1, at `cadence`) and intercept (band 2)
pub fn write_trend_geotiff<P: AsRef<Path>>(
    path: P,
    raster: &TrendRaster,
    cadence: ReportingCadence,
    epsg: u32,
) -> EviResult<()> {
    log::info!("Saving trend raster as GeoTIFF: {}", path.as_ref().display());
    let dataset = create_f64(path.as_ref(), raster.shape(), 2, &raster.transform, epsg)?;
    let slope = raster.data.map(|t| t.map_or(f64::NAN, |t| t.slope_at(cadence)));
    let intercept = raster.data.map(|t| t.map_or(f64::NAN, |t| t.intercept));
    write_band(&dataset, 1, &cadence.slope_column(), &slope)?;
    write_band(&dataset, 2, "intercept", &intercept)?;
    Ok(())
}

/// Four-band `Mean`, `StdDev`, `Lower_95`, `Upper_95`
pub fn write_distribution_geotiff<P: AsRef<Path>>(path: P, raster: &DistributionRaster, epsg: u32) -> EviResult<()> {
    log::info!("Saving distribution raster as GeoTIFF: {}", path.as_ref().display());
    let dataset = create_f64(path.as_ref(), raster.shape(), 4, &raster.transform, epsg)?;
    let bands: [(&str, fn(&crate::types::DistributionResult) -> f64); 4] = [
        ("Mean", |d| d.mean),
        ("StdDev", |d| d.std_dev),
        ("Lower_95", |d| d.lower_95),
        ("Upper_95", |d| d.upper_95),
    ];
    for (i, (name, field)) in bands.iter().enumerate() {
        let band = raster.data.map(|d| d.as_ref().map_or(f64::NAN, field));
        write_band(&dataset, i + 1, name, &band)?;
    }
    Ok(())
}

/// Allow mask as a single byte band (1 allowed, 0 excluded)
pub fn write_mask_geotiff<P: AsRef<Path>>(
    path: P,
    mask: &Array2<bool>,
    transform: &GeoTransform,
    epsg: u32,
) -> EviResult<()> {
    log::info!("Saving land-cover mask as GeoTIFF: {}", path.as_ref().display());
    let (height, width) = mask.dim();
    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let mut dataset =
        driver.create_with_band_type::<u8, _>(path.as_ref(), width as isize, height as isize, 1)?;
    dataset.set_geo_transform(&transform.to_gdal())?;
    dataset.set_spatial_ref(&SpatialRef::from_epsg(epsg)?)?;

    let mut rasterband = dataset.rasterband(1)?;
    let flat: Vec<u8> = mask.iter().map(|&m| u8::from(m)).collect();
    rasterband.write((0, 0), (width, height), &Buffer::new((width, height), flat))?;
    rasterband.set_description("allow_mask")?;
    Ok(())
}

/// Read band 1 of a categorical land-cover raster. Values outside 0..=254,
/// the declared no-data value and fill value 255 become no data.
pub fn read_land_cover_geotiff<P: AsRef<Path>>(path: P) -> EviResult<(LandCoverMap, GeoTransform)> {
    log::info!("Reading land cover from: {}", path.as_ref().display());
    let dataset = Dataset::open(path.as_ref())?;
    let transform = GeoTransform::from_gdal(dataset.geo_transform()?);
    let (width, height) = dataset.raster_size();
    log::debug!("Land-cover size: {}x{}", width, height);

    let rasterband = dataset.rasterband(1)?;
    let nodata = rasterband.no_data_value().unwrap_or(LAND_COVER_FILL);
    let buffer = rasterband.read_as::<f64>((0, 0), (width, height), (width, height), None)?;
    let classes: Vec<Option<u8>> = buffer
        .data
        .into_iter()
        .map(|v| {
            if v == nodata || !(0.0..LAND_COVER_FILL).contains(&v) || v.fract() != 0.0 {
                None
            } else {
                Some(v as u8)
            }
        })
        .collect();
    let classes = Array2::from_shape_vec((height, width), classes)
        .map_err(|e| EviError::UpstreamData(format!("Failed to reshape land cover: {}", e)))?;
    Ok((LandCoverMap::new(classes), transform))
}
