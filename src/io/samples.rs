//! Sample table export and scattered-point import.

use std::io::{Read, Write};
use std::path::Path;

use serde::Deserialize;

use crate::core::interpolation::ScatterPoint;
use crate::core::sampler::SampleSet;
use crate::types::{EviError, EviResult};

/// Write samples as `pixel_row,pixel_col[,latitude,longitude],<columns>`.
/// Geometry columns are present when any sample carries a location.
pub fn write_samples_csv<P: AsRef<Path>>(path: P, samples: &SampleSet) -> EviResult<()> {
    log::info!("Writing {} samples to {}", samples.len(), path.as_ref().display());
    let file = std::fs::File::create(path.as_ref())?;
    write_samples(file, samples)
}

pub fn write_samples<W: Write>(writer: W, samples: &SampleSet) -> EviResult<()> {
    let with_geometry = samples.samples.iter().any(|s| s.location.is_some());
    let mut csv_writer = csv::Writer::from_writer(writer);

    let mut header = vec!["pixel_row".to_string(), "pixel_col".to_string()];
    if with_geometry {
        header.push("latitude".to_string());
        header.push("longitude".to_string());
    }
    header.extend(samples.columns.iter().cloned());
    csv_writer.write_record(&header)?;

    for s in &samples.samples {
        let mut row = vec![s.pixel.row.to_string(), s.pixel.col.to_string()];
        if with_geometry {
            match s.location {
                Some(p) => {
                    row.push(p.latitude.to_string());
                    row.push(p.longitude.to_string());
                }
                None => row.extend([String::new(), String::new()]),
            }
        }
        row.extend(s.values.iter().map(|v| v.to_string()));
        csv_writer.write_record(&row)?;
    }
    csv_writer.flush()?;
    Ok(())
}

/// Points parsed from a sample table plus the number of rows discarded
#[derive(Debug, Clone, PartialEq)]
pub struct ScatterLoad {
    pub points: Vec<ScatterPoint>,
    pub dropped: usize,
}

#[derive(Debug, Deserialize)]
struct GeoJsonPoint {
    #[serde(rename = "type")]
    kind: String,
    coordinates: Vec<f64>,
}

enum Geometry {
    Columns { lat: usize, lon: usize },
    GeoJson(usize),
}

pub fn read_scatter_csv<P: AsRef<Path>>(path: P, value_column: &str) -> EviResult<ScatterLoad> {
    log::info!("Reading scattered samples ('{}') from {}", value_column, path.as_ref().display());
    let file = std::fs::File::open(path.as_ref())?;
    read_scatter(file, value_column)
}

/// Read `(lon, lat, value)` points from either `latitude`/`longitude`
/// columns or a `.geo` GeoJSON Point column.
///
/// Rows with a missing or unparseable coordinate or value are dropped and
/// counted. A table where every row is malformed is an `UpstreamData` error.
pub fn read_scatter<R: Read>(reader: R, value_column: &str) -> EviResult<ScatterLoad> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    let headers = csv_reader.headers()?.clone();
    let find = |names: &[&str]| headers.iter().position(|h| names.iter().any(|n| h.eq_ignore_ascii_case(n)));

    let value_idx = headers.iter().position(|h| h == value_column).ok_or_else(|| {
        EviError::InvalidConfiguration(format!("no column '{}' in sample table", value_column))
    })?;
    let geometry = match (find(&["latitude", "lat"]), find(&["longitude", "lon"]), find(&[".geo"])) {
        (Some(lat), Some(lon), _) => Geometry::Columns { lat, lon },
        (_, _, Some(geo)) => Geometry::GeoJson(geo),
        _ => {
            return Err(EviError::InvalidConfiguration(
                "sample table has neither latitude/longitude nor .geo columns".to_string(),
            ))
        }
    };

    let mut points = Vec::new();
    let mut dropped = 0usize;
    for (i, result) in csv_reader.records().enumerate() {
        let parsed = result.map_err(EviError::from).and_then(|record| {
            let value = parse_field(&record, value_idx)?;
            let (lon, lat) = match &geometry {
                Geometry::Columns { lat, lon } => (parse_field(&record, *lon)?, parse_field(&record, *lat)?),
                Geometry::GeoJson(idx) => parse_geojson_point(record.get(*idx).unwrap_or(""))?,
            };
            Ok(ScatterPoint::new(lon, lat, value))
        });
        match parsed {
            Ok(point) => points.push(point),
            Err(e) => {
                log::debug!("Dropping sample row {}: {}", i + 2, e);
                dropped += 1;
            }
        }
    }

    if dropped > 0 {
        log::warn!("Dropped {} malformed sample rows, kept {}", dropped, points.len());
    }
    if points.is_empty() && dropped > 0 {
        return Err(EviError::UpstreamData(format!("all {} sample rows are malformed", dropped)));
    }
    Ok(ScatterLoad { points, dropped })
}

fn parse_field(record: &csv::StringRecord, idx: usize) -> EviResult<f64> {
    let text = record
        .get(idx)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| EviError::UpstreamData(format!("missing field {}", idx)))?;
    let v: f64 = text
        .parse()
        .map_err(|_| EviError::UpstreamData(format!("unparseable number '{}'", text)))?;
    if v.is_finite() {
        Ok(v)
    } else {
        Err(EviError::UpstreamData(format!("non-finite number '{}'", text)))
    }
}

/// `{"type":"Point","coordinates":[lon,lat]}` to (lon, lat)
fn parse_geojson_point(text: &str) -> EviResult<(f64, f64)> {
    let point: GeoJsonPoint = serde_json::from_str(text)?;
    if point.kind != "Point" {
        return Err(EviError::UpstreamData(format!("expected a Point geometry, got {}", point.kind)));
    }
    match point.coordinates.as_slice() {
        [lon, lat, ..] if lon.is_finite() && lat.is_finite() => Ok((*lon, *lat)),
        _ => Err(EviError::UpstreamData("point needs two finite coordinates".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sampler::Sample;
    use crate::types::{GeoPoint, PixelId};

    #[test]
    fn test_written_table_reads_back_as_points() {
        let set = SampleSet {
            columns: vec!["slope_per_decade".to_string(), "intercept".to_string()],
            samples: vec![
                Sample { pixel: PixelId::new(1, 2), location: Some(GeoPoint::new(75.5, 26.9)), values: vec![0.02, 0.3] },
                Sample { pixel: PixelId::new(3, 4), location: Some(GeoPoint::new(75.6, 26.8)), values: vec![-0.01, 0.25] },
            ],
        };
        let mut buffer = Vec::new();
        write_samples(&mut buffer, &set).unwrap();
        let text = String::from_utf8(buffer.clone()).unwrap();
        assert!(text.starts_with("pixel_row,pixel_col,latitude,longitude,slope_per_decade,intercept\n"));

        let load = read_scatter(buffer.as_slice(), "slope_per_decade").unwrap();
        assert_eq!(load.dropped, 0);
        assert_eq!(load.points[0], ScatterPoint::new(75.5, 26.9, 0.02));
        assert_eq!(load.points[1].value, -0.01);
    }

    #[test]
    fn test_geojson_column_and_malformed_rows() {
        let data = "system:index,Mean,.geo\n\
                    0,0.31,\"{\"\"type\"\":\"\"Point\"\",\"\"coordinates\"\":[75.1,26.5]}\"\n\
                    1,0.40,not json\n\
                    2,,\"{\"\"type\"\":\"\"Point\"\",\"\"coordinates\"\":[75.2,26.6]}\"\n\
                    3,0.35,\"{\"\"type\"\":\"\"Point\"\",\"\"coordinates\"\":[75.3,26.7]}\"\n";
        let load = read_scatter(data.as_bytes(), "Mean").unwrap();
        assert_eq!(load.dropped, 2);
        assert_eq!(load.points.len(), 2);
        assert_eq!(load.points[0], ScatterPoint::new(75.1, 26.5, 0.31));
    }

    #[test]
    fn test_all_rows_malformed_is_an_error() {
        let data = "latitude,longitude,v\nx,1,2\n3,,4\n";
        assert!(matches!(read_scatter(data.as_bytes(), "v"), Err(EviError::UpstreamData(_))));
    }

    #[test]
    fn test_missing_columns() {
        let data = "latitude,longitude,v\n1,2,3\n";
        assert!(matches!(read_scatter(data.as_bytes(), "w"), Err(EviError::InvalidConfiguration(_))));
        let data = "x,y,v\n1,2,3\n";
        assert!(matches!(read_scatter(data.as_bytes(), "v"), Err(EviError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_empty_table_is_not_an_error() {
        let load = read_scatter("latitude,longitude,v\n".as_bytes(), "v").unwrap();
        assert!(load.points.is_empty());
        assert_eq!(load.dropped, 0);
    }
}
