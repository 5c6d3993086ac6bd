//! Long-format CSV readers for observation stacks and land-cover grids.
//!
//! Observations: `row,col,timestamp,value,quality`, where `value` is the raw
//! integer-encoded index and `timestamp` is RFC 3339 or `YYYY-MM-DD` (UTC
//! midnight). Land cover: `row,col,class`, with an empty class meaning no data.

use std::io::Read;
use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use ndarray::Array2;
use serde::Deserialize;

use crate::types::{
    EviError, EviResult, GeoTransform, LandCoverMap, Observation, PixelId, TimeSeriesStack,
};

#[derive(Debug, Deserialize)]
struct ObservationRecord {
    row: usize,
    col: usize,
    timestamp: String,
    value: i32,
    quality: u8,
}

#[derive(Debug, Deserialize)]
struct LandCoverRecord {
    row: usize,
    col: usize,
    class: Option<u8>,
}

pub fn parse_timestamp(text: &str) -> EviResult<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(text) {
        return Ok(t.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| EviError::UpstreamData(format!("unparseable timestamp '{}'", text)))
}

/// Observation stack parsed from a table plus the number of rows discarded
#[derive(Debug, Clone)]
pub struct ObservationLoad {
    pub stack: TimeSeriesStack,
    pub dropped: usize,
}

/// Land-cover grid parsed from a table plus the number of rows discarded
#[derive(Debug, Clone)]
pub struct LandCoverLoad {
    pub map: LandCoverMap,
    pub dropped: usize,
}

/// Read an observation stack for a grid of the given shape
pub fn read_observations_csv<P: AsRef<Path>>(
    path: P,
    shape: (usize, usize),
    transform: GeoTransform,
) -> EviResult<ObservationLoad> {
    log::info!("Reading observations from: {}", path.as_ref().display());
    let file = std::fs::File::open(path.as_ref())?;
    read_observations(file, shape, transform)
}

/// Observation reader over any byte source.
///
/// Rows that fail to parse (bad timestamp, non-integer value, a quality
/// code outside 0..=255 such as a `-1` fill) are dropped and counted; a
/// table where every row is malformed is an `UpstreamData` error.
/// Quality-flagged rows are kept for the masker. Duplicate timestamps and
/// pixels outside the grid still fail the whole stack.
pub fn read_observations<R: Read>(
    reader: R,
    shape: (usize, usize),
    transform: GeoTransform,
) -> EviResult<ObservationLoad> {
    let mut csv_reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut records = Vec::new();
    let mut dropped = 0usize;
    for (i, result) in csv_reader.deserialize::<ObservationRecord>().enumerate() {
        let parsed = result.map_err(EviError::from).and_then(|rec| {
            let timestamp = parse_timestamp(&rec.timestamp)?;
            Ok((PixelId::new(rec.row, rec.col), Observation::new(timestamp, rec.value, rec.quality)))
        });
        match parsed {
            Ok(record) => records.push(record),
            Err(e) => {
                log::debug!("Dropping observation line {}: {}", i + 2, e);
                dropped += 1;
            }
        }
    }
    check_dropped("observation", records.len(), dropped)?;
    log::debug!("Parsed {} observation records", records.len());

    let stack = TimeSeriesStack::from_records(shape, transform, records)?;
    log::info!(
        "Loaded {} observations for {}x{} pixels",
        stack.observation_count(),
        shape.0,
        shape.1
    );
    Ok(ObservationLoad { stack, dropped })
}

pub fn read_land_cover_csv<P: AsRef<Path>>(path: P, shape: (usize, usize)) -> EviResult<LandCoverLoad> {
    log::info!("Reading land cover from: {}", path.as_ref().display());
    let file = std::fs::File::open(path.as_ref())?;
    read_land_cover(file, shape)
}

/// Pixels not listed have no class. Unparseable rows are dropped and
/// counted; a pixel outside the grid is an error.
pub fn read_land_cover<R: Read>(reader: R, shape: (usize, usize)) -> EviResult<LandCoverLoad> {
    let mut csv_reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut classes = Array2::from_elem(shape, None);
    let (mut kept, mut dropped) = (0usize, 0usize);
    for (i, result) in csv_reader.deserialize::<LandCoverRecord>().enumerate() {
        let rec = match result {
            Ok(rec) => rec,
            Err(e) => {
                log::debug!("Dropping land-cover line {}: {}", i + 2, e);
                dropped += 1;
                continue;
            }
        };
        let cell = classes.get_mut((rec.row, rec.col)).ok_or_else(|| {
            EviError::UpstreamData(format!(
                "land-cover pixel ({}, {}) outside {}x{} grid",
                rec.row, rec.col, shape.0, shape.1
            ))
        })?;
        *cell = rec.class;
        kept += 1;
    }
    check_dropped("land-cover", kept, dropped)?;
    Ok(LandCoverLoad { map: LandCoverMap::new(classes), dropped })
}

fn check_dropped(table: &str, kept: usize, dropped: usize) -> EviResult<()> {
    if dropped == 0 {
        return Ok(());
    }
    if kept == 0 {
        return Err(EviError::UpstreamData(format!("all {} {} rows are malformed", dropped, table)));
    }
    log::warn!("Dropped {} malformed {} rows, kept {}", dropped, table, kept);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_timestamp_formats() {
        let t = parse_timestamp("2010-03-06").unwrap();
        assert_eq!((t.year(), t.month(), t.day(), t.hour()), (2010, 3, 6, 0));
        let t = parse_timestamp("2010-03-06T12:00:00+02:00").unwrap();
        assert_eq!(t.hour(), 10);
        assert!(parse_timestamp("06/03/2010").is_err());
    }

    #[test]
    fn test_read_observations() {
        let data = "row,col,timestamp,value,quality\n\
                    0,1,2011-01-01,3500,0\n\
                    0,1,2010-01-01,3000,1\n\
                    0,0,2010-01-01,-3000,3\n";
        let load = read_observations(data.as_bytes(), (1, 2), GeoTransform::default()).unwrap();
        assert_eq!(load.dropped, 0);
        assert_eq!(load.stack.observation_count(), 3);
        assert_eq!(load.stack.observations(1)[0].raw_value, 3000);
        assert_eq!(load.stack.observations(0)[0].quality, 3);
    }

    #[test]
    fn test_malformed_observation_rows_are_dropped() {
        let data = "row,col,timestamp,value,quality\n\
                    0,0,2010-01-01,3000,0\n\
                    0,0,garbage,3100,0\n\
                    0,0,2011-01-01,abc,0\n\
                    0,0,2012-01-01,3200,-1\n\
                    0,0,2013-01-01,3300,1\n";
        let load = read_observations(data.as_bytes(), (1, 1), GeoTransform::default()).unwrap();
        assert_eq!(load.dropped, 3);
        assert_eq!(load.stack.observation_count(), 2);
        assert_eq!(load.stack.observations(0)[1].raw_value, 3300);
    }

    #[test]
    fn test_all_rows_malformed_is_an_error() {
        let data = "row,col,timestamp,value,quality\n0,0,garbage,3000,0\n0,0,2010-01-01,abc,0\n";
        let err = read_observations(data.as_bytes(), (1, 1), GeoTransform::default()).unwrap_err();
        let msg = err.to_string();
        assert!(matches!(err, EviError::UpstreamData(_)));
        assert!(msg.contains("all 2 observation rows"));
        assert_eq!(msg.matches("Upstream data error").count(), 1);
    }

    #[test]
    fn test_read_land_cover() {
        let data = "row,col,class\n0,0,12\n0,1,\n1,1,14\nx,0,12\n";
        let load = read_land_cover(data.as_bytes(), (2, 2)).unwrap();
        assert_eq!(load.dropped, 1);
        let map = load.map;
        assert_eq!(map.class_at(PixelId::new(0, 0)), Some(12));
        assert_eq!(map.class_at(PixelId::new(0, 1)), None);
        assert_eq!(map.class_at(PixelId::new(1, 0)), None);
        assert_eq!(map.class_at(PixelId::new(1, 1)), Some(14));

        let outside = "row,col,class\n5,0,12\n";
        assert!(read_land_cover(outside.as_bytes(), (2, 2)).is_err());
    }
}
