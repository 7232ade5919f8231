// Aquaview - Water-quality telemetry core
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! CSV export of a window
//!
//! One row per data point under the header
//! `Time,Turbidity,TDS,Temperature`; absent fields are empty cells.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::error::ExportError;
use crate::protocol::SensorKind;
use crate::window::DataPoint;

/// Default file name for the short-horizon window
pub const SHORT_EXPORT_FILE: &str = "1_hour_data.csv";

/// Default file name for the long-horizon window
pub const LONG_EXPORT_FILE: &str = "24_hour_data.csv";

/// Write points as CSV to any writer
pub fn write_csv<'a, W, I>(writer: W, points: I) -> Result<(), ExportError>
where
    W: Write,
    I: IntoIterator<Item = &'a DataPoint>,
{
    let mut csv = csv::Writer::from_writer(writer);
    let header = std::iter::once("Time").chain(SensorKind::ALL.into_iter().map(|k| k.label()));
    csv.write_record(header)?;

    for point in points {
        let mut row = Vec::with_capacity(SensorKind::ALL.len() + 1);
        row.push(point.time.to_string());
        for kind in SensorKind::ALL {
            row.push(point.get(kind).map(|v| v.to_string()).unwrap_or_default());
        }
        csv.write_record(&row)?;
    }

    csv.flush()?;
    Ok(())
}

/// Render points as a CSV string
pub fn to_csv_string<'a, I>(points: I) -> Result<String, ExportError>
where
    I: IntoIterator<Item = &'a DataPoint>,
{
    let mut buf = Vec::new();
    write_csv(&mut buf, points)?;
    String::from_utf8(buf).map_err(|e| ExportError::Csv(e.to_string()))
}

/// Write points to a file, replacing it
pub fn export_to_file<'a, I>(path: impl AsRef<Path>, points: I) -> Result<(), ExportError>
where
    I: IntoIterator<Item = &'a DataPoint>,
{
    let file = File::create(path.as_ref())?;
    write_csv(file, points)?;
    log::debug!("exported window to {}", path.as_ref().display());
    Ok(())
}
