//! Per-(pin, site) value dumps.
//!
//! Line-oriented CSV with a `pin,site,value` header, one row per entry in pin then site
//! order. Used for artifacts such as saved trigger offsets that a later test program run
//! reloads.

use std::io::{Read, Write};
use std::path::Path;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::info;

use crate::addressing::SiteNumber;
use crate::data::PinSiteData;
use crate::error::{AppResult, AteError};

#[derive(Debug, Serialize, Deserialize)]
struct PinSiteRow<T> {
    pin: String,
    site: SiteNumber,
    value: T,
}

/// Write `pin,site,value` rows in pin then site order.
pub fn write_to<T, W>(data: &PinSiteData<T>, writer: W) -> AppResult<()>
where
    T: Serialize + Clone,
    W: Write,
{
    let mut writer = csv::Writer::from_writer(writer);
    for (pin, site, value) in data.iter() {
        writer.serialize(PinSiteRow {
            pin: pin.to_string(),
            site,
            value: value.clone(),
        })?;
    }
    writer.flush()?;
    Ok(())
}

/// Read a dump. A (pin, site) listed twice is rejected.
pub fn read_from<T, R>(reader: R) -> AppResult<PinSiteData<T>>
where
    T: DeserializeOwned,
    R: Read,
{
    let mut reader = csv::Reader::from_reader(reader);
    let mut data = PinSiteData::new();
    for row in reader.deserialize() {
        let row: PinSiteRow<T> = row?;
        if data.insert(&row.pin, row.site, row.value).is_some() {
            return Err(AteError::Configuration(format!(
                "Duplicate entry for pin '{}' on site {}",
                row.pin, row.site
            )));
        }
    }
    Ok(data)
}

/// Write a dump to `path`, creating parent directories.
pub fn save<T, P>(data: &PinSiteData<T>, path: P) -> AppResult<()>
where
    T: Serialize + Clone,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(path)?;
    write_to(data, file)?;
    info!(path = %path.display(), entries = data.len(), "Saved pin/site values");
    Ok(())
}

/// Read a dump from `path`.
pub fn load<T, P>(path: P) -> AppResult<PinSiteData<T>>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let file = std::fs::File::open(path.as_ref())?;
    read_from(file)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dump_has_header_and_sorted_rows() {
        let mut data = PinSiteData::new();
        data.insert("VDD", 1, 0.25);
        data.insert("VCC", 0, 1.5);
        data.insert("VDD", 0, 0.5);

        let mut buffer = Vec::new();
        write_to(&data, &mut buffer).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert_eq!(text, "pin,site,value\nVCC,0,1.5\nVDD,0,0.5\nVDD,1,0.25\n");
    }

    #[test]
    fn saves_and_loads_through_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("offsets").join("trigger_offsets.csv");
        let data = PinSiteData::uniform(&["VDD", "VCC"], &[-1, 0, 1], 2.0e-6);

        save(&data, &path).unwrap();
        let loaded: PinSiteData<f64> = load(&path).unwrap();
        assert_eq!(loaded, data);
    }

    #[test]
    fn duplicate_rows_are_rejected() {
        let text = "pin,site,value\nVDD,0,1.0\nVDD,0,2.0\n";
        let result: AppResult<PinSiteData<f64>> = read_from(text.as_bytes());
        assert!(matches!(result, Err(AteError::Configuration(_))));
    }

    #[test]
    fn malformed_rows_surface_csv_errors() {
        let text = "pin,site,value\nVDD,zero,1.0\n";
        let result: AppResult<PinSiteData<f64>> = read_from(text.as_bytes());
        assert!(matches!(result, Err(AteError::Csv(_))));
    }
}
