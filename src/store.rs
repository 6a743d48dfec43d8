//! Persistence: per-entity CSV files, label images and the filesystem
//! listings that drive incremental sync.
//!
//! All CSV writes are whole-file overwrites. A half-failed previous run can
//! therefore leave an entity's file absent or stale, but never corrupted by a
//! partial append. Files are UTF-8 with a byte-order mark so spreadsheet
//! tools pick up the multi-byte script correctly.

use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use crate::extract::RawRecord;
use crate::model::{permit_regt, CompanyNo, Crop, PesticideBasicInfo, PesticideRecordRow, Registration, UsageRange};
use crate::{Error, Result};

const BOM: &str = "\u{FEFF}";

/// Where and how much was written for one entity.
#[derive(Debug, Clone)]
pub struct ArtifactDescriptor {
    pub path: PathBuf,
    pub record_count: usize,
}

/// Reduces an entity identity to a filesystem-safe token: word characters,
/// hyphen, underscore and the Han range survive, everything else becomes an
/// underscore. Deterministic, so re-runs recompute the same artifact path.
pub fn sanitize_id(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            let han = (0x4E00..=0x9FFF).contains(&(c as u32));
            if c.is_alphanumeric() || c == '-' || c == '_' || han {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn bom_writer(path: &Path) -> Result<csv::Writer<File>> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = File::create(path)?;
    file.write_all(BOM.as_bytes())?;
    Ok(csv::Writer::from_writer(file))
}

/// Materializes one crop's usage table. Columns are the union of the raw
/// record keys in first-seen order, followed by the crop metadata columns the
/// downstream tooling expects.
pub fn write_usage_csv(
    usage_dir: &Path,
    crop: &Crop,
    records: &[RawRecord],
    fetch_time: &str,
    suffix: &str,
) -> Result<ArtifactDescriptor> {
    let path = usage_dir.join(format!("{}_{}", sanitize_id(&crop.name), suffix));
    let mut columns: Vec<&str> = Vec::new();
    for record in records {
        for (name, _) in record {
            if !columns.contains(&name.as_str()) {
                columns.push(name);
            }
        }
    }

    let mut writer = bom_writer(&path)?;
    let mut header: Vec<&str> = columns.clone();
    header.extend(["作物名稱", "資料來源URL", "擷取時間"]);
    writer.write_record(&header)?;

    for record in records {
        let mut row: Vec<&str> = columns
            .iter()
            .map(|col| {
                record
                    .iter()
                    .find(|(name, _)| name == col)
                    .map(|(_, value)| value.as_str())
                    .unwrap_or("")
            })
            .collect();
        row.push(&crop.name);
        row.push(&crop.source_url);
        row.push(fetch_time);
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(ArtifactDescriptor { path, record_count: records.len() })
}

fn pesticide_folder(code: &str, name: &str) -> String {
    format!("{}_{}", code, sanitize_id(name))
}

/// Materializes one pesticide's combined file: a `basic_info` row followed by
/// one `registration` row per permit.
pub fn write_pesticide_csv(
    pesticides_dir: &Path,
    info: &PesticideBasicInfo,
    rows: &[PesticideRecordRow],
) -> Result<ArtifactDescriptor> {
    let folder = pesticide_folder(&info.code, &info.name);
    let path = pesticides_dir.join(&folder).join(format!("{folder}.csv"));
    let mut writer = bom_writer(&path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(ArtifactDescriptor { path, record_count: rows.len() })
}

const RANGE_HEADER: [&str; 14] = [
    "pesticide_code",
    "permit_number",
    "crop",
    "pest_disease",
    "dosage_per_hectare",
    "dilution_ratio",
    "application_timing",
    "application_interval",
    "max_applications",
    "pre_harvest_interval",
    "application_method",
    "precautions",
    "notes",
    "approval_date",
];

/// Materializes the usage-range rows of one pesticide, header included even
/// when no range was approved, so the artifact still marks the code as done.
pub fn write_range_csv(
    ranges_dir: &Path,
    code: &str,
    name: &str,
    ranges: &[UsageRange],
) -> Result<ArtifactDescriptor> {
    let path = ranges_dir.join(format!("{}.csv", pesticide_folder(code, name)));
    let mut writer = bom_writer(&path)?;
    writer.write_record(RANGE_HEADER)?;
    for range in ranges {
        writer.write_record([
            range.pesticide_code.as_str(),
            range.permit_number.as_str(),
            range.crop.as_str(),
            range.pest_disease.as_str(),
            range.dosage_per_hectare.as_str(),
            range.dilution_ratio.as_str(),
            range.application_timing.as_str(),
            range.application_interval.as_str(),
            range.max_applications.as_str(),
            range.pre_harvest_interval.as_str(),
            range.application_method.as_str(),
            range.precautions.as_str(),
            range.notes.as_str(),
            range.approval_date.as_str(),
        ])?;
    }
    writer.flush()?;
    Ok(ArtifactDescriptor { path, record_count: ranges.len() })
}

/// First run of five consecutive digits in a permit number, used to prefix
/// image filenames so permits cannot collide inside one pesticide's folder.
pub(crate) fn permit_token(permit_number: &str) -> Option<String> {
    static TOKEN_RE: OnceLock<Option<Regex>> = OnceLock::new();
    let re = TOKEN_RE.get_or_init(|| Regex::new(r"\d{5}").ok()).as_ref()?;
    re.find(permit_number).map(|m| m.as_str().to_string())
}

/// Filename for a downloaded label image, derived from the URL's `url=` query
/// parameter or its trailing path segment.
pub(crate) fn image_filename(image_url: &str, permit_number: &str) -> String {
    let raw = if let Some(pos) = image_url.rfind("url=") {
        &image_url[pos + 4..]
    } else {
        image_url.rsplit('/').next().unwrap_or(image_url)
    };
    let mut name = if raw.is_empty() {
        format!("{}.jpg", sanitize_id(permit_number))
    } else {
        raw.to_string()
    };
    if !name.contains('.') {
        name.push_str(".jpg");
    }
    match permit_token(permit_number) {
        Some(token) => format!("{token}_{name}"),
        None => name,
    }
}

/// Writes a downloaded label image under the pesticide's image folder and
/// returns the composite `"absolute_path | retrieval_date"` value stored back
/// onto the owning registration.
pub fn save_image(
    images_dir: &Path,
    code: &str,
    name: &str,
    permit_number: &str,
    image_url: &str,
    bytes: &[u8],
    date: &str,
) -> Result<(PathBuf, String)> {
    let dir = images_dir.join(pesticide_folder(code, name));
    fs::create_dir_all(&dir)?;
    let path = dir.join(image_filename(image_url, permit_number));
    fs::write(&path, bytes)?;
    let abs = fs::canonicalize(&path)?;
    let stamp = format!("{} | {}", abs.display(), date);
    Ok((path, stamp))
}

/// Crop identities that already have a usage CSV with this suffix.
pub fn existing_crops(usage_dir: &Path, suffix: &str) -> HashSet<String> {
    let mut found = HashSet::new();
    let Ok(entries) = fs::read_dir(usage_dir) else {
        return found;
    };
    let tail = format!("_{suffix}");
    for entry in entries.flatten() {
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else { continue };
        if let Some(crop) = file_name.strip_suffix(&tail) {
            found.insert(crop.to_string());
        }
    }
    found
}

/// Pesticide codes whose per-code folder already holds a CSV.
pub fn existing_pesticide_codes(pesticides_dir: &Path) -> HashSet<String> {
    let mut found = HashSet::new();
    let Ok(entries) = fs::read_dir(pesticides_dir) else {
        return found;
    };
    for entry in entries.flatten() {
        let has_csv = fs::read_dir(entry.path())
            .map(|files| {
                files.flatten().any(|f| {
                    f.path().extension().is_some_and(|ext| ext == "csv")
                })
            })
            .unwrap_or(false);
        if !has_csv {
            continue;
        }
        let dir_name = entry.file_name();
        let Some(dir_name) = dir_name.to_str() else { continue };
        if let Some(code) = dir_name.split('_').next() {
            found.insert(code.to_string());
        }
    }
    found
}

/// Pesticide codes that already have a usage-range CSV.
pub fn existing_range_codes(ranges_dir: &Path) -> HashSet<String> {
    let mut found = HashSet::new();
    let Ok(entries) = fs::read_dir(ranges_dir) else {
        return found;
    };
    for entry in entries.flatten() {
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else { continue };
        let Some(stem) = file_name.strip_suffix(".csv") else { continue };
        if let Some(code) = stem.split('_').next() {
            found.insert(code.to_string());
        }
    }
    found
}

/// Loads the persisted pesticide master list. The code and name columns are
/// required; brand and registrar are optional extras.
pub fn load_master_list(path: &Path) -> Result<Vec<PesticideBasicInfo>> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    let col = |name: &'static str| -> Option<usize> {
        headers.iter().position(|h| h.trim_start_matches(BOM) == name)
    };
    let code_idx = col("代號")
        .ok_or_else(|| Error::MasterListSchema(path.display().to_string(), "代號"))?;
    let name_idx = col("農藥名稱")
        .ok_or_else(|| Error::MasterListSchema(path.display().to_string(), "農藥名稱"))?;
    let brand_idx = col("原始英文廠牌名稱");
    let registrar_idx = col("登記廠商");

    let mut list = Vec::new();
    for record in reader.records() {
        let record = record?;
        let get = |idx: Option<usize>| {
            idx.and_then(|i| record.get(i)).unwrap_or("").trim().to_string()
        };
        let code = get(Some(code_idx));
        if code.is_empty() {
            continue;
        }
        list.push(PesticideBasicInfo {
            code,
            name: get(Some(name_idx)),
            original_brand: get(brand_idx),
            registrar: get(registrar_idx),
        });
    }
    Ok(list)
}

/// Loads previously persisted registrations from the comprehensive combined
/// dataset, grouped by pesticide code. A missing file is an empty prior, not
/// an error: first runs start from nothing.
pub fn load_prior_registrations(path: &Path) -> Result<HashMap<String, Vec<Registration>>> {
    let mut prior: HashMap<String, Vec<Registration>> = HashMap::new();
    if !path.exists() {
        return Ok(prior);
    }
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    let col = |name: &str| headers.iter().position(|h| h.trim_start_matches(BOM) == name);
    let (Some(code_idx), Some(type_idx)) = (col("pesticide_code"), col("data_type")) else {
        return Ok(prior);
    };
    let permit_idx = col("permit_number");
    let brand_idx = col("brand_name");
    let formulation_idx = col("formulation_type");
    let concentration_idx = col("concentration");
    let manufacturer_idx = col("manufacturer");
    let valid_idx = col("valid_date");
    let remarks_idx = col("remarks");

    for record in reader.records() {
        let record = record?;
        let get = |idx: Option<usize>| {
            idx.and_then(|i| record.get(i)).unwrap_or("").to_string()
        };
        if get(Some(type_idx)) != "pesticide_with_registration" {
            continue;
        }
        let code = get(Some(code_idx));
        let permit_number = get(permit_idx);
        let (regtid, regtno) = permit_regt(&permit_number);
        prior.entry(code.clone()).or_default().push(Registration {
            permit_number,
            regtid,
            regtno,
            pesticide_code: code,
            pesticide_name: String::new(),
            brand_name: get(brand_idx),
            formulation_type: get(formulation_idx),
            concentration: get(concentration_idx),
            up_status: String::new(),
            mixture: String::new(),
            manufacturer: get(manufacturer_idx),
            foreign_manufacturer: String::new(),
            valid_date: get(valid_idx),
            remarks: get(remarks_idx),
            company_no: CompanyNo::Unresolved,
            label_image_url: None,
            local_image_path: None,
        });
    }
    Ok(prior)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn crop() -> Crop {
        Crop {
            name: "蘋果(進口)".to_string(),
            source_url: "https://example.invalid/PLC0101.aspx?ASParam=x".to_string(),
        }
    }

    fn records() -> Vec<RawRecord> {
        vec![
            vec![
                ("藥劑名稱".to_string(), "賽滅寧".to_string()),
                ("病蟲害".to_string(), "小菜蛾".to_string()),
            ],
            vec![
                ("藥劑名稱".to_string(), "護賽寧".to_string()),
                ("殘留容許量(ppm)".to_string(), "0.5".to_string()),
            ],
        ]
    }

    #[test]
    fn sanitize_keeps_word_hyphen_underscore_and_han() {
        assert_eq!(sanitize_id("蘋果(進口)"), "蘋果_進口_");
        assert_eq!(sanitize_id("Rice-1_a"), "Rice-1_a");
        assert_eq!(sanitize_id("a b/c"), "a_b_c");
    }

    #[test]
    fn usage_csv_unions_columns_and_prepends_bom() {
        let dir = tempdir().unwrap();
        let artifact =
            write_usage_csv(dir.path(), &crop(), &records(), "2025-01-01 00:00:00", "data.csv")
                .unwrap();
        assert_eq!(artifact.record_count, 2);
        assert!(artifact.path.ends_with("蘋果_進口__data.csv"));

        let bytes = fs::read(&artifact.path).unwrap();
        assert!(bytes.starts_with("\u{FEFF}".as_bytes()));
        let text = String::from_utf8(bytes).unwrap();
        let mut lines = text.trim_start_matches('\u{FEFF}').lines();
        assert_eq!(
            lines.next().unwrap(),
            "藥劑名稱,病蟲害,殘留容許量(ppm),作物名稱,資料來源URL,擷取時間"
        );
        // Second record has no 病蟲害 value; the cell stays empty.
        let second = lines.nth(1).unwrap();
        assert!(second.starts_with("護賽寧,,0.5,"));
    }

    #[test]
    fn rematerializing_identical_records_is_byte_identical() {
        let dir = tempdir().unwrap();
        let first =
            write_usage_csv(dir.path(), &crop(), &records(), "2025-01-01 00:00:00", "data.csv")
                .unwrap();
        let bytes_a = fs::read(&first.path).unwrap();
        let second =
            write_usage_csv(dir.path(), &crop(), &records(), "2025-01-01 00:00:00", "data.csv")
                .unwrap();
        let bytes_b = fs::read(&second.path).unwrap();
        assert_eq!(first.path, second.path);
        assert_eq!(bytes_a, bytes_b);
    }

    #[test]
    fn existing_crops_lists_by_suffix() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("Apple_data.csv"), "x").unwrap();
        fs::write(dir.path().join("水稻_data.csv"), "x").unwrap();
        fs::write(dir.path().join("unrelated.txt"), "x").unwrap();
        let found = existing_crops(dir.path(), "data.csv");
        assert_eq!(found.len(), 2);
        assert!(found.contains("Apple"));
        assert!(found.contains("水稻"));
    }

    #[test]
    fn existing_pesticide_codes_require_a_csv() {
        let dir = tempdir().unwrap();
        let done = dir.path().join("A001_賽滅寧");
        fs::create_dir_all(&done).unwrap();
        fs::write(done.join("A001_賽滅寧.csv"), "x").unwrap();
        let empty = dir.path().join("B002_護賽寧");
        fs::create_dir_all(&empty).unwrap();
        let found = existing_pesticide_codes(dir.path());
        assert_eq!(found.len(), 1);
        assert!(found.contains("A001"));
    }

    #[test]
    fn permit_token_finds_first_five_digit_run() {
        assert_eq!(permit_token("農藥製00123").as_deref(), Some("00123"));
        assert_eq!(permit_token("農藥進04567號").as_deref(), Some("04567"));
        assert!(permit_token("no-digits").is_none());
    }

    #[test]
    fn image_filename_prefixes_permit_token() {
        assert_eq!(
            image_filename(
                "https://x/information/Query/ViewmarkDownload/?type=mark&url=label01.jpg",
                "農藥製00123"
            ),
            "00123_label01.jpg"
        );
        assert_eq!(image_filename("https://x/labels/foo", "no-digits"), "foo.jpg");
    }

    #[test]
    fn save_image_writes_bytes_and_composite_stamp() {
        let dir = tempdir().unwrap();
        let (path, stamp) = save_image(
            dir.path(),
            "A001",
            "賽滅寧",
            "農藥製00123",
            "https://x/d/?type=mark&url=label01.jpg",
            b"fakejpeg",
            "2025-01-01",
        )
        .unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"fakejpeg");
        assert!(stamp.ends_with(" | 2025-01-01"));
        assert!(stamp.contains("00123_label01.jpg"));
    }

    #[test]
    fn master_list_reads_chinese_headers() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("list.csv");
        fs::write(
            &path,
            "代號,農藥名稱,原始英文廠牌名稱,登記廠商\nA001,賽滅寧,Cymbush,台灣農藥\n,,x,y\n",
        )
        .unwrap();
        let list = load_master_list(&path).unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].code, "A001");
        assert_eq!(list[0].original_brand, "Cymbush");
    }

    #[test]
    fn master_list_missing_required_column_errors() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("list.csv");
        fs::write(&path, "foo,bar\n1,2\n").unwrap();
        assert!(matches!(
            load_master_list(&path),
            Err(Error::MasterListSchema(_, "代號"))
        ));
    }

    #[test]
    fn prior_registrations_grouped_by_code() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("combined.csv");
        fs::write(
            &path,
            "data_type,pesticide_code,permit_number,brand_name,formulation_type,concentration,manufacturer,valid_date,remarks\n\
             pesticide_with_registration,A001,農藥製00123,好噴,EC,2.8%,台灣農藥,115-12-31,\n\
             something_else,A001,農藥製00999,x,x,x,x,x,x\n\
             pesticide_with_registration,B002,農藥進04567,別牌,WP,5%,他廠,110-01-01,已廢止\n",
        )
        .unwrap();
        let prior = load_prior_registrations(&path).unwrap();
        assert_eq!(prior.len(), 2);
        assert_eq!(prior["A001"].len(), 1);
        assert_eq!(prior["A001"][0].regtno, "00123");
        assert_eq!(prior["B002"][0].regtid, "11");
    }

    #[test]
    fn missing_prior_file_is_empty_not_error() {
        let prior = load_prior_registrations(Path::new("/nonexistent/combined.csv")).unwrap();
        assert!(prior.is_empty());
    }
}
