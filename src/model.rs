//! Typed records for the entities the portals expose. Raw table rows are
//! projected into these before anything touches the disk; the loose
//! column-name mapping stays inside `extract`.

use serde::Serialize;

pub const DATA_SOURCE: &str = "Taiwan Pesticide Database";

/// One crop entry from the PPM cross-reference listing.
#[derive(Debug, Clone)]
pub struct Crop {
    pub name: String,
    pub source_url: String,
}

/// Master-list entry for one pesticide code, loaded from the previously
/// persisted regulatory list.
#[derive(Debug, Clone)]
pub struct PesticideBasicInfo {
    pub code: String,
    pub name: String,
    pub original_brand: String,
    pub registrar: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationStatus {
    Active,
    Expired,
}

impl RegistrationStatus {
    /// A 廢止 (revocation) marker anywhere in the remarks means the permit is
    /// no longer in force.
    pub fn from_remarks(remarks: &str) -> Self {
        if remarks.contains("廢止") {
            Self::Expired
        } else {
            Self::Active
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Expired => "expired",
        }
    }
}

/// Company number required by the usage-range endpoint. There is no documented
/// way to derive it from the listing pages, so it stays `Unresolved` and the
/// query is issued with an empty value rather than a guessed one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompanyNo {
    Known(String),
    Unresolved,
}

impl CompanyNo {
    pub fn as_param(&self) -> &str {
        match self {
            Self::Known(no) => no,
            Self::Unresolved => "",
        }
    }
}

/// One registration permit of a pesticide. `permit_number` is the natural key
/// used for deduplication across fetch passes.
#[derive(Debug, Clone)]
pub struct Registration {
    pub permit_number: String,
    pub regtid: String,
    pub regtno: String,
    pub pesticide_code: String,
    pub pesticide_name: String,
    pub brand_name: String,
    pub formulation_type: String,
    pub concentration: String,
    pub up_status: String,
    pub mixture: String,
    pub manufacturer: String,
    pub foreign_manufacturer: String,
    pub valid_date: String,
    pub remarks: String,
    pub company_no: CompanyNo,
    /// Resolved lazily through the image-metadata view.
    pub label_image_url: Option<String>,
    /// `"absolute_path | retrieval_date"` once the label image is on disk.
    pub local_image_path: Option<String>,
}

impl Registration {
    pub fn status(&self) -> RegistrationStatus {
        RegistrationStatus::from_remarks(&self.remarks)
    }
}

/// Splits a permit number like `農藥製00123` into the registration-type code
/// the image endpoints expect and the bare permit digits.
pub(crate) fn permit_regt(permit_number: &str) -> (String, String) {
    let regtid = if permit_number.contains("農藥製") {
        "10"
    } else if permit_number.contains("農藥進") {
        "11"
    } else if permit_number.contains("農藥原進") {
        "12"
    } else {
        "10"
    };
    let regtno = permit_number
        .replace("農藥原進", "")
        .replace("農藥製", "")
        .replace("農藥進", "")
        .trim()
        .to_string();
    (regtid.to_string(), regtno)
}

/// One approved crop/pest/dosage combination tied to a registration. No
/// natural key beyond row order; kept as an append-only sequence.
#[derive(Debug, Clone, Serialize)]
pub struct UsageRange {
    pub pesticide_code: String,
    pub permit_number: String,
    pub crop: String,
    pub pest_disease: String,
    pub dosage_per_hectare: String,
    pub dilution_ratio: String,
    pub application_timing: String,
    pub application_interval: String,
    pub max_applications: String,
    pub pre_harvest_interval: String,
    pub application_method: String,
    pub precautions: String,
    pub notes: String,
    pub approval_date: String,
}

/// One row of a per-pesticide CSV file. Either the single `basic_info` row or
/// a `registration` row; the two variants share the schema through optional
/// columns.
#[derive(Debug, Clone, Serialize)]
pub struct PesticideRecordRow {
    pub data_type: String,
    pub sequence: Option<usize>,
    pub pesticide_code: String,
    pub pesticide_name: String,
    pub original_english_brand: Option<String>,
    pub primary_registrar: Option<String>,
    pub total_registrations: Option<usize>,
    pub permit_number: Option<String>,
    pub brand_name: Option<String>,
    pub formulation_type: Option<String>,
    pub concentration: Option<String>,
    pub up_status: Option<String>,
    pub mixture: Option<String>,
    pub manufacturer: Option<String>,
    pub foreign_manufacturer: Option<String>,
    pub valid_date: Option<String>,
    pub remarks: Option<String>,
    pub label_image_url: Option<String>,
    pub local_image_path: Option<String>,
    pub registration_status: Option<String>,
    pub data_source: String,
    pub fetch_time: String,
}

impl PesticideRecordRow {
    pub fn basic(info: &PesticideBasicInfo, total_registrations: usize, fetch_time: &str) -> Self {
        Self {
            data_type: "basic_info".to_string(),
            sequence: None,
            pesticide_code: info.code.clone(),
            pesticide_name: info.name.clone(),
            original_english_brand: Some(info.original_brand.clone()),
            primary_registrar: Some(info.registrar.clone()),
            total_registrations: Some(total_registrations),
            permit_number: None,
            brand_name: None,
            formulation_type: None,
            concentration: None,
            up_status: None,
            mixture: None,
            manufacturer: None,
            foreign_manufacturer: None,
            valid_date: None,
            remarks: None,
            label_image_url: None,
            local_image_path: None,
            registration_status: None,
            data_source: DATA_SOURCE.to_string(),
            fetch_time: fetch_time.to_string(),
        }
    }

    pub fn registration(sequence: usize, reg: &Registration, fetch_time: &str) -> Self {
        Self {
            data_type: "registration".to_string(),
            sequence: Some(sequence),
            pesticide_code: reg.pesticide_code.clone(),
            pesticide_name: reg.pesticide_name.clone(),
            original_english_brand: None,
            primary_registrar: None,
            total_registrations: None,
            permit_number: Some(reg.permit_number.clone()),
            brand_name: Some(reg.brand_name.clone()),
            formulation_type: Some(reg.formulation_type.clone()),
            concentration: Some(reg.concentration.clone()),
            up_status: Some(reg.up_status.clone()),
            mixture: Some(reg.mixture.clone()),
            manufacturer: Some(reg.manufacturer.clone()),
            foreign_manufacturer: Some(reg.foreign_manufacturer.clone()),
            valid_date: Some(reg.valid_date.clone()),
            remarks: Some(reg.remarks.clone()),
            label_image_url: reg.label_image_url.clone(),
            local_image_path: reg.local_image_path.clone(),
            registration_status: Some(reg.status().as_str().to_string()),
            data_source: DATA_SOURCE.to_string(),
            fetch_time: fetch_time.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_derived_from_revocation_marker() {
        assert_eq!(
            RegistrationStatus::from_remarks("本許可證已於110年廢止"),
            RegistrationStatus::Expired
        );
        assert_eq!(RegistrationStatus::from_remarks(""), RegistrationStatus::Active);
    }

    #[test]
    fn permit_regt_maps_prefixes() {
        assert_eq!(permit_regt("農藥製00123"), ("10".to_string(), "00123".to_string()));
        assert_eq!(permit_regt("農藥進04567"), ("11".to_string(), "04567".to_string()));
        assert_eq!(permit_regt("農藥原進00089"), ("12".to_string(), "00089".to_string()));
        assert_eq!(permit_regt("12345"), ("10".to_string(), "12345".to_string()));
    }
}
