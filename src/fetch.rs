//! Endpoint-specific fetchers for the two portals.
//!
//! Every fetcher is a thin async wrapper that downloads the page and hands it
//! to a pure parsing function, so the table-to-record mapping can be tested
//! on fixture HTML without a network.

use regex::Regex;
use scraper::{Html, Selector};
use url::Url;

use crate::client::PortalClient;
use crate::extract::{self, ColumnMap, RawRecord, TableLocator, TableSchema};
use crate::model::{permit_regt, CompanyNo, Crop, Registration, UsageRange};
use crate::Result;

/// The crop cross-reference listing. Crop links are carried in `onclick`
/// handlers rather than hrefs.
pub async fn crop_list(client: &PortalClient) -> Result<Vec<Crop>> {
    let html = client.get_html(&client.ppm_url("PLC02.aspx")).await?;
    Ok(parse_crop_list(&html, crate::PPM_BASE_URL))
}

pub fn parse_crop_list(html: &str, base: &str) -> Vec<Crop> {
    let doc = Html::parse_document(html);
    let Ok(onclick_sel) = Selector::parse("div[onclick], a[onclick]") else {
        return Vec::new();
    };
    let Ok(href_re) = Regex::new(r"location\.href='([^']+)'") else {
        return Vec::new();
    };

    let mut crops = Vec::new();
    for element in doc.select(&onclick_sel) {
        let Some(onclick) = element.value().attr("onclick") else { continue };
        if !onclick.contains("PLC0101.aspx?ASParam=") {
            continue;
        }
        let Some(caps) = href_re.captures(onclick) else { continue };
        let name = element
            .text()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("");
        if name.is_empty() {
            continue;
        }
        crops.push(Crop {
            name,
            source_url: format!("{}/{}", base, &caps[1]),
        });
    }
    crops
}

fn usage_table_schema() -> TableSchema {
    TableSchema {
        locator: TableLocator::HeaderContains("藥劑"),
        min_columns: 4,
        columns: ColumnMap::FromHeader,
    }
}

/// Fetches one crop's approved-pesticide table, including the hidden residue
/// tolerance column. An absent or malformed table is "no data", not an error.
pub async fn crop_usage(client: &PortalClient, crop: &Crop) -> Result<Vec<RawRecord>> {
    let html = client.get_html(&crop.source_url).await?;
    Ok(extract::extract_with_tolerance(&html, &usage_table_schema()))
}

fn register_table_schema() -> TableSchema {
    TableSchema {
        locator: TableLocator::Within("div.table-data-list"),
        min_columns: 10,
        columns: ColumnMap::Positional(vec![
            (0, "permit_number"),
            (1, "pesticide_name"),
            (2, "brand_name"),
            (3, "formulation_type"),
            (4, "concentration"),
            (5, "up_status"),
            (6, "mixture"),
            (7, "manufacturer"),
            (8, "foreign_manufacturer"),
            (9, "valid_date"),
            (10, "remarks"),
        ]),
    }
}

/// One page of the paginated registration listing for a pesticide code.
pub async fn register_page(
    client: &PortalClient,
    code: &str,
    page: usize,
    page_size: usize,
) -> Result<Vec<Registration>> {
    let html = client
        .registry_get(
            "information/Query/RegisterList",
            &[
                ("pestcd", code.to_string()),
                ("page", page.to_string()),
                ("pagesize", page_size.to_string()),
            ],
        )
        .await?;
    Ok(parse_register_list(&html, code))
}

pub fn parse_register_list(html: &str, code: &str) -> Vec<Registration> {
    extract::extract(html, &register_table_schema())
        .into_iter()
        .map(|raw| registration_from_raw(raw, code))
        .collect()
}

fn field(raw: &RawRecord, name: &str) -> String {
    raw.iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.clone())
        .unwrap_or_default()
}

fn registration_from_raw(raw: RawRecord, code: &str) -> Registration {
    let permit_number = field(&raw, "permit_number");
    let (regtid, regtno) = permit_regt(&permit_number);
    Registration {
        permit_number,
        regtid,
        regtno,
        pesticide_code: code.to_string(),
        pesticide_name: field(&raw, "pesticide_name"),
        brand_name: field(&raw, "brand_name"),
        formulation_type: field(&raw, "formulation_type"),
        concentration: field(&raw, "concentration"),
        up_status: field(&raw, "up_status"),
        mixture: field(&raw, "mixture"),
        manufacturer: field(&raw, "manufacturer"),
        foreign_manufacturer: field(&raw, "foreign_manufacturer"),
        valid_date: field(&raw, "valid_date"),
        remarks: field(&raw, "remarks"),
        company_no: CompanyNo::Unresolved,
        label_image_url: None,
        local_image_path: None,
    }
}

/// Resolves the downloadable label-image URL for a registration through the
/// image-metadata view. `Ok(None)` when the view carries no image.
pub async fn resolve_image_url(
    client: &PortalClient,
    regtid: &str,
    regtno: &str,
) -> Result<Option<String>> {
    let html = client
        .registry_get(
            "information/Query/RegisterViewMark/",
            &[("regtid", regtid.to_string()), ("regtno", regtno.to_string())],
        )
        .await?;
    Ok(parse_image_url(&html, client.registry_base()))
}

pub fn parse_image_url(html: &str, base: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    let base_url = Url::parse(base).ok()?;

    // Preferred: an explicit download link.
    if let Ok(link_sel) = Selector::parse("a[href]") {
        for link in doc.select(&link_sel) {
            let Some(href) = link.value().attr("href") else { continue };
            if href.contains("ViewmarkDownload") {
                return base_url.join(href).ok().map(|u| u.to_string());
            }
        }
    }

    // Fallback: an inline <img> whose src names the stored file.
    if let Ok(img_sel) = Selector::parse("img[src]") {
        for img in doc.select(&img_sel) {
            let Some(src) = img.value().attr("src") else { continue };
            let lower = src.to_lowercase();
            if ![".jpg", ".jpeg", ".png", ".gif"].iter().any(|ext| lower.contains(ext)) {
                continue;
            }
            if let Some(pos) = src.rfind("url=") {
                return Some(format!(
                    "{}/information/Query/ViewmarkDownload/?type=mark&url={}",
                    base,
                    &src[pos + 4..]
                ));
            }
        }
    }
    None
}

fn usage_range_schema() -> TableSchema {
    TableSchema {
        locator: TableLocator::Within("div.table-data-list"),
        min_columns: 12,
        columns: ColumnMap::Positional(vec![
            (0, "crop"),
            (1, "pest_disease"),
            (2, "dosage_per_hectare"),
            (3, "dilution_ratio"),
            (4, "application_timing"),
            (5, "application_interval"),
            (6, "max_applications"),
            (7, "pre_harvest_interval"),
            (8, "application_method"),
            (9, "precautions"),
            (10, "notes"),
            (11, "approval_date"),
        ]),
    }
}

/// The approved usage-range listing for one registration. Keyed by a
/// composite of pesticide code, formulation, concentration, company number
/// and the registration identifiers; the company number has no documented
/// derivation and is sent empty when unresolved.
pub async fn usage_ranges(
    client: &PortalClient,
    code: &str,
    reg: &Registration,
) -> Result<Vec<UsageRange>> {
    let html = client
        .registry_get(
            "information/Query/UsageRange",
            &[
                ("pestcd", code.to_string()),
                ("formucd", reg.formulation_type.clone()),
                ("conc", reg.concentration.clone()),
                ("compno", reg.company_no.as_param().to_string()),
                ("regtid", reg.regtid.clone()),
                ("regtno", reg.regtno.clone()),
            ],
        )
        .await?;
    Ok(parse_usage_ranges(&html, code, &reg.permit_number))
}

pub fn parse_usage_ranges(html: &str, code: &str, permit_number: &str) -> Vec<UsageRange> {
    extract::extract(html, &usage_range_schema())
        .into_iter()
        .map(|raw| UsageRange {
            pesticide_code: code.to_string(),
            permit_number: permit_number.to_string(),
            crop: field(&raw, "crop"),
            pest_disease: field(&raw, "pest_disease"),
            dosage_per_hectare: field(&raw, "dosage_per_hectare"),
            dilution_ratio: field(&raw, "dilution_ratio"),
            application_timing: field(&raw, "application_timing"),
            application_interval: field(&raw, "application_interval"),
            max_applications: field(&raw, "max_applications"),
            pre_harvest_interval: field(&raw, "pre_harvest_interval"),
            application_method: field(&raw, "application_method"),
            precautions: field(&raw, "precautions"),
            notes: field(&raw, "notes"),
            approval_date: field(&raw, "approval_date"),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RegistrationStatus;

    #[test]
    fn crop_list_extracts_onclick_links() {
        let html = r#"
            <div onclick="location.href='PLC0101.aspx?ASParam=abc123'"> 水稻 </div>
            <a onclick="location.href='PLC0101.aspx?ASParam=def456'">蘋果</a>
            <a onclick="location.href='Other.aspx?x=1'">ignored</a>
            <div onclick="location.href='PLC0101.aspx?ASParam=ghi'"></div>"#;
        let crops = parse_crop_list(html, "https://otserv2.acri.gov.tw/PPM");
        assert_eq!(crops.len(), 2);
        assert_eq!(crops[0].name, "水稻");
        assert_eq!(
            crops[0].source_url,
            "https://otserv2.acri.gov.tw/PPM/PLC0101.aspx?ASParam=abc123"
        );
        assert_eq!(crops[1].name, "蘋果");
    }

    fn register_row(permit: &str, remarks: &str) -> String {
        format!(
            "<tr><td><a href=\"#\">{permit}</a></td><td>賽滅寧</td><td>好噴</td>\
             <td>EC</td><td>2.8%</td><td>使用中</td><td></td><td>台灣農藥公司</td>\
             <td></td><td>115-12-31</td><td>{remarks}</td></tr>"
        )
    }

    #[test]
    fn register_list_projects_rows_and_skips_short_ones() {
        let html = format!(
            r#"<div class="table-data-list"><table>
                <thead><tr><th>許可證</th><th>名稱</th><th>廠牌</th><th>劑型</th>
                <th>含量</th><th>use</th><th>混合</th><th>廠商</th><th>國外</th>
                <th>有效日期</th><th>備註</th></tr></thead>
                <tbody>
                {}
                <tr><td>short</td><td>row</td></tr>
                {}
                </tbody></table></div>"#,
            register_row("農藥製00123", ""),
            register_row("農藥進04567", "已廢止")
        );
        let regs = parse_register_list(&html, "A001");
        assert_eq!(regs.len(), 2);
        assert_eq!(regs[0].permit_number, "農藥製00123");
        assert_eq!(regs[0].regtid, "10");
        assert_eq!(regs[0].regtno, "00123");
        assert_eq!(regs[0].pesticide_code, "A001");
        assert_eq!(regs[0].status(), RegistrationStatus::Active);
        assert_eq!(regs[1].regtid, "11");
        assert_eq!(regs[1].status(), RegistrationStatus::Expired);
    }

    #[test]
    fn image_url_prefers_download_link() {
        let html = r#"<a href="/information/Query/ViewmarkDownload/?type=mark&url=label01.jpg">下載</a>"#;
        let url = parse_image_url(html, "https://pesticide.aphia.gov.tw").unwrap();
        assert_eq!(
            url,
            "https://pesticide.aphia.gov.tw/information/Query/ViewmarkDownload/?type=mark&url=label01.jpg"
        );
    }

    #[test]
    fn image_url_falls_back_to_inline_img() {
        let html = r#"<img src="/some/view?url=label02.png">"#;
        let url = parse_image_url(html, "https://pesticide.aphia.gov.tw").unwrap();
        assert!(url.ends_with("type=mark&url=label02.png"));
    }

    #[test]
    fn image_url_absent_is_none() {
        assert!(parse_image_url("<p>no image</p>", "https://pesticide.aphia.gov.tw").is_none());
    }

    #[test]
    fn usage_ranges_carry_parent_references() {
        let html = r#"<div class="table-data-list"><table><tbody>
            <tr><td>水稻</td><td>二化螟</td><td>1.5公升</td><td>1000</td>
            <td>發生初期</td><td>7天</td><td>3次</td><td>15天</td>
            <td>噴施</td><td>注意事項</td><td></td><td>98-05-01</td></tr>
        </tbody></table></div>"#;
        let ranges = parse_usage_ranges(html, "A001", "農藥製00123");
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].crop, "水稻");
        assert_eq!(ranges[0].pesticide_code, "A001");
        assert_eq!(ranges[0].permit_number, "農藥製00123");
        assert_eq!(ranges[0].pre_harvest_interval, "15天");
    }
}
