//! Sequential per-entity processing: plan, fetch, merge, materialize.
//!
//! One entity is fully processed before the next starts, and a failure is
//! isolated to its entity: it is logged, counted and the run moves on. The
//! whole-file overwrite policy in `store` means an interrupted run can leave
//! one entity absent or stale, never corrupted.

use std::collections::HashSet;
use std::path::Path;

use chrono::Local;

use crate::cli::{CropOpts, PesticideOpts};
use crate::client::PortalClient;
use crate::model::{PesticideBasicInfo, PesticideRecordRow, Registration, UsageRange};
use crate::{
    dedup, fetch, info_time, paginate, plan, store, warn_time, Result, COMBINED_FILE, IMAGES_DIR,
    MASTER_LIST_FILE, PAGE_SIZE, PESTICIDES_DIR, RANGES_DIR, TIME_FORMAT, USAGE_DIR,
};

/// Final tally of a run. The process exit code is derived from `failed`.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub processed: usize,
    pub succeeded: usize,
    pub empty: usize,
    pub failed: usize,
    pub records: usize,
    pub images: usize,
}

impl RunSummary {
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }

    fn log(&self) {
        info_time!("=== Summary ===");
        info_time!("Entities processed: {}", self.processed);
        info_time!("Successful: {}", self.succeeded);
        info_time!("No data: {}", self.empty);
        info_time!("Failed: {}", self.failed);
        info_time!("Total records: {}", self.records);
        info_time!("Images downloaded: {}", self.images);
    }
}

/// Syncs per-crop usage tables from the PPM system.
pub async fn run_crops(opts: &CropOpts) -> Result<RunSummary> {
    let client = PortalClient::new()?;
    info_time!("Establishing session");
    client.establish_ppm_session().await?;

    let crops = fetch::crop_list(&client).await?;
    // The listing renders the same crop link twice in places; identity is the
    // sanitized name.
    let crops = dedup::merge(vec![crops], |c| store::sanitize_id(&c.name));
    info_time!("Found {} crop entries", crops.len());

    let persisted = store::existing_crops(Path::new(USAGE_DIR), &opts.output);
    info_time!("Already processed: {}", persisted.len());

    let mut planned =
        plan::plan(&crops, &persisted, |c| store::sanitize_id(&c.name), opts.sync_mode());
    if opts.force && !opts.full {
        planned.truncate(opts.limit);
    }
    info_time!("Crops to process: {}", planned.len());

    let fetch_time = Local::now().format(TIME_FORMAT).to_string();
    let mut summary = RunSummary::default();
    for (i, crop) in planned.iter().enumerate() {
        info_time!("{}/{}: {}", i + 1, planned.len(), crop.name);
        summary.processed += 1;
        if i > 0 {
            client.pace().await;
        }
        let records = match fetch::crop_usage(&client, crop).await {
            Ok(records) => records,
            Err(err) => {
                warn_time!("fetch failed for {}: {}", crop.name, err);
                summary.failed += 1;
                continue;
            }
        };
        if records.is_empty() {
            info_time!("no usage table for {}", crop.name);
            summary.empty += 1;
            continue;
        }
        match store::write_usage_csv(Path::new(USAGE_DIR), crop, &records, &fetch_time, &opts.output)
        {
            Ok(artifact) => {
                info_time!("saved {} records to {}", artifact.record_count, artifact.path.display());
                summary.succeeded += 1;
                summary.records += artifact.record_count;
            }
            Err(err) => {
                warn_time!("write failed for {}: {}", crop.name, err);
                summary.failed += 1;
            }
        }
    }
    summary.log();
    Ok(summary)
}

/// Splits the pesticide master list into per-code artifacts.
pub async fn run_pesticides(opts: &PesticideOpts) -> Result<RunSummary> {
    let client = PortalClient::new()?;
    info_time!("Establishing session");
    if client.establish_registry_session().await.is_err() {
        warn_time!("could not establish registry session, image download may fail");
    }

    let master = store::load_master_list(Path::new(MASTER_LIST_FILE))?;
    let prior = store::load_prior_registrations(Path::new(COMBINED_FILE))?;
    info_time!("Loaded {} pesticides from the master list", master.len());

    let requested: Vec<PesticideBasicInfo> = if opts.codes.is_empty() {
        master
    } else {
        opts.codes
            .iter()
            .filter_map(|code| {
                let found = master.iter().find(|p| &p.code == code).cloned();
                if found.is_none() {
                    warn_time!("unknown pesticide code: {}", code);
                }
                found
            })
            .collect()
    };

    let persisted: HashSet<String> = if opts.ranges_only {
        store::existing_range_codes(Path::new(RANGES_DIR))
    } else {
        store::existing_pesticide_codes(Path::new(PESTICIDES_DIR))
    };
    let planned = plan_pesticides(&requested, &persisted, opts);
    info_time!("Pesticides to process: {}", planned.len());

    let fetch_time = Local::now().format(TIME_FORMAT).to_string();
    let mut summary = RunSummary::default();
    for (i, info) in planned.iter().enumerate() {
        info_time!("{}/{}: {} {}", i + 1, planned.len(), info.code, info.name);
        summary.processed += 1;
        if i > 0 {
            client.pace().await;
        }
        let prior_regs = prior.get(&info.code).cloned().unwrap_or_default();
        let backfill = opts.images_only && persisted.contains(&info.code);
        match process_pesticide(&client, info, prior_regs, opts, backfill, &fetch_time).await {
            Ok(outcome) => {
                summary.records += outcome.records;
                summary.images += outcome.images;
                if outcome.walk_failed {
                    // Partial data was still materialized, but the entity is
                    // incomplete and must count against the exit code.
                    summary.failed += 1;
                } else if outcome.records == 0 && outcome.images == 0 {
                    summary.empty += 1;
                } else {
                    summary.succeeded += 1;
                }
            }
            Err(err) => {
                warn_time!("{}: {}", info.code, err);
                summary.failed += 1;
            }
        }
    }
    summary.log();
    Ok(summary)
}

/// Applies the sync mode to the requested codes. In images-only mode every
/// code stays planned: codes that already have a CSV get the image backfill
/// pass in [`process_pesticide`] instead of being skipped outright.
fn plan_pesticides(
    requested: &[PesticideBasicInfo],
    persisted: &HashSet<String>,
    opts: &PesticideOpts,
) -> Vec<PesticideBasicInfo> {
    let mode = if opts.images_only { plan::SyncMode::Force } else { opts.sync_mode() };
    let mut planned = plan::plan(requested, persisted, |p| p.code.clone(), mode);
    if opts.force || opts.images_only {
        if let Some(limit) = opts.limit {
            planned.truncate(limit);
        }
    }
    planned
}

struct PesticideOutcome {
    records: usize,
    images: usize,
    walk_failed: bool,
}

async fn process_pesticide(
    client: &PortalClient,
    info: &PesticideBasicInfo,
    prior: Vec<Registration>,
    opts: &PesticideOpts,
    image_backfill: bool,
    fetch_time: &str,
) -> Result<PesticideOutcome> {
    // Backfill works from the prior batch alone; the register listing is not
    // re-fetched and the existing CSV stays untouched.
    let (fresh, walk_err) = if image_backfill {
        (Vec::new(), None)
    } else {
        paginate::walk(
            |page| async move {
                if page > 1 {
                    client.pace().await;
                }
                fetch::register_page(client, &info.code, page, PAGE_SIZE).await
            },
            PAGE_SIZE,
        )
        .await
    };
    let walk_failed = match walk_err {
        Some(err) if fresh.is_empty() && prior.is_empty() => return Err(err),
        Some(err) => {
            warn_time!("listing for {} incomplete: {}", info.code, err);
            true
        }
        None => false,
    };

    // Fresh data last so it wins over the cached prior batch.
    let mut registrations = dedup::merge(vec![prior, fresh], |r| r.permit_number.clone());

    if opts.ranges_only {
        let mut ranges: Vec<UsageRange> = Vec::new();
        for reg in &registrations {
            client.pace().await;
            match fetch::usage_ranges(client, &info.code, reg).await {
                Ok(found) => ranges.extend(found),
                Err(err) => {
                    warn_time!("usage ranges for {} failed: {}", reg.permit_number, err);
                }
            }
        }
        let artifact =
            store::write_range_csv(Path::new(RANGES_DIR), &info.code, &info.name, &ranges)?;
        info_time!("saved {} ranges to {}", artifact.record_count, artifact.path.display());
        return Ok(PesticideOutcome {
            records: artifact.record_count,
            images: 0,
            walk_failed,
        });
    }

    let mut images = 0;
    if !opts.no_images {
        let date = fetch_time.split_whitespace().next().unwrap_or(fetch_time);
        for reg in registrations.iter_mut() {
            client.pace().await;
            let resolved = match fetch::resolve_image_url(client, &reg.regtid, &reg.regtno).await {
                Ok(url) => url,
                Err(err) => {
                    warn_time!("image lookup for {} failed: {}", reg.permit_number, err);
                    None
                }
            };
            let Some(url) = resolved else { continue };
            reg.label_image_url = Some(url.clone());
            let downloaded = match client.get_bytes(&url).await {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn_time!("image download for {} failed: {}", reg.permit_number, err);
                    continue;
                }
            };
            match store::save_image(
                Path::new(IMAGES_DIR),
                &info.code,
                &info.name,
                &reg.permit_number,
                &url,
                &downloaded,
                date,
            ) {
                Ok((_, stamp)) => {
                    reg.local_image_path = Some(stamp);
                    images += 1;
                }
                Err(err) => {
                    warn_time!("image save for {} failed: {}", reg.permit_number, err);
                }
            }
        }
    }

    if image_backfill {
        info_time!("backfilled {} label images for {}", images, info.code);
        return Ok(PesticideOutcome { records: 0, images, walk_failed });
    }

    let mut rows = vec![PesticideRecordRow::basic(info, registrations.len(), fetch_time)];
    rows.extend(
        registrations
            .iter()
            .enumerate()
            .map(|(i, reg)| PesticideRecordRow::registration(i + 1, reg, fetch_time)),
    );
    let artifact = store::write_pesticide_csv(Path::new(PESTICIDES_DIR), info, &rows)?;
    info_time!("saved {} records to {}", artifact.record_count, artifact.path.display());
    Ok(PesticideOutcome {
        records: artifact.record_count,
        images,
        walk_failed,
    })
}
