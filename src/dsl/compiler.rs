//! DSL compilation: bind slots to assets, grid-align, validate, and
//! emit a content-addressed `CompiledSchedule`.

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveTime, TimeZone};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::asset::AssetResolver;
use crate::error::{RetrovueError, Result};
use crate::model::ProgramBlock;

use super::document::{DaySchedule, ProgrammingDocument, SelectionPolicy, Slot, SlotContent};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompiledSchedule {
    pub version: u32,
    pub channel_id: String,
    pub broadcast_day: String,
    pub program_blocks: Vec<ProgramBlock>,
    pub notes: Vec<String>,
    pub hash: String,
}

/// Starting sequential counter per pool/collection id, supplied by the
/// caller (schedule service) per broadcast day: `slots_per_day * day_offset`.
pub type SequentialCounters = HashMap<String, i64>;

pub fn compile_schedule(
    doc: &ProgrammingDocument,
    resolver: &dyn AssetResolver,
    sequential_counters: &SequentialCounters,
    grid_minutes: i64,
) -> Result<CompiledSchedule> {
    let slots = resolve_day_slots(doc)?;

    let tz: Tz = Tz::from_str(&doc.timezone)
        .map_err(|_| RetrovueError::Compile(format!("unknown timezone: {}", doc.timezone)))?;
    let day = NaiveDate::parse_from_str(&doc.broadcast_day, "%Y-%m-%d")
        .map_err(|_| RetrovueError::Compile(format!("invalid broadcast_day: {}", doc.broadcast_day)))?;

    // Every slot must start on a multiple of the channel's grid.
    for slot in &slots {
        let minute = parse_local_minute(&slot.start)?;
        if minute % grid_minutes != 0 {
            return Err(RetrovueError::Validation(format!(
                "slot at {} violates grid alignment (grid_minutes={grid_minutes})",
                slot.start
            )));
        }
    }

    let mut occurrence: HashMap<String, i64> = HashMap::new();
    let mut blocks = Vec::with_capacity(slots.len());
    let mut notes = Vec::new();

    for slot in &slots {
        let (hh, mm) = parse_hh_mm(&slot.start)?;
        let local_time = NaiveTime::from_hms_opt(hh, mm, 0)
            .ok_or_else(|| RetrovueError::Compile(format!("invalid slot start: {}", slot.start)))?;
        let local_dt = day.and_time(local_time);
        let zoned = tz
            .from_local_datetime(&local_dt)
            .single()
            .ok_or_else(|| RetrovueError::Compile(format!("ambiguous local time: {}", slot.start)))?;
        let start_at_utc_ms = zoned.to_utc().timestamp_millis();

        let (asset_id, pool_key) = select_asset(slot, doc, resolver, sequential_counters, &mut occurrence)?;
        let asset = resolver.resolve_asset(&asset_id)?;
        let episode_duration_sec = asset.episode_duration_sec();
        let slot_duration_sec = slot.slot_minutes * 60;

        if slot_duration_sec < episode_duration_sec {
            return Err(RetrovueError::Validation(format!(
                "slot {} ({slot_duration_sec}s) shorter than episode {asset_id} ({episode_duration_sec}s)",
                slot.start
            )));
        }

        if let Some(pool_key) = pool_key {
            notes.push(format!("slot {} selected {asset_id} from {pool_key}", slot.start));
        }

        blocks.push(ProgramBlock {
            asset_id,
            start_at_utc_ms,
            slot_duration_sec,
            episode_duration_sec,
            title: slot.title.clone().unwrap_or_default(),
            notes: None,
        });
    }

    blocks.sort_by_key(|b| b.start_at_utc_ms);

    // Blocks must not overlap once sorted by start time.
    for pair in blocks.windows(2) {
        let (left, right) = (&pair[0], &pair[1]);
        if right.start_at_utc_ms < left.end_at_utc_ms() {
            return Err(RetrovueError::Validation(format!(
                "overlapping blocks: {} ends at {}, {} starts at {}",
                left.asset_id,
                left.end_at_utc_ms(),
                right.asset_id,
                right.start_at_utc_ms
            )));
        }
    }

    let hash = content_hash(&blocks)?;

    Ok(CompiledSchedule {
        version: 1,
        channel_id: doc.channel.clone(),
        broadcast_day: doc.broadcast_day.clone(),
        program_blocks: blocks,
        notes,
        hash,
    })
}

fn resolve_day_slots(doc: &ProgrammingDocument) -> Result<Vec<Slot>> {
    let day_name = {
        let date = NaiveDate::parse_from_str(&doc.broadcast_day, "%Y-%m-%d")
            .map_err(|_| RetrovueError::Compile(format!("invalid broadcast_day: {}", doc.broadcast_day)))?;
        date.format("%A").to_string().to_lowercase()
    };

    let day_schedule = doc
        .schedule
        .get(&doc.broadcast_day)
        .or_else(|| doc.schedule.get(&day_name))
        .ok_or_else(|| {
            RetrovueError::Compile(format!(
                "no schedule entry for broadcast_day {} or weekday {day_name}",
                doc.broadcast_day
            ))
        })?;

    match day_schedule {
        DaySchedule::Slots(slots) => Ok(slots.clone()),
        DaySchedule::TemplateRef { r#use } => doc
            .templates
            .get(r#use)
            .map(|t| t.slots.clone())
            .ok_or_else(|| RetrovueError::Compile(format!("unknown template: {use_}", use_ = r#use))),
    }
}

fn parse_hh_mm(value: &str) -> Result<(u32, u32)> {
    let mut parts = value.splitn(2, ':');
    let hh: u32 = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| RetrovueError::Compile(format!("invalid slot start: {value}")))?;
    let mm: u32 = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| RetrovueError::Compile(format!("invalid slot start: {value}")))?;
    Ok((hh, mm))
}

fn parse_local_minute(value: &str) -> Result<i64> {
    let (hh, mm) = parse_hh_mm(value)?;
    Ok((hh * 60 + mm) as i64)
}

fn select_asset(
    slot: &Slot,
    doc: &ProgrammingDocument,
    resolver: &dyn AssetResolver,
    sequential_counters: &SequentialCounters,
    occurrence: &mut HashMap<String, i64>,
) -> Result<(String, Option<String>)> {
    match &slot.content {
        SlotContent::Asset(asset_id) => Ok((asset_id.clone(), None)),
        SlotContent::Pool { pool, policy, rating_max } => {
            let candidates = doc
                .pools
                .get(pool)
                .cloned()
                .ok_or_else(|| RetrovueError::AssetResolution(format!("unknown pool: {pool}")))?;
            let picked = pick(
                &candidates,
                pool,
                *policy,
                rating_max.as_deref(),
                doc,
                resolver,
                sequential_counters,
                occurrence,
            )?;
            Ok((picked, Some(pool.clone())))
        }
        SlotContent::Collection { collection, policy, rating_max } => {
            let candidates = resolver
                .resolve_asset(collection)
                .map(|meta| meta.children)
                .map_err(|_| RetrovueError::AssetResolution(format!("unknown collection: {collection}")))?;
            let picked = pick(
                &candidates,
                collection,
                *policy,
                rating_max.as_deref(),
                doc,
                resolver,
                sequential_counters,
                occurrence,
            )?;
            Ok((picked, Some(collection.clone())))
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn pick(
    candidates: &[String],
    pool_key: &str,
    policy: SelectionPolicy,
    rating_max: Option<&str>,
    doc: &ProgrammingDocument,
    resolver: &dyn AssetResolver,
    sequential_counters: &SequentialCounters,
    occurrence: &mut HashMap<String, i64>,
) -> Result<String> {
    let filtered: Vec<String> = if let Some(max_rating) = rating_max {
        candidates
            .iter()
            .filter(|id| {
                resolver
                    .resolve_asset(id)
                    .ok()
                    .and_then(|m| m.rating)
                    .map(|r| r <= max_rating.to_string())
                    .unwrap_or(true)
            })
            .cloned()
            .collect()
    } else {
        candidates.to_vec()
    };

    if filtered.is_empty() {
        return Err(RetrovueError::AssetResolution(format!(
            "no candidates remain for {pool_key} after rating filter"
        )));
    }

    let slot_index = {
        let entry = occurrence.entry(pool_key.to_string()).or_insert(0);
        let idx = *entry;
        *entry += 1;
        idx
    };

    let chosen_index = match policy {
        SelectionPolicy::Sequential => {
            let counter = sequential_counters.get(pool_key).copied().unwrap_or(0);
            ((counter + slot_index) as usize) % filtered.len()
        }
        SelectionPolicy::Random => {
            let seed = format!("{}:{}:{slot_index}", doc.channel, doc.broadcast_day);
            let mut hasher = Sha256::new();
            hasher.update(seed.as_bytes());
            let digest = hasher.finalize();
            let n = u64::from_be_bytes(digest[0..8].try_into().unwrap());
            (n as usize) % filtered.len()
        }
    };

    Ok(filtered[chosen_index].clone())
}

/// Total slot count across every entry in `doc.schedule`, template
/// references resolved. Used to seed sequential-selection counters:
/// `counter_for_pool = slots_per_day * day_offset_from_epoch`.
pub fn count_total_slots(doc: &ProgrammingDocument) -> i64 {
    doc.schedule
        .values()
        .map(|day| match day {
            DaySchedule::Slots(slots) => slots.len() as i64,
            DaySchedule::TemplateRef { r#use } => {
                doc.templates.get(r#use).map(|t| t.slots.len() as i64).unwrap_or(0)
            }
        })
        .sum()
}

fn content_hash(blocks: &[ProgramBlock]) -> Result<String> {
    let canonical = serde_json::to_vec(blocks)?;
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    Ok(format!("{:x}", hasher.finalize()))
}
