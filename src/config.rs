use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::detect::{ObjectClass, Point};
use crate::moments::{MergePolicy, ScoreAggregate};

const DEFAULT_IOU_THRESHOLD: f32 = 0.3;
const DEFAULT_MISS_GRACE_FRAMES: u32 = 5;
const DEFAULT_STALE_EXPIRY_SECS: f64 = 5.0;
const DEFAULT_HISTORY_LEN: usize = 32;
const DEFAULT_MIN_CONFIDENCE: f32 = 0.0;
const DEFAULT_CROWD_CLASS: ObjectClass = ObjectClass::Person;
const DEFAULT_CROWD_RADIUS_PX: f32 = 150.0;
const DEFAULT_CROWD_MIN_SIZE: usize = 3;
const DEFAULT_CROWD_MIN_DURATION_SECS: f64 = 5.0;
const DEFAULT_DEDUP_WINDOW_SECS: f64 = 30.0;
const DEFAULT_COOLDOWN_SECS: f64 = 10.0;
const DEFAULT_LOCATION_CELL_PX: f32 = 100.0;
const DEFAULT_SOURCE_ID: &str = "camera:front";
const DEFAULT_SOURCE_FEED: &str = "stub://loiter";

#[derive(Debug, Deserialize, Default)]
struct KernelConfigFile {
    tracking: Option<TrackingConfigFile>,
    loitering: Option<LoiteringConfigFile>,
    crowd: Option<CrowdConfigFile>,
    zones: Option<Vec<ZoneConfigFile>>,
    alerts: Option<AlertConfigFile>,
    moments: Option<MomentConfigFile>,
    sources: Option<Vec<SourceConfigFile>>,
    sink: Option<SinkConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct TrackingConfigFile {
    iou_threshold: Option<f32>,
    miss_grace_frames: Option<u32>,
    stale_expiry_secs: Option<f64>,
    history_len: Option<usize>,
    min_confidence: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct LoiteringConfigFile {
    profiles: Option<Vec<LoiteringProfileFile>>,
}

#[derive(Debug, Deserialize)]
struct LoiteringProfileFile {
    class: String,
    radius_px: f32,
    dwell_secs: f64,
}

#[derive(Debug, Deserialize, Default)]
struct CrowdConfigFile {
    class: Option<String>,
    radius_px: Option<f32>,
    min_size: Option<usize>,
    min_duration_secs: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ZoneConfigFile {
    id: String,
    polygon: Vec<[f32; 2]>,
    classes: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
struct AlertConfigFile {
    dedup_window_secs: Option<f64>,
    cooldown_secs: Option<f64>,
    location_cell_px: Option<f32>,
    emit_closing_updates: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct MomentConfigFile {
    gap_tolerance_secs: Option<f64>,
    max_clip_secs: Option<f64>,
    padding_secs: Option<f64>,
    aggregate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SourceConfigFile {
    id: String,
    feed: String,
}

#[derive(Debug, Deserialize, Default)]
struct SinkConfigFile {
    kind: Option<String>,
    path: Option<PathBuf>,
}

/// Every tunable the tracking pipeline and the moment merger read.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelConfig {
    pub tracking: TrackingSettings,
    pub loitering: Vec<LoiteringProfile>,
    pub crowd: CrowdSettings,
    pub zones: Vec<ZoneSettings>,
    pub alerts: AlertSettings,
    pub moments: MergePolicy,
    pub sources: Vec<SourceSettings>,
    pub sink: SinkSettings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackingSettings {
    /// Minimum IoU a detection must exceed to extend a track.
    pub iou_threshold: f32,
    /// Consecutive unmatched frames tolerated before a track goes stale.
    pub miss_grace_frames: u32,
    /// Seconds a stale track survives before removal.
    pub stale_expiry_secs: f64,
    /// Bounding-box history kept per track.
    pub history_len: usize,
    /// Detections below this confidence are rejected.
    pub min_confidence: f32,
}

/// Dwell thresholds for one object class.
#[derive(Debug, Clone, PartialEq)]
pub struct LoiteringProfile {
    pub class: ObjectClass,
    pub radius_px: f32,
    pub dwell_secs: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CrowdSettings {
    pub class: ObjectClass,
    pub radius_px: f32,
    pub min_size: usize,
    pub min_duration_secs: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ZoneSettings {
    pub id: String,
    pub polygon: Vec<Point>,
    pub classes: Vec<ObjectClass>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlertSettings {
    pub dedup_window_secs: f64,
    pub cooldown_secs: f64,
    pub location_cell_px: f32,
    pub emit_closing_updates: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceSettings {
    pub id: String,
    /// `stub://<scenario>` or a local JSON-lines detection file.
    pub feed: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    Log,
    JsonLines,
    Sqlite,
}

impl SinkKind {
    fn parse(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "log" => Ok(SinkKind::Log),
            "jsonl" | "json-lines" => Ok(SinkKind::JsonLines),
            "sqlite" => Ok(SinkKind::Sqlite),
            other => Err(anyhow!("config: unknown sink kind {:?}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SinkSettings {
    pub kind: SinkKind,
    pub path: Option<PathBuf>,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            tracking: TrackingSettings::default(),
            loitering: default_loitering_profiles(),
            crowd: CrowdSettings::default(),
            zones: Vec::new(),
            alerts: AlertSettings::default(),
            moments: MergePolicy::default(),
            sources: vec![SourceSettings {
                id: DEFAULT_SOURCE_ID.to_string(),
                feed: DEFAULT_SOURCE_FEED.to_string(),
            }],
            sink: SinkSettings {
                kind: SinkKind::Log,
                path: None,
            },
        }
    }
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            iou_threshold: DEFAULT_IOU_THRESHOLD,
            miss_grace_frames: DEFAULT_MISS_GRACE_FRAMES,
            stale_expiry_secs: DEFAULT_STALE_EXPIRY_SECS,
            history_len: DEFAULT_HISTORY_LEN,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
        }
    }
}

impl Default for CrowdSettings {
    fn default() -> Self {
        Self {
            class: DEFAULT_CROWD_CLASS,
            radius_px: DEFAULT_CROWD_RADIUS_PX,
            min_size: DEFAULT_CROWD_MIN_SIZE,
            min_duration_secs: DEFAULT_CROWD_MIN_DURATION_SECS,
        }
    }
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            dedup_window_secs: DEFAULT_DEDUP_WINDOW_SECS,
            cooldown_secs: DEFAULT_COOLDOWN_SECS,
            location_cell_px: DEFAULT_LOCATION_CELL_PX,
            emit_closing_updates: true,
        }
    }
}

fn default_loitering_profiles() -> Vec<LoiteringProfile> {
    vec![
        LoiteringProfile {
            class: ObjectClass::Person,
            radius_px: 80.0,
            dwell_secs: 30.0,
        },
        LoiteringProfile {
            class: ObjectClass::Vehicle,
            radius_px: 50.0,
            dwell_secs: 20.0,
        },
    ]
}

impl KernelConfig {
    /// Load from `VIGIL_CONFIG` (if set), apply env overrides, validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("VIGIL_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load an explicit config file without consulting the environment.
    pub fn from_path(path: &Path) -> Result<Self> {
        let cfg = Self::from_file(read_config_file(path)?)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: KernelConfigFile) -> Result<Self> {
        let defaults = Self::default();

        let tracking = match file.tracking {
            Some(t) => TrackingSettings {
                iou_threshold: t.iou_threshold.unwrap_or(defaults.tracking.iou_threshold),
                miss_grace_frames: t
                    .miss_grace_frames
                    .unwrap_or(defaults.tracking.miss_grace_frames),
                stale_expiry_secs: t
                    .stale_expiry_secs
                    .unwrap_or(defaults.tracking.stale_expiry_secs),
                history_len: t.history_len.unwrap_or(defaults.tracking.history_len),
                min_confidence: t.min_confidence.unwrap_or(defaults.tracking.min_confidence),
            },
            None => defaults.tracking,
        };

        let loitering = match file.loitering.and_then(|l| l.profiles) {
            Some(profiles) => profiles
                .into_iter()
                .map(|p| -> Result<LoiteringProfile> {
                    Ok(LoiteringProfile {
                        class: parse_class(&p.class)?,
                        radius_px: p.radius_px,
                        dwell_secs: p.dwell_secs,
                    })
                })
                .collect::<Result<Vec<_>>>()?,
            None => defaults.loitering,
        };

        let crowd = match file.crowd {
            Some(c) => CrowdSettings {
                class: match c.class.as_deref() {
                    Some(label) => parse_class(label)?,
                    None => defaults.crowd.class,
                },
                radius_px: c.radius_px.unwrap_or(defaults.crowd.radius_px),
                min_size: c.min_size.unwrap_or(defaults.crowd.min_size),
                min_duration_secs: c
                    .min_duration_secs
                    .unwrap_or(defaults.crowd.min_duration_secs),
            },
            None => defaults.crowd,
        };

        let zones = file
            .zones
            .unwrap_or_default()
            .into_iter()
            .map(|z| -> Result<ZoneSettings> {
                let classes = match z.classes {
                    Some(labels) => labels
                        .iter()
                        .map(|label| parse_class(label))
                        .collect::<Result<Vec<_>>>()?,
                    None => vec![ObjectClass::Person],
                };
                Ok(ZoneSettings {
                    id: z.id.to_lowercase(),
                    polygon: z.polygon.iter().map(|[x, y]| Point::new(*x, *y)).collect(),
                    classes,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let alerts = match file.alerts {
            Some(a) => AlertSettings {
                dedup_window_secs: a
                    .dedup_window_secs
                    .unwrap_or(defaults.alerts.dedup_window_secs),
                cooldown_secs: a.cooldown_secs.unwrap_or(defaults.alerts.cooldown_secs),
                location_cell_px: a
                    .location_cell_px
                    .unwrap_or(defaults.alerts.location_cell_px),
                emit_closing_updates: a
                    .emit_closing_updates
                    .unwrap_or(defaults.alerts.emit_closing_updates),
            },
            None => defaults.alerts,
        };

        let moments = match file.moments {
            Some(m) => MergePolicy {
                gap_tolerance_secs: m
                    .gap_tolerance_secs
                    .unwrap_or(defaults.moments.gap_tolerance_secs),
                max_clip_secs: m.max_clip_secs.unwrap_or(defaults.moments.max_clip_secs),
                padding_secs: m.padding_secs.unwrap_or(defaults.moments.padding_secs),
                aggregate: match m.aggregate.as_deref() {
                    Some(value) => ScoreAggregate::parse(value)
                        .ok_or_else(|| anyhow!("config: unknown moment aggregate {:?}", value))?,
                    None => defaults.moments.aggregate,
                },
                video_duration: None,
            },
            None => defaults.moments,
        };

        let sources = match file.sources {
            Some(sources) => sources
                .into_iter()
                .map(|s| SourceSettings {
                    id: s.id.trim().to_lowercase(),
                    feed: s.feed.trim().to_string(),
                })
                .collect(),
            None => defaults.sources,
        };

        let sink = match file.sink {
            Some(s) => SinkSettings {
                kind: match s.kind.as_deref() {
                    Some(kind) => SinkKind::parse(kind)?,
                    None => defaults.sink.kind,
                },
                path: s.path,
            },
            None => defaults.sink,
        };

        Ok(Self {
            tracking,
            loitering,
            crowd,
            zones,
            alerts,
            moments,
            sources,
            sink,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(sources) = std::env::var("VIGIL_SOURCES") {
            let parsed = parse_sources(&sources)?;
            if !parsed.is_empty() {
                self.sources = parsed;
            }
        }
        if let Ok(value) = std::env::var("VIGIL_IOU_THRESHOLD") {
            self.tracking.iou_threshold = value
                .trim()
                .parse()
                .map_err(|_| anyhow!("VIGIL_IOU_THRESHOLD must be a number"))?;
        }
        if let Ok(value) = std::env::var("VIGIL_ALERT_COOLDOWN_SECS") {
            self.alerts.cooldown_secs = value
                .trim()
                .parse()
                .map_err(|_| anyhow!("VIGIL_ALERT_COOLDOWN_SECS must be a number of seconds"))?;
        }
        if let Ok(value) = std::env::var("VIGIL_MOMENT_GAP_SECS") {
            self.moments.gap_tolerance_secs = value
                .trim()
                .parse()
                .map_err(|_| anyhow!("VIGIL_MOMENT_GAP_SECS must be a number of seconds"))?;
        }
        if let Ok(value) = std::env::var("VIGIL_MAX_CLIP_SECS") {
            self.moments.max_clip_secs = value
                .trim()
                .parse()
                .map_err(|_| anyhow!("VIGIL_MAX_CLIP_SECS must be a number of seconds"))?;
        }
        if let Ok(path) = std::env::var("VIGIL_SINK_PATH") {
            if !path.trim().is_empty() {
                self.sink.path = Some(PathBuf::from(path));
            }
        }
        Ok(())
    }

    /// Reject tunables outside sane bounds. A pipeline never runs with a config
    /// that fails here.
    pub fn validate(&self) -> Result<()> {
        let t = &self.tracking;
        unit_interval("tracking.iou_threshold", t.iou_threshold)?;
        unit_interval("tracking.min_confidence", t.min_confidence)?;
        non_negative("tracking.stale_expiry_secs", t.stale_expiry_secs)?;
        if t.history_len < 2 {
            return Err(anyhow!("config: tracking.history_len must be at least 2"));
        }

        let mut seen_classes = HashSet::new();
        for profile in &self.loitering {
            positive("loitering.radius_px", profile.radius_px as f64)?;
            non_negative("loitering.dwell_secs", profile.dwell_secs)?;
            if !seen_classes.insert(profile.class) {
                return Err(anyhow!(
                    "config: duplicate loitering profile for class {}",
                    profile.class.as_str()
                ));
            }
        }

        positive("crowd.radius_px", self.crowd.radius_px as f64)?;
        non_negative("crowd.min_duration_secs", self.crowd.min_duration_secs)?;
        if self.crowd.min_size < 2 {
            return Err(anyhow!("config: crowd.min_size must be at least 2"));
        }

        let mut zone_ids = HashSet::new();
        for zone in &self.zones {
            crate::validate_zone_id(&zone.id).map_err(|e| anyhow!("config: {}", e))?;
            if !zone_ids.insert(zone.id.as_str()) {
                return Err(anyhow!("config: duplicate zone id {}", zone.id));
            }
            if zone.polygon.len() < 3 {
                return Err(anyhow!(
                    "config: zone {} polygon needs at least 3 vertices",
                    zone.id
                ));
            }
            if zone.polygon.iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
                return Err(anyhow!("config: zone {} polygon has non-finite vertex", zone.id));
            }
            if zone.classes.is_empty() {
                return Err(anyhow!("config: zone {} applies to no classes", zone.id));
            }
        }

        let a = &self.alerts;
        non_negative("alerts.dedup_window_secs", a.dedup_window_secs)?;
        non_negative("alerts.cooldown_secs", a.cooldown_secs)?;
        positive("alerts.location_cell_px", a.location_cell_px as f64)?;

        self.moments.validate()?;

        let mut source_ids = HashSet::new();
        for source in &self.sources {
            crate::validate_source_id(&source.id).map_err(|e| anyhow!("config: {}", e))?;
            if !source_ids.insert(source.id.as_str()) {
                return Err(anyhow!("config: duplicate source id {}", source.id));
            }
            if source.feed.is_empty() {
                return Err(anyhow!("config: source {} has no feed", source.id));
            }
        }

        if self.sink.kind != SinkKind::Log && self.sink.path.is_none() {
            return Err(anyhow!("config: {:?} sink requires a path", self.sink.kind));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<KernelConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn parse_class(label: &str) -> Result<ObjectClass> {
    ObjectClass::parse(label).ok_or_else(|| anyhow!("config: unknown object class {:?}", label))
}

/// `camera:a=stub://loiter,camera:b=/var/lib/vigil/b.jsonl`
fn parse_sources(value: &str) -> Result<Vec<SourceSettings>> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (id, feed) = entry
                .split_once('=')
                .ok_or_else(|| anyhow!("VIGIL_SOURCES entry {:?} must be id=feed", entry))?;
            Ok(SourceSettings {
                id: id.trim().to_lowercase(),
                feed: feed.trim().to_string(),
            })
        })
        .collect()
}

pub(crate) fn non_negative(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(anyhow!("config: {} must be a finite value >= 0 (got {})", name, value));
    }
    Ok(())
}

pub(crate) fn positive(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(anyhow!("config: {} must be a finite value > 0 (got {})", name, value));
    }
    Ok(())
}

fn unit_interval(name: &str, value: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(anyhow!("config: {} must lie within 0..=1 (got {})", name, value));
    }
    Ok(())
}
