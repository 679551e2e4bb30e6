use chrono::{DateTime, Duration, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::FailureKind;

// --- Platforms ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    YouTube,
    TikTok,
    Instagram,
    Reddit,
    X,
    Rumble,
    Twitch,
    Pinterest,
    LinkedIn,
    Snapchat,
    Facebook,
    Bilibili,
    PublicDomain,
    MetaSearch,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::YouTube => "youtube",
            Platform::TikTok => "tiktok",
            Platform::Instagram => "instagram",
            Platform::Reddit => "reddit",
            Platform::X => "x",
            Platform::Rumble => "rumble",
            Platform::Twitch => "twitch",
            Platform::Pinterest => "pinterest",
            Platform::LinkedIn => "linkedin",
            Platform::Snapchat => "snapchat",
            Platform::Facebook => "facebook",
            Platform::Bilibili => "bilibili",
            Platform::PublicDomain => "public_domain",
            Platform::MetaSearch => "metasearch",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Platform {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "youtube" => Ok(Self::YouTube),
            "tiktok" => Ok(Self::TikTok),
            "instagram" => Ok(Self::Instagram),
            "reddit" => Ok(Self::Reddit),
            "x" => Ok(Self::X),
            "rumble" => Ok(Self::Rumble),
            "twitch" => Ok(Self::Twitch),
            "pinterest" => Ok(Self::Pinterest),
            "linkedin" => Ok(Self::LinkedIn),
            "snapchat" => Ok(Self::Snapchat),
            "facebook" => Ok(Self::Facebook),
            "bilibili" => Ok(Self::Bilibili),
            "public_domain" => Ok(Self::PublicDomain),
            "metasearch" => Ok(Self::MetaSearch),
            other => Err(format!("unknown Platform: {other}")),
        }
    }
}

// --- Discovery horizon ---

/// How far back a discovery sweep looks. Wire form is `24h`/`7d`/`30d`
/// (used verbatim in cache keys).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Horizon {
    #[serde(rename = "24h")]
    Day,
    #[serde(rename = "7d")]
    Week,
    #[serde(rename = "30d")]
    Month,
}

impl Horizon {
    /// Wall-clock cutoff for `published_after` filtering.
    pub fn published_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Horizon::Day => now - Duration::days(1),
            Horizon::Week => now - Duration::days(7),
            Horizon::Month => now - Duration::days(30),
        }
    }
}

impl std::fmt::Display for Horizon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Horizon::Day => write!(f, "24h"),
            Horizon::Week => write!(f, "7d"),
            Horizon::Month => write!(f, "30d"),
        }
    }
}

impl std::str::FromStr for Horizon {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "24h" => Ok(Self::Day),
            "7d" => Ok(Self::Week),
            "30d" => Ok(Self::Month),
            other => Err(format!("unknown Horizon: {other}")),
        }
    }
}

// --- Content candidates ---

/// A third-party source video discovered by a scanner adapter.
/// Identity is `id` (platform-prefixed, globally unique). After first
/// insert only `views`, `engagement_score` and `viral_score` may change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentCandidate {
    pub id: String,
    pub platform: Platform,
    pub url: String,
    pub author: String,
    pub title: String,
    pub description: String,
    pub thumbnail_url: Option<String>,
    pub views: u64,
    /// Normalized engagement rate, always within [0, 1].
    pub engagement_score: f64,
    /// Predicted viral potential, always within [0, 100].
    pub viral_score: f64,
    pub duration_seconds: f64,
    pub discovered_at: DateTime<Utc>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub niche: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl ContentCandidate {
    /// Create a candidate with score invariants enforced by clamping.
    pub fn new(id: impl Into<String>, platform: Platform, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            platform,
            url: url.into(),
            author: String::new(),
            title: String::new(),
            description: String::new(),
            thumbnail_url: None,
            views: 0,
            engagement_score: 0.0,
            viral_score: 0.0,
            duration_seconds: 0.0,
            discovered_at: Utc::now(),
            tags: Vec::new(),
            niche: String::new(),
            metadata: serde_json::Map::new(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn with_views(mut self, views: u64) -> Self {
        self.views = views;
        self
    }

    pub fn with_engagement(mut self, score: f64) -> Self {
        self.engagement_score = score.clamp(0.0, 1.0);
        self
    }

    pub fn with_viral_score(mut self, score: f64) -> Self {
        self.viral_score = score.clamp(0.0, 100.0);
        self
    }

    /// Re-apply the score invariants (used after deserializing foreign data).
    pub fn clamp_scores(&mut self) {
        self.engagement_score = self.engagement_score.clamp(0.0, 1.0);
        self.viral_score = self.viral_score.clamp(0.0, 100.0);
    }

    /// Last-write-wins merge of the mutable fields from a rescan.
    /// Immutable fields keep their first-inserted values.
    pub fn absorb_rescan(&mut self, newer: &ContentCandidate) {
        self.views = newer.views;
        self.engagement_score = newer.engagement_score.clamp(0.0, 1.0);
        self.viral_score = newer.viral_score.clamp(0.0, 100.0);
    }
}

/// The analyzed structure of a candidate. At most one per candidate,
/// last write wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViralPattern {
    pub id: Uuid,
    pub content_id: String,
    /// Strength of the opening hook, 0.0-1.0.
    pub hook_score: f64,
    /// Estimated watch-through rate, 0.0-1.0.
    pub retention_estimate: f64,
    pub pacing_bpm: Option<f64>,
    pub style_keywords: Vec<String>,
    pub emotional_triggers: Vec<String>,
    pub analyzed_at: DateTime<Utc>,
}

/// A user-declared topical tag that sweeps and ranking are parameterized by.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoredNiche {
    pub niche: String,
    pub is_active: bool,
    pub last_scanned_at: Option<DateTime<Utc>>,
}

/// Derived per-niche aggregate, recomputable from candidates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NicheTrend {
    pub niche: String,
    pub platform: Platform,
    pub top_keywords: Vec<String>,
    pub avg_engagement: f64,
    pub last_updated: DateTime<Utc>,
}

// --- Transformation strategy ---

/// Clip-transform selector. `f6`..`f12` with a fixed application order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum FilterId {
    #[serde(rename = "f6")]
    SpeedRamp,
    #[serde(rename = "f7")]
    CinematicOverlay,
    #[serde(rename = "f8")]
    Jitter,
    #[serde(rename = "f9")]
    Glow,
    #[serde(rename = "f10")]
    FilmGrain,
    #[serde(rename = "f11")]
    Grayscale,
    #[serde(rename = "f12")]
    Glitch,
}

/// Filters always apply in this order regardless of how they were selected.
pub const FILTER_ORDER: [FilterId; 7] = [
    FilterId::SpeedRamp,
    FilterId::Jitter,
    FilterId::CinematicOverlay,
    FilterId::Glow,
    FilterId::FilmGrain,
    FilterId::Grayscale,
    FilterId::Glitch,
];

impl FilterId {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterId::SpeedRamp => "f6",
            FilterId::CinematicOverlay => "f7",
            FilterId::Jitter => "f8",
            FilterId::Glow => "f9",
            FilterId::FilmGrain => "f10",
            FilterId::Grayscale => "f11",
            FilterId::Glitch => "f12",
        }
    }
}

impl std::fmt::Display for FilterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for FilterId {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "f6" => Ok(Self::SpeedRamp),
            "f7" => Ok(Self::CinematicOverlay),
            "f8" => Ok(Self::Jitter),
            "f9" => Ok(Self::Glow),
            "f10" => Ok(Self::FilmGrain),
            "f11" => Ok(Self::Grayscale),
            "f12" => Ok(Self::Glitch),
            other => Err(format!("unknown FilterId: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum Vibe {
    #[default]
    Neutral,
    Energetic,
    Calm,
    Educational,
    Dramatic,
}

impl Vibe {
    /// Caption fill color for this vibe.
    pub fn caption_color(&self) -> &'static str {
        match self {
            Vibe::Dramatic => "#FFFFFF",
            Vibe::Energetic => "#00FF00",
            _ => "#FFE100",
        }
    }
}

/// Hard-coded style presets used when the planner LLM is unavailable
/// or returns garbage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StylePreset {
    Cinematic,
    AsmrCalm,
    GlitchHighArt,
    NoirClassic,
}

impl std::str::FromStr for StylePreset {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "cinematic" => Ok(Self::Cinematic),
            "asmr_calm" => Ok(Self::AsmrCalm),
            "glitch_high_art" => Ok(Self::GlitchHighArt),
            "noir_classic" => Ok(Self::NoirClassic),
            other => Err(format!("unknown StylePreset: {other}")),
        }
    }
}

/// The AI-produced plan for a single transformation run.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Strategy {
    /// `[min, max]` speed multiplier range for the speed-ramp filter.
    pub speed_range: [f64; 2],
    pub jitter_intensity: f64,
    pub recommended_filters: Vec<FilterId>,
    /// `[start, end]` sub-clips of the source deemed high-retention.
    pub hook_points: Vec<[f64; 2]>,
    pub b_roll_keywords: Vec<String>,
    pub vibe: Vibe,
    pub explanation: String,
}

impl Default for Strategy {
    fn default() -> Self {
        Self {
            speed_range: [0.98, 1.02],
            jitter_intensity: 1.0,
            recommended_filters: Vec::new(),
            hook_points: Vec::new(),
            b_roll_keywords: Vec::new(),
            vibe: Vibe::Neutral,
            explanation: String::new(),
        }
    }
}

impl Strategy {
    /// Normalize an LLM-produced strategy into safe ranges.
    pub fn sanitized(mut self) -> Self {
        let lo = self.speed_range[0].clamp(0.5, 2.0);
        let hi = self.speed_range[1].clamp(0.5, 2.0);
        self.speed_range = if lo <= hi { [lo, hi] } else { [hi, lo] };
        self.jitter_intensity = self.jitter_intensity.clamp(0.0, 5.0);
        self.recommended_filters.dedup();
        self.hook_points.retain(|h| h[1] > h[0] && h[0] >= 0.0);
        self
    }
}

/// Word- or segment-level transcript timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// Where rendered captions go, derived from on-screen text detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CaptionPlacement {
    Top,
    Center,
    #[default]
    Bottom,
}

impl CaptionPlacement {
    /// Relative vertical position of the caption baseline.
    pub fn relative_y(&self) -> f64 {
        match self {
            CaptionPlacement::Top => 0.15,
            CaptionPlacement::Center => 0.5,
            CaptionPlacement::Bottom => 0.8,
        }
    }
}

// --- Jobs ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Discovery,
    Transform,
    Nexus,
    ScheduledPost,
    AuditReport,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobKind::Discovery => write!(f, "discovery"),
            JobKind::Transform => write!(f, "transform"),
            JobKind::Nexus => write!(f, "nexus"),
            JobKind::ScheduledPost => write!(f, "scheduled_post"),
            JobKind::AuditReport => write!(f, "audit_report"),
        }
    }
}

impl std::str::FromStr for JobKind {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "discovery" => Ok(Self::Discovery),
            "transform" => Ok(Self::Transform),
            "nexus" => Ok(Self::Nexus),
            "scheduled_post" => Ok(Self::ScheduledPost),
            "audit_report" => Ok(Self::AuditReport),
            other => Err(format!("unknown JobKind: {other}")),
        }
    }
}

/// Job lifecycle. `Running` carries a free-form stage label
/// ("Downloading", "Rendering", "TikTok Upload"). Once `Completed`, a job
/// may only move to `Archived`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running(String),
    Completed,
    Failed(FailureKind),
    Archived,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed(_) | JobStatus::Archived
        )
    }

    /// Whether a transition to `next` is allowed. Terminal states are
    /// frozen except Completed → Archived.
    pub fn allows(&self, next: &JobStatus) -> bool {
        match self {
            JobStatus::Completed => matches!(next, JobStatus::Archived),
            JobStatus::Failed(_) | JobStatus::Archived => false,
            _ => true,
        }
    }

    /// Short wire string stored in the job row.
    pub fn as_wire(&self) -> String {
        match self {
            JobStatus::Queued => "queued".to_string(),
            JobStatus::Running(stage) => format!("running:{stage}"),
            JobStatus::Completed => "completed".to_string(),
            JobStatus::Failed(kind) => format!("failed:{kind}"),
            JobStatus::Archived => "archived".to_string(),
        }
    }

    pub fn from_wire(s: &str) -> std::result::Result<Self, String> {
        if let Some(stage) = s.strip_prefix("running:") {
            return Ok(JobStatus::Running(stage.to_string()));
        }
        if let Some(kind) = s.strip_prefix("failed:") {
            return Ok(JobStatus::Failed(kind.parse()?));
        }
        match s {
            "queued" => Ok(JobStatus::Queued),
            "completed" => Ok(JobStatus::Completed),
            "archived" => Ok(JobStatus::Archived),
            other => Err(format!("unknown JobStatus: {other}")),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_wire())
    }
}

/// A durable record of one unit of pipeline work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub kind: JobKind,
    pub owner_id: i64,
    pub title: String,
    pub status: JobStatus,
    /// 0..=100, monotone non-decreasing until a terminal transition.
    pub progress: u8,
    /// What the job consumes (source URL for transforms, niche for discovery).
    pub input_ref: String,
    /// What the job produced (local path or object key).
    pub output_ref: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(kind: JobKind, owner_id: i64, input_ref: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            kind,
            owner_id,
            title: String::new(),
            status: JobStatus::Queued,
            progress: 0,
            input_ref: input_ref.into(),
            output_ref: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }
}

// --- Social accounts and tokens ---

/// OAuth-style credentials for one platform account. `expires_at` is
/// always absolute UTC.
#[derive(Clone, Serialize, Deserialize)]
pub struct SocialToken {
    pub platform: Platform,
    pub account_handle: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_type: Option<String>,
    pub scope: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub owner_id: i64,
}

impl SocialToken {
    /// A token with no recorded expiry is treated as expired.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(at) => now >= at,
            None => true,
        }
    }

    /// Expired, or close enough to expiry that an upload should not
    /// start without a refresh.
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(at) => now >= at - Duration::seconds(60),
            None => true,
        }
    }
}

// Tokens are secrets. Debug output masks them so they cannot leak
// through logs or error chains.
impl std::fmt::Debug for SocialToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocialToken")
            .field("platform", &self.platform)
            .field("account_handle", &self.account_handle)
            .field("access_token", &redact(&self.access_token))
            .field("refresh_token", &self.refresh_token.as_deref().map(redact))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

fn redact(secret: &str) -> String {
    if secret.len() <= 8 {
        "***".to_string()
    } else {
        format!("{}***", &secret[..4])
    }
}

/// Incoming token grant from an OAuth exchange or refresh.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenPayload {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    /// Seconds until expiry; converted to absolute UTC at store time.
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub open_id: Option<String>,
}

// --- Scheduled posts ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostStatus {
    Pending,
    /// Claimed by a sweep; at most one publisher invocation in flight.
    Publishing,
    Published,
    Failed,
}

impl std::fmt::Display for PostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PostStatus::Pending => write!(f, "pending"),
            PostStatus::Publishing => write!(f, "publishing"),
            PostStatus::Published => write!(f, "published"),
            PostStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for PostStatus {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "publishing" => Ok(Self::Publishing),
            "published" => Ok(Self::Published),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown PostStatus: {other}")),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PostMetadata {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub hashtags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledPost {
    pub id: Uuid,
    /// Local path or object key of the rendered video.
    pub video_ref: String,
    pub platform: Platform,
    pub account_id: Option<i64>,
    pub scheduled_for: DateTime<Utc>,
    pub status: PostStatus,
    pub metadata: PostMetadata,
}

/// History entry written when a scheduled post goes out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishedRecord {
    pub id: Uuid,
    pub title: String,
    pub platform: Platform,
    pub url: String,
    pub account_id: Option<i64>,
    pub published_at: DateTime<Utc>,
}

// --- Audit ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditSeverity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub severity: AuditSeverity,
    pub details: serde_json::Value,
}

/// Result of a system integrity audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditReport {
    pub score: u8,
    pub findings: Vec<String>,
    pub timestamp: DateTime<Utc>,
}
