//! Built-in social analysis tools.
//!
//! - `analyze_profile`: public metrics scraped from a profile page
//! - `calculate_engagement`: engagement rate from caller-supplied numbers
//! - `detect_trends`: recurring keywords in search results for a niche
//! - `research_hashtags`: hashtags that co-occur with a topic

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use serde_json::{Map, Value, json};

use super::{PageFetcher, ToolDefinition, ToolError, ToolHandler};
use crate::protocol::{Tool, ToolAnnotations};

/// Platforms with a known public profile URL
pub const PLATFORMS: &[&str] = &["instagram", "tiktok", "youtube", "twitter"];

/// All built-in tool definitions.
pub fn definitions(fetcher: Arc<dyn PageFetcher>) -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            tool: tool(
                "analyze_profile",
                "Analyze a public social media profile: followers, following, posts and likes where visible.",
                json!({
                    "type": "object",
                    "properties": {
                        "platform": {"type": "string", "enum": PLATFORMS, "description": "Social platform"},
                        "username": {"type": "string", "minLength": 1, "maxLength": 64, "description": "Handle, with or without @"}
                    },
                    "required": ["platform", "username"]
                }),
                true,
            ),
            handler: Arc::new(AnalyzeProfile {
                fetcher: Arc::clone(&fetcher),
            }),
        },
        ToolDefinition {
            tool: tool(
                "calculate_engagement",
                "Calculate engagement rate from follower count and interaction totals.",
                json!({
                    "type": "object",
                    "properties": {
                        "followers": {"type": "integer", "minimum": 1, "description": "Follower count"},
                        "likes": {"type": "integer", "minimum": 0, "description": "Total likes"},
                        "comments": {"type": "integer", "minimum": 0, "description": "Total comments"},
                        "shares": {"type": "integer", "minimum": 0, "description": "Total shares"},
                        "saves": {"type": "integer", "minimum": 0, "description": "Total saves"},
                        "posts": {"type": "integer", "minimum": 1, "description": "Number of posts the totals cover (default 1)"}
                    },
                    "required": ["followers", "likes", "comments"]
                }),
                false,
            ),
            handler: Arc::new(CalculateEngagement),
        },
        ToolDefinition {
            tool: tool(
                "detect_trends",
                "Detect trending keywords for a niche from current search results.",
                json!({
                    "type": "object",
                    "properties": {
                        "niche": {"type": "string", "minLength": 2, "maxLength": 100, "description": "Niche or industry"},
                        "platform": {"type": "string", "enum": PLATFORMS, "description": "Restrict to one platform"}
                    },
                    "required": ["niche"]
                }),
                true,
            ),
            handler: Arc::new(DetectTrends {
                fetcher: Arc::clone(&fetcher),
            }),
        },
        ToolDefinition {
            tool: tool(
                "research_hashtags",
                "Find hashtags commonly used alongside a topic.",
                json!({
                    "type": "object",
                    "properties": {
                        "topic": {"type": "string", "minLength": 2, "maxLength": 100, "description": "Topic to research"}
                    },
                    "required": ["topic"]
                }),
                true,
            ),
            handler: Arc::new(ResearchHashtags { fetcher }),
        },
    ]
}

fn tool(name: &str, description: &str, input_schema: Value, open_world: bool) -> Tool {
    Tool {
        name: name.to_string(),
        title: None,
        description: Some(description.to_string()),
        input_schema,
        annotations: Some(ToolAnnotations {
            read_only_hint: Some(true),
            open_world_hint: Some(open_world),
        }),
    }
}

fn str_arg<'a>(args: &'a Map<String, Value>, name: &str) -> &'a str {
    args.get(name).and_then(Value::as_str).unwrap_or_default()
}

fn u64_arg(args: &Map<String, Value>, name: &str) -> Option<u64> {
    args.get(name).and_then(Value::as_u64)
}

// ── analyze_profile ───────────────────────────────────────────────────────

struct AnalyzeProfile {
    fetcher: Arc<dyn PageFetcher>,
}

#[async_trait]
impl ToolHandler for AnalyzeProfile {
    async fn call(&self, args: Map<String, Value>) -> Result<String, ToolError> {
        let platform = str_arg(&args, "platform");
        let username = normalize_username(str_arg(&args, "username"))?;
        let url = profile_url(platform, &username)
            .ok_or_else(|| ToolError::InvalidParams(format!("unsupported platform '{platform}'")))?;

        let text = self.fetcher.fetch_text(&url).await?;
        let metrics = extract_metrics(&text);

        let mut out = format!("Profile analysis for @{username} on {platform}\nSource: {url}\n\n");
        if metrics.is_empty() {
            out.push_str("No public metrics were visible on the profile page. The account may be private or the page requires a login.\n");
            return Ok(out);
        }
        for (label, value) in &metrics {
            let _ = writeln!(out, "- {label}: {}", format_count(*value));
        }
        if let (Some(followers), Some(following)) =
            (lookup(&metrics, "followers"), lookup(&metrics, "following"))
        {
            if following > 0 {
                #[allow(clippy::cast_precision_loss)]
                let ratio = followers as f64 / following as f64;
                let _ = writeln!(out, "- follower/following ratio: {ratio:.2}");
            }
        }
        Ok(out)
    }
}

fn normalize_username(raw: &str) -> Result<String, ToolError> {
    static VALID: OnceLock<Regex> = OnceLock::new();
    let valid = VALID.get_or_init(|| Regex::new(r"^[A-Za-z0-9._-]{1,64}$").unwrap());
    let name = raw.trim().trim_start_matches('@');
    if valid.is_match(name) {
        Ok(name.to_string())
    } else {
        Err(ToolError::InvalidParams(format!(
            "'username' contains invalid characters: {raw}"
        )))
    }
}

/// Public profile URL for a platform handle.
#[must_use]
pub fn profile_url(platform: &str, username: &str) -> Option<String> {
    match platform {
        "instagram" => Some(format!("https://www.instagram.com/{username}/")),
        "tiktok" => Some(format!("https://www.tiktok.com/@{username}")),
        "youtube" => Some(format!("https://www.youtube.com/@{username}")),
        "twitter" => Some(format!("https://x.com/{username}")),
        _ => None,
    }
}

/// Pull "1.2M followers"-style counts out of page text, first hit per label.
#[must_use]
pub fn extract_metrics(text: &str) -> Vec<(&'static str, u64)> {
    const LABELS: [&str; 6] = [
        "followers",
        "following",
        "posts",
        "likes",
        "subscribers",
        "videos",
    ];
    static METRIC: OnceLock<Regex> = OnceLock::new();
    let metric = METRIC.get_or_init(|| {
        Regex::new(
            r"(?i)(\d[\d.,]*\s?[KMB]?)\s+(followers|following|posts|likes|subscribers|videos)\b",
        )
        .unwrap()
    });

    let mut found: Vec<(&'static str, u64)> = Vec::new();
    for caps in metric.captures_iter(text) {
        let label = caps[2].to_ascii_lowercase();
        let Some(label) = LABELS.iter().copied().find(|l| *l == label) else {
            continue;
        };
        if found.iter().any(|(l, _)| *l == label) {
            continue;
        }
        if let Some(value) = parse_compact_number(&caps[1]) {
            found.push((label, value));
        }
    }
    found
}

fn lookup(metrics: &[(&'static str, u64)], label: &str) -> Option<u64> {
    metrics.iter().find(|(l, _)| *l == label).map(|(_, v)| *v)
}

/// Parse counts like `1,234`, `12.5K`, `3M` or `1.1B`.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn parse_compact_number(raw: &str) -> Option<u64> {
    let s = raw.trim().replace([',', ' '], "");
    let (digits, multiplier) = match s.chars().last()?.to_ascii_uppercase() {
        'K' => (&s[..s.len() - 1], 1_000.0),
        'M' => (&s[..s.len() - 1], 1_000_000.0),
        'B' => (&s[..s.len() - 1], 1_000_000_000.0),
        _ => (s.as_str(), 1.0),
    };
    let value: f64 = digits.parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some((value * multiplier).round() as u64)
}

#[allow(clippy::cast_precision_loss)]
fn format_count(n: u64) -> String {
    match n {
        0..1_000 => n.to_string(),
        1_000..1_000_000 => format!("{:.1}K", n as f64 / 1_000.0),
        1_000_000..1_000_000_000 => format!("{:.1}M", n as f64 / 1_000_000.0),
        _ => format!("{:.1}B", n as f64 / 1_000_000_000.0),
    }
}

// ── calculate_engagement ──────────────────────────────────────────────────

struct CalculateEngagement;

/// Interaction totals for an engagement calculation.
#[derive(Debug, Clone, Copy, Default)]
pub struct Interactions {
    /// Likes
    pub likes: u64,
    /// Comments
    pub comments: u64,
    /// Shares
    pub shares: u64,
    /// Saves
    pub saves: u64,
}

impl Interactions {
    /// Sum of all interactions, saturating at `u64::MAX`.
    fn total(self) -> u64 {
        self.likes
            .saturating_add(self.comments)
            .saturating_add(self.shares)
            .saturating_add(self.saves)
    }
}

/// Average engagement per post as a percentage of followers.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn engagement_rate(followers: u64, interactions: Interactions, posts: u64) -> f64 {
    if followers == 0 || posts == 0 {
        return 0.0;
    }
    interactions.total() as f64 / posts as f64 / followers as f64 * 100.0
}

/// Qualitative band for an engagement rate.
#[must_use]
pub fn engagement_rating(rate: f64) -> &'static str {
    if rate >= 6.0 {
        "Excellent"
    } else if rate >= 3.0 {
        "Good"
    } else if rate >= 1.0 {
        "Average"
    } else {
        "Low"
    }
}

#[async_trait]
impl ToolHandler for CalculateEngagement {
    async fn call(&self, args: Map<String, Value>) -> Result<String, ToolError> {
        let followers = u64_arg(&args, "followers").unwrap_or(0);
        let posts = u64_arg(&args, "posts").unwrap_or(1);
        let interactions = Interactions {
            likes: u64_arg(&args, "likes").unwrap_or(0),
            comments: u64_arg(&args, "comments").unwrap_or(0),
            shares: u64_arg(&args, "shares").unwrap_or(0),
            saves: u64_arg(&args, "saves").unwrap_or(0),
        };

        let rate = engagement_rate(followers, interactions, posts);
        let mut out = String::from("Engagement analysis\n\n");
        let _ = writeln!(out, "- followers: {}", format_count(followers));
        let _ = writeln!(out, "- posts analyzed: {posts}");
        let _ = writeln!(out, "- total interactions: {}", interactions.total());
        let _ = writeln!(out, "- engagement rate: {rate:.2}%");
        let _ = writeln!(out, "- rating: {}", engagement_rating(rate));
        Ok(out)
    }
}

// ── detect_trends ─────────────────────────────────────────────────────────

struct DetectTrends {
    fetcher: Arc<dyn PageFetcher>,
}

#[async_trait]
impl ToolHandler for DetectTrends {
    async fn call(&self, args: Map<String, Value>) -> Result<String, ToolError> {
        let niche = str_arg(&args, "niche").trim();
        let platform = args.get("platform").and_then(Value::as_str);
        let year = chrono::Utc::now().format("%Y");
        let query = match platform {
            Some(p) => format!("{niche} trends {p} {year}"),
            None => format!("{niche} trends {year}"),
        };

        let text = self.fetcher.search(&query).await?;
        let mut exclude: Vec<String> = niche.split_whitespace().map(str::to_lowercase).collect();
        exclude.extend(["trends", "trend", "trending"].map(String::from));
        if let Some(p) = platform {
            exclude.push(p.to_string());
        }
        let keywords = top_keywords(&text, &exclude, 10);

        let mut out = format!("Trend signals for \"{niche}\"");
        if let Some(p) = platform {
            let _ = write!(out, " on {p}");
        }
        out.push_str("\n\n");
        if keywords.is_empty() {
            out.push_str("No recurring keywords found in current search results.\n");
        }
        for (i, (word, count)) in keywords.iter().enumerate() {
            let _ = writeln!(out, "{}. {word} ({count} mentions)", i + 1);
        }
        Ok(out)
    }
}

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "that", "this", "from", "your", "you", "are", "was", "were",
    "will", "have", "has", "had", "but", "not", "all", "can", "our", "out", "about", "more",
    "how", "what", "when", "who", "why", "new", "its", "into", "they", "their", "them", "than",
    "then", "also", "just", "like", "get", "one", "most", "best", "top", "over", "these",
    "those", "which", "some", "any", "here", "there", "been", "being", "www", "com", "http",
    "https", "html",
];

/// Most frequent words of 3+ letters, skipping stopwords and `exclude`.
///
/// Ties are broken alphabetically.
#[must_use]
pub fn top_keywords(text: &str, exclude: &[String], limit: usize) -> Vec<(String, usize)> {
    static WORD: OnceLock<Regex> = OnceLock::new();
    let word = WORD.get_or_init(|| Regex::new(r"[A-Za-z][A-Za-z'-]{2,}").unwrap());

    let mut counts: HashMap<String, usize> = HashMap::new();
    for m in word.find_iter(text) {
        let w = m.as_str().trim_matches(|c| c == '\'' || c == '-').to_lowercase();
        if w.len() < 3 || STOPWORDS.contains(&w.as_str()) || exclude.contains(&w) {
            continue;
        }
        *counts.entry(w).or_insert(0) += 1;
    }
    rank(counts, limit, 2)
}

// ── research_hashtags ─────────────────────────────────────────────────────

struct ResearchHashtags {
    fetcher: Arc<dyn PageFetcher>,
}

#[async_trait]
impl ToolHandler for ResearchHashtags {
    async fn call(&self, args: Map<String, Value>) -> Result<String, ToolError> {
        let topic = str_arg(&args, "topic").trim();
        let text = self.fetcher.search(&format!("#{topic} hashtags")).await?;
        let tags = hashtag_counts(&text, 15);
        let primary = format!("#{}", topic.split_whitespace().collect::<String>().to_lowercase());

        let mut out = format!("Hashtag research for \"{topic}\"\n\nPrimary: {primary}\n\n");
        if tags.is_empty() {
            out.push_str("No related hashtags found in current search results.\n");
        } else {
            out.push_str("Related hashtags:\n");
            for (tag, count) in &tags {
                let _ = writeln!(out, "- {tag} ({count})");
            }
        }
        Ok(out)
    }
}

/// Hashtags found in `text`, lowercased, most frequent first.
#[must_use]
pub fn hashtag_counts(text: &str, limit: usize) -> Vec<(String, usize)> {
    static TAG: OnceLock<Regex> = OnceLock::new();
    let tag = TAG.get_or_init(|| Regex::new(r"#[A-Za-z][A-Za-z0-9_]{1,49}").unwrap());

    let mut counts: HashMap<String, usize> = HashMap::new();
    for m in tag.find_iter(text) {
        *counts.entry(m.as_str().to_lowercase()).or_insert(0) += 1;
    }
    rank(counts, limit, 1)
}

fn rank(counts: HashMap<String, usize>, limit: usize, min_count: usize) -> Vec<(String, usize)> {
    let mut ranked: Vec<(String, usize)> = counts
        .into_iter()
        .filter(|(_, c)| *c >= min_count)
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(limit);
    ranked
}
