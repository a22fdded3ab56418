//! Release-name parsing
//!
//! Extracts a best-effort title, year, season and episode numbers from scene
//! style file names such as `Show.Name.S01E02.1080p.WEB-DL.mkv`. The result is
//! used as the query for the metadata matcher and to name episodes.

use std::sync::LazyLock;

use regex::Regex;

static SEASON_EPISODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bS(\d{1,2}) ?E(\d{1,3})((?:[ -]?E\d{1,3})*)").expect("valid regex")
});
static CROSS_EPISODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(\d{1,2})x(\d{2,3})\b").expect("valid regex"));
static SEASON_ONLY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:S(\d{1,2})|Season (\d{1,2}))\b").expect("valid regex")
});
static EXTRA_EPISODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)E(\d{1,3})").expect("valid regex"));
static YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(?\b((?:19|20)\d{2})\b\)?").expect("valid regex"));
static QUALITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(2160p|1080p|720p|576p|480p|4k|uhd|web ?dl|web-dl|webrip|web|bluray|blu-ray|brrip|bdrip|dvdrip|hdtv|hdrip|x264|x265|h 264|h 265|h264|h265|hevc|avc|remux|proper|repack|extended|unrated|multi|complete)\b",
    )
    .expect("valid regex")
});

const VIDEO_EXTENSIONS: &[&str] = &[
    "mkv", "mp4", "avi", "m4v", "mov", "wmv", "ts", "m2ts", "webm", "mpg", "mpeg",
];

/// Fields parsed from a release name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedRelease {
    pub title: String,
    pub year: Option<u16>,
    pub season: Option<u32>,
    pub episodes: Vec<u32>,
}

impl ParsedRelease {
    /// Whether the name looks like an episode of a show
    pub fn is_episode(&self) -> bool {
        !self.episodes.is_empty()
    }
}

/// Parse a release or file name.
pub fn parse(name: &str) -> ParsedRelease {
    let stem = strip_video_extension(name.trim());
    let text: String = stem
        .chars()
        .map(|c| if c == '.' || c == '_' { ' ' } else { c })
        .collect();

    let mut parsed = ParsedRelease::default();
    let mut title_end = text.len();

    if let Some(caps) = SEASON_EPISODE.captures(&text) {
        if let Some(whole) = caps.get(0) {
            title_end = title_end.min(whole.start());
        }
        parsed.season = caps[1].parse().ok();
        if let Ok(first) = caps[2].parse() {
            parsed.episodes.push(first);
        }
        if let Some(rest) = caps.get(3) {
            for extra in EXTRA_EPISODE.captures_iter(rest.as_str()) {
                if let Ok(ep) = extra[1].parse() {
                    parsed.episodes.push(ep);
                }
            }
        }
    } else if let Some(caps) = CROSS_EPISODE.captures(&text) {
        if let Some(whole) = caps.get(0) {
            title_end = title_end.min(whole.start());
        }
        parsed.season = caps[1].parse().ok();
        if let Ok(ep) = caps[2].parse() {
            parsed.episodes.push(ep);
        }
    } else if let Some(caps) = SEASON_ONLY.captures(&text) {
        if let Some(whole) = caps.get(0) {
            title_end = title_end.min(whole.start());
        }
        parsed.season = caps
            .get(1)
            .or_else(|| caps.get(2))
            .and_then(|m| m.as_str().parse().ok());
    }

    // A leading year is part of the title ("2001 A Space Odyssey").
    let year_match = YEAR
        .captures_iter(&text)
        .find_map(|c| c.get(0).filter(|m| m.start() > 0).map(|m| (m.start(), c[1].parse().ok())));
    if let Some((start, year)) = year_match {
        if start < title_end || parsed.year.is_none() {
            parsed.year = year;
        }
        title_end = title_end.min(start);
    }

    if let Some(m) = QUALITY.find_at(&text, 0).filter(|m| m.start() > 0) {
        title_end = title_end.min(m.start());
    }
    if let Some(pos) = text.find('[').filter(|&p| p > 0) {
        title_end = title_end.min(pos);
    }

    let title = collapse_whitespace(&text[..title_end]);
    let title = title.trim_matches(|c: char| c == '-' || c == '(' || c.is_whitespace());
    parsed.title = if title.is_empty() {
        collapse_whitespace(&text)
    } else {
        title.to_string()
    };

    parsed
}

fn strip_video_extension(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((stem, ext)) if VIDEO_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) => stem,
        _ => name,
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
