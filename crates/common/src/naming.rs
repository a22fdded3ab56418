//! Display names for folders and files in the virtual filesystem

/// Characters that cannot appear in a path component on common filesystems.
const FORBIDDEN: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Make a title safe to use as a path component.
pub fn clean_title(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .map(|c| if FORBIDDEN.contains(&c) || c.is_control() { ' ' } else { c })
        .collect();
    let cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    cleaned.trim_end_matches('.').trim().to_string()
}

/// `Title (Year)`, or just `Title` when the year is unknown.
pub fn titled_folder(title: &str, year: Option<u16>) -> String {
    match year {
        Some(year) => format!("{} ({})", title, year),
        None => title.to_string(),
    }
}

/// Season directory name, e.g. `Season 01`.
pub fn season_folder(season: u32) -> String {
    format!("Season {:02}", season)
}

/// Episode tag, e.g. `S01E02` or `S01E02-E03` for multi-episode files.
pub fn episode_tag(season: u32, episodes: &[u32]) -> String {
    let mut tag = format!("S{:02}", season);
    match episodes {
        [] => {}
        [only] => tag.push_str(&format!("E{:02}", only)),
        [first, .., last] => tag.push_str(&format!("E{:02}-E{:02}", first, last)),
    }
    tag
}

/// `Title (Year).ext`
pub fn movie_file_name(title: &str, year: Option<u16>, extension: &str) -> String {
    format!("{}{}", titled_folder(title, year), extension)
}

/// `Title S01E02.ext`
pub fn episode_file_name(title: &str, season: u32, episodes: &[u32], extension: &str) -> String {
    format!("{} {}{}", title, episode_tag(season, episodes), extension)
}

/// A year may arrive as a bare number or as the first entry of a list.
pub fn clean_year(year: Option<&serde_json::Value>) -> Option<u16> {
    match year? {
        serde_json::Value::Number(n) => n.as_u64().and_then(|y| u16::try_from(y).ok()),
        serde_json::Value::String(s) => s.trim().get(..4).and_then(|y| y.parse().ok()),
        serde_json::Value::Array(values) => clean_year(values.first()),
        _ => None,
    }
    .filter(|y| (1870..=2100).contains(y))
}
