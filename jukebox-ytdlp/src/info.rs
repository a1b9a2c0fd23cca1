use crate::error::{Result, YtDlpError};
use jukebox_core::ResolvedSource;
use serde::Deserialize;
use url::Url;

const PROGRESS_PREFIX: &str = "progress:";

/// The subset of yt-dlp's info JSON we use. Flat search entries carry
/// fewer fields than a full extraction, so nearly everything is optional.
#[derive(Debug, Clone, Deserialize)]
pub struct VideoInfo {
    pub id: Option<String>,
    pub title: Option<String>,
    pub webpage_url: Option<String>,
    pub url: Option<String>,
    pub artist: Option<String>,
    pub uploader: Option<String>,
    pub channel: Option<String>,
    pub duration: Option<f64>,
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub thumbnails: Vec<Thumbnail>,
    pub is_live: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Thumbnail {
    pub url: String,
}

impl VideoInfo {
    /// Page URL to hand back to yt-dlp for the download
    #[must_use]
    pub fn locator(&self) -> Option<String> {
        self.webpage_url
            .clone()
            .or_else(|| self.url.clone().filter(|u| is_url(u)))
            .or_else(|| {
                self.id
                    .as_ref()
                    .map(|id| format!("https://www.youtube.com/watch?v={id}"))
            })
    }

    /// # Errors
    ///
    /// Live streams have no end and are `Unsupported`.
    pub fn into_source(self, fallback_locator: &str) -> Result<ResolvedSource> {
        if self.is_live == Some(true) {
            return Err(YtDlpError::Unsupported(
                "live streams cannot be queued".to_string(),
            ));
        }
        let locator = self
            .locator()
            .unwrap_or_else(|| fallback_locator.to_string());
        let Self {
            title,
            artist,
            uploader,
            channel,
            duration,
            thumbnail,
            thumbnails,
            ..
        } = self;

        let mut source = ResolvedSource::new(locator, title.unwrap_or_else(|| "Unknown".into()));
        if let Some(artist) = artist.or(uploader).or(channel) {
            source = source.with_artist(artist);
        }
        if let Some(secs) = duration.filter(|d| d.is_finite() && *d > 0.0) {
            source = source.with_duration(secs);
        }
        if let Some(url) = thumbnail.or_else(|| thumbnails.into_iter().last().map(|t| t.url)) {
            source = source.with_thumbnail(url);
        }
        Ok(source)
    }
}

/// Parse a line printed by our `--progress-template`
#[must_use]
pub fn parse_progress(line: &str) -> Option<f32> {
    line.trim()
        .strip_prefix(PROGRESS_PREFIX)?
        .trim()
        .trim_end_matches('%')
        .trim()
        .parse::<f32>()
        .ok()
        .filter(|p| p.is_finite())
}

/// Progress template handed to yt-dlp, matched by [`parse_progress`]
pub(crate) fn progress_template() -> String {
    format!("download:{PROGRESS_PREFIX}%(progress._percent_str)s")
}

pub(crate) fn search_target(query: &str, results: u8) -> String {
    format!("ytsearch{}:{query}", results.max(1))
}

pub(crate) fn is_url(input: &str) -> bool {
    Url::parse(input).is_ok_and(|u| matches!(u.scheme(), "http" | "https"))
}
