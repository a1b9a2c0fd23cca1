//! Resolver and downloader backed by the `yt-dlp` executable.

mod error;
mod info;

pub use error::{Phase, Result, YtDlpError};
pub use info::{Thumbnail, VideoInfo, parse_progress};

use async_trait::async_trait;
use info::{is_url, progress_template, search_target};
use jukebox_core::{Downloader, ProgressSender, ResolvedSource, Resolver, YtDlpConfig};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

const LOG_TARGET: &str = "jukebox::ytdlp";

/// Runs `yt-dlp` as a child process per request
pub struct YtDlp {
    binary: String,
    ffmpeg_location: Option<PathBuf>,
    search_results: u8,
    audio_format: String,
    download_dir: PathBuf,
}

impl YtDlp {
    #[must_use]
    pub fn new(config: &YtDlpConfig, download_dir: PathBuf) -> Self {
        Self {
            binary: config.binary.clone(),
            ffmpeg_location: config.ffmpeg_location.clone(),
            search_results: config.search_results,
            audio_format: config.audio_format.clone(),
            download_dir,
        }
    }

    #[must_use]
    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(["--ignore-config", "--no-warnings"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    fn spawn_error(&self, source: std::io::Error) -> YtDlpError {
        YtDlpError::Spawn {
            binary: self.binary.clone(),
            source,
        }
    }

    /// Run to completion and return stdout
    async fn run(&self, mut cmd: Command) -> Result<String> {
        let output = cmd.output().await.map_err(|e| self.spawn_error(e))?;
        if !output.status.success() {
            return Err(YtDlpError::from_stderr(&String::from_utf8_lossy(
                &output.stderr,
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Extract metadata for a single URL without downloading.
    ///
    /// # Errors
    ///
    /// Returns the classified yt-dlp failure.
    pub async fn resolve_url(&self, url: &str) -> Result<ResolvedSource> {
        let mut cmd = self.command();
        cmd.args(["--dump-json", "--no-playlist", "--skip-download", "--"])
            .arg(url);
        let stdout = self.run(cmd).await?;
        let line = stdout.lines().find(|l| !l.trim().is_empty()).unwrap_or("{}");
        let info: VideoInfo = serde_json::from_str(line)?;
        info.into_source(url)
    }

    /// Free-text search returning up to `search_results` candidates.
    ///
    /// # Errors
    ///
    /// Returns the classified yt-dlp failure.
    pub async fn search(&self, query: &str) -> Result<Vec<ResolvedSource>> {
        let mut cmd = self.command();
        cmd.args(["--dump-json", "--flat-playlist"])
            .arg(search_target(query, self.search_results));
        let stdout = self.run(cmd).await?;

        let mut found = Vec::new();
        for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
            let info: VideoInfo = match serde_json::from_str(line) {
                Ok(info) => info,
                Err(e) => {
                    debug!(target: LOG_TARGET, "skipping unparsable search entry: {e}");
                    continue;
                }
            };
            match info.into_source(query) {
                Ok(source) => found.push(source),
                Err(e) => debug!(target: LOG_TARGET, "skipping search entry: {e}"),
            }
        }
        info!(target: LOG_TARGET, query, results = found.len(), "search complete");
        Ok(found)
    }

    /// Download and convert to `<download_dir>/<file_stem>.<audio_format>`.
    ///
    /// # Errors
    ///
    /// Returns the classified yt-dlp failure, or `Format` when no file
    /// was produced.
    pub async fn download(
        &self,
        locator: &str,
        file_stem: &str,
        progress: &ProgressSender,
    ) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.download_dir).await?;
        // declared before the child so it runs after kill_on_drop
        let mut leftovers = Leftovers::new(&self.download_dir, file_stem);
        let template = self.download_dir.join(format!("{file_stem}.%(ext)s"));

        let mut cmd = self.command();
        cmd.args(["-x", "--audio-format", &self.audio_format])
            .args(["--no-playlist", "--newline", "--progress"])
            .arg("--progress-template")
            .arg(progress_template())
            .args(["--print", "after_move:filepath", "-o"])
            .arg(&template);
        if let Some(dir) = &self.ffmpeg_location {
            cmd.arg("--ffmpeg-location").arg(dir);
        }
        cmd.arg("--").arg(locator);

        debug!(target: LOG_TARGET, locator, "starting download");
        let mut child = cmd.spawn().map_err(|e| self.spawn_error(e))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| YtDlpError::Io(std::io::Error::other("stdout not captured")))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| YtDlpError::Io(std::io::Error::other("stderr not captured")))?;
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        });

        let printed = read_download_output(BufReader::new(stdout), progress).await?;
        let status = child.wait().await?;
        let stderr = stderr_task.await.unwrap_or_default();
        if !status.success() {
            return Err(YtDlpError::from_stderr(&stderr));
        }

        let path = printed.unwrap_or_else(|| {
            self.download_dir
                .join(format!("{file_stem}.{}", self.audio_format))
        });
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            warn!(target: LOG_TARGET, path = %path.display(), "yt-dlp reported success without output");
            return Err(YtDlpError::Format(format!(
                "no audio file at {}",
                path.display()
            )));
        }
        leftovers.keep();
        let _ = progress.send(100.0);
        info!(target: LOG_TARGET, path = %path.display(), "download complete");
        Ok(path)
    }
}

/// Removes `<stem>.*` from the download directory when dropped, unless
/// [`Leftovers::keep`] was called. Covers `.part` files, fragments and
/// pre-conversion media left by failed or abandoned downloads.
struct Leftovers<'a> {
    dir: &'a Path,
    prefix: String,
    keep: bool,
}

impl<'a> Leftovers<'a> {
    fn new(dir: &'a Path, file_stem: &str) -> Self {
        Self {
            dir,
            prefix: format!("{file_stem}."),
            keep: false,
        }
    }

    const fn keep(&mut self) {
        self.keep = true;
    }
}

impl Drop for Leftovers<'_> {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        let Ok(entries) = std::fs::read_dir(self.dir) else {
            return;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            if !name.to_string_lossy().starts_with(&self.prefix) {
                continue;
            }
            let path = entry.path();
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    debug!(target: LOG_TARGET, path = %path.display(), "removed partial download");
                }
                Err(e) => {
                    warn!(target: LOG_TARGET, path = %path.display(), "could not remove partial download: {e}");
                }
            }
        }
    }
}

/// Forward progress lines and return the last other line, which is the
/// final file path printed after post-processing.
async fn read_download_output<R>(reader: R, progress: &ProgressSender) -> Result<Option<PathBuf>>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut printed = None;
    while let Some(line) = lines.next_line().await? {
        if let Some(pct) = parse_progress(&line) {
            let _ = progress.send(pct);
        } else if !line.trim().is_empty() {
            printed = Some(PathBuf::from(line.trim()));
        }
    }
    Ok(printed)
}

#[async_trait]
impl Resolver for YtDlp {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    async fn search_or_resolve(
        &self,
        query_or_url: &str,
    ) -> jukebox_core::Result<Vec<ResolvedSource>> {
        let query = query_or_url.trim();
        let result = if is_url(query) {
            self.resolve_url(query).await.map(|source| vec![source])
        } else {
            self.search(query).await
        };
        result.map_err(|e| e.into_core(Phase::Resolve, query))
    }
}

#[async_trait]
impl Downloader for YtDlp {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    async fn fetch(
        &self,
        locator: &str,
        file_stem: &str,
        progress: ProgressSender,
    ) -> jukebox_core::Result<PathBuf> {
        self.download(locator, file_stem, &progress)
            .await
            .map_err(|e| e.into_core(Phase::Download, locator))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jukebox_core::CoreError;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("jukebox-ytdlp-tests").join(name);
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    /// A stand-in `yt-dlp` that leaves a `.part` file and then runs `tail`
    #[cfg(unix)]
    fn fake_ytdlp(dir: &Path, stem: &str, tail: &str) -> YtDlp {
        use std::os::unix::fs::PermissionsExt;

        let bin_dir = dir.with_extension("bin");
        std::fs::create_dir_all(&bin_dir).unwrap();
        let script = bin_dir.join("yt-dlp");
        let body = format!(
            "#!/bin/sh\necho partial > '{}/{stem}.webm.part'\n{tail}\n",
            dir.display()
        );
        std::fs::write(&script, body).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let config = YtDlpConfig {
            binary: script.to_string_lossy().into_owned(),
            ..YtDlpConfig::default()
        };
        YtDlp::new(&config, dir.to_path_buf())
    }

    fn dir_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_read_download_output() {
        let output: &[u8] =
            b"progress:   0.0%\nprogress:  12.5%\nprogress: N/A\nprogress:100.0%\n/srv/dl/song-4.mp3\n";
        let (tx, mut rx) = mpsc::unbounded_channel();
        let printed = read_download_output(BufReader::new(output), &tx).await.unwrap();
        assert_eq!(printed, Some(PathBuf::from("/srv/dl/song-4.mp3")));

        let mut seen = Vec::new();
        while let Ok(pct) = rx.try_recv() {
            seen.push(pct);
        }
        assert_eq!(seen, vec![0.0, 12.5, 100.0]);
    }

    #[tokio::test]
    async fn test_missing_binary_is_network_error() {
        let config = YtDlpConfig {
            binary: "/nonexistent/yt-dlp-for-tests".into(),
            ..YtDlpConfig::default()
        };
        let ytdlp = YtDlp::new(&config, std::env::temp_dir().join("jukebox-ytdlp-tests"));
        let err = ytdlp.search_or_resolve("some song").await.unwrap_err();
        assert!(matches!(err, CoreError::ResolveNetwork { .. }));
        assert!(err.to_string().contains("could not start"));
    }

    #[test]
    fn test_leftovers_match_stem_only() {
        let dir = scratch_dir("leftovers");
        for name in ["song-7.webm.part", "song-7.webm", "song-70.mp3", "song-8.mp3"] {
            std::fs::write(dir.join(name), b"x").unwrap();
        }
        drop(Leftovers::new(&dir, "song-7"));
        assert_eq!(dir_names(&dir), vec!["song-70.mp3", "song-8.mp3"]);

        let mut kept = Leftovers::new(&dir, "song-8");
        kept.keep();
        drop(kept);
        assert_eq!(dir_names(&dir), vec!["song-70.mp3", "song-8.mp3"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_abandoned_download_removes_partial_files() {
        let dir = scratch_dir("abandoned");
        let ytdlp = fake_ytdlp(&dir, "song-7", "sleep 30");
        let part = dir.join("song-7.webm.part");
        let (tx, _rx) = mpsc::unbounded_channel();

        let fetch = ytdlp.fetch("https://example.com/v", "song-7", tx);
        tokio::select! {
            result = fetch => panic!("download finished unexpectedly: {result:?}"),
            () = async {
                while !part.exists() {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            } => {}
        }

        assert!(dir_names(&dir).is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_download_removes_partial_files() {
        let dir = scratch_dir("failed");
        let ytdlp = fake_ytdlp(
            &dir,
            "song-9",
            "echo 'ERROR: HTTP Error 403: Forbidden' >&2\nexit 1",
        );
        let (tx, _rx) = mpsc::unbounded_channel();

        let err = ytdlp
            .fetch("https://example.com/v", "song-9", tx)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::DownloadNetwork { .. }), "{err:?}");
        assert!(dir_names(&dir).is_empty());
    }
}
