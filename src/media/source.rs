use crate::error::MediaError;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Camera collaborator producing encoded frames as opaque strings.
///
/// The media stream is a scoped resource: `acquire` before capturing,
/// `release` when done. `release` is synchronous so it can run from `Drop`.
#[async_trait]
pub trait FrameSource: Send {
    async fn acquire(&mut self) -> Result<(), MediaError>;

    /// Next encoded frame
    async fn capture(&mut self) -> Result<String, MediaError>;

    fn release(&mut self);

    fn is_acquired(&self) -> bool;
}

/// Still images from a directory, served in file-name order as data URLs
pub struct DirectoryFrameSource {
    dir: PathBuf,
    loop_source: bool,
    files: Vec<PathBuf>,
    position: usize,
    acquired: bool,
}

impl DirectoryFrameSource {
    pub fn new<P: Into<PathBuf>>(dir: P, loop_source: bool) -> Self {
        Self {
            dir: dir.into(),
            loop_source,
            files: Vec::new(),
            position: 0,
            acquired: false,
        }
    }

    pub fn frame_count(&self) -> usize {
        self.files.len()
    }

    fn mime_type(path: &Path) -> Option<&'static str> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "jpg" | "jpeg" => Some("image/jpeg"),
            "png" => Some("image/png"),
            _ => None,
        }
    }

    fn map_io_error(&self, e: std::io::Error) -> MediaError {
        let details = format!("{}: {}", self.dir.display(), e);
        match e.kind() {
            ErrorKind::PermissionDenied => MediaError::PermissionDenied { details },
            _ => MediaError::NotAvailable { details },
        }
    }
}

#[async_trait]
impl FrameSource for DirectoryFrameSource {
    async fn acquire(&mut self) -> Result<(), MediaError> {
        if self.acquired {
            return Ok(());
        }

        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| self.map_io_error(e))?;

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| self.map_io_error(e))?
        {
            let path = entry.path();
            if Self::mime_type(&path).is_some() {
                files.push(path);
            }
        }
        files.sort();

        if files.is_empty() {
            return Err(MediaError::NotAvailable {
                details: format!("no .jpg/.jpeg/.png frames in {}", self.dir.display()),
            });
        }

        info!("Frame source opened: {} images in {}", files.len(), self.dir.display());
        self.files = files;
        self.position = 0;
        self.acquired = true;
        Ok(())
    }

    async fn capture(&mut self) -> Result<String, MediaError> {
        if !self.acquired {
            return Err(MediaError::NotAcquired);
        }

        if self.position >= self.files.len() {
            if !self.loop_source {
                return Err(MediaError::Capture {
                    details: "frame source exhausted".to_string(),
                });
            }
            debug!("Frame source wrapped around");
            self.position = 0;
        }

        let path = &self.files[self.position];
        self.position += 1;

        let mime = Self::mime_type(path).unwrap_or("application/octet-stream");
        let bytes = tokio::fs::read(path).await.map_err(|e| MediaError::Capture {
            details: format!("{}: {}", path.display(), e),
        })?;

        Ok(format!("data:{};base64,{}", mime, BASE64.encode(bytes)))
    }

    fn release(&mut self) {
        if self.acquired {
            debug!("Frame source released: {}", self.dir.display());
        }
        self.acquired = false;
        self.files.clear();
        self.position = 0;
    }

    fn is_acquired(&self) -> bool {
        self.acquired
    }
}

/// Serves a fixed list of payloads; for tests and demos
pub struct MemoryFrameSource {
    frames: Vec<String>,
    position: usize,
    acquired: bool,
    fail_acquire: Option<MediaError>,
    releases: Arc<AtomicU32>,
}

impl MemoryFrameSource {
    pub fn new<I, S>(frames: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            frames: frames.into_iter().map(Into::into).collect(),
            position: 0,
            acquired: false,
            fail_acquire: None,
            releases: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Make `acquire` fail with `error`, like a camera without permission
    pub fn failing(error: MediaError) -> Self {
        let mut source = Self::new(Vec::<String>::new());
        source.fail_acquire = Some(error);
        source
    }

    /// Counter of effective releases, readable after the source is moved
    pub fn release_counter(&self) -> Arc<AtomicU32> {
        Arc::clone(&self.releases)
    }
}

#[async_trait]
impl FrameSource for MemoryFrameSource {
    async fn acquire(&mut self) -> Result<(), MediaError> {
        if let Some(error) = &self.fail_acquire {
            return Err(error.clone());
        }
        self.acquired = true;
        Ok(())
    }

    async fn capture(&mut self) -> Result<String, MediaError> {
        if !self.acquired {
            return Err(MediaError::NotAcquired);
        }
        if self.frames.is_empty() {
            return Err(MediaError::Capture {
                details: "no frames".to_string(),
            });
        }
        let frame = self.frames[self.position % self.frames.len()].clone();
        self.position += 1;
        Ok(frame)
    }

    fn release(&mut self) {
        if self.acquired {
            self.acquired = false;
            self.releases.fetch_add(1, Ordering::Relaxed);
        } else {
            warn!("Release of a frame source that was not acquired");
        }
    }

    fn is_acquired(&self) -> bool {
        self.acquired
    }
}
