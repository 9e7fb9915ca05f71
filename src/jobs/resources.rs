use std::path::{Path, PathBuf};

const MAX_RESOURCE_ID_LEN: usize = 128;

/// Extensions tried, in order, when a resource id has none of its own.
pub const DEFAULT_MEDIA_EXTENSIONS: &[&str] =
    &["wav", "mp3", "flac", "ogg", "opus", "m4a", "webm", "mp4"];

/// Checks that an id is safe to use as a single path component.
pub fn is_valid_resource_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_RESOURCE_ID_LEN
        && id != "."
        && id != ".."
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

/// Resolves resource ids to media files.
pub trait ResourceLocator: Send + Sync {
    fn locate(&self, resource_id: &str) -> Option<PathBuf>;
}

/// Looks resources up as files in a single media directory.
pub struct DirectoryResourceLocator {
    media_dir: PathBuf,
    extensions: Vec<String>,
}

impl DirectoryResourceLocator {
    pub fn new<P: AsRef<Path>>(media_dir: P) -> Self {
        Self {
            media_dir: media_dir.as_ref().to_path_buf(),
            extensions: DEFAULT_MEDIA_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
        }
    }

    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions;
        self
    }
}

impl ResourceLocator for DirectoryResourceLocator {
    fn locate(&self, resource_id: &str) -> Option<PathBuf> {
        if !is_valid_resource_id(resource_id) {
            return None;
        }

        let exact = self.media_dir.join(resource_id);
        if exact.is_file() {
            return Some(exact);
        }

        self.extensions
            .iter()
            .map(|ext| self.media_dir.join(format!("{}.{}", resource_id, ext)))
            .find(|candidate| candidate.is_file())
    }
}
