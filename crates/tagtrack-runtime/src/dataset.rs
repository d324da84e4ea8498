//! Filesystem-backed [`DatasetCatalog`].
//!
//! Layout: `<root>/<dataset_id>/images/*`, or the images directly in
//! `<root>/<dataset_id>/` for hand-made datasets.

use std::path::{Component, Path, PathBuf};

use tracing::debug;

use tagtrack_core::{CoreError, DatasetCatalog, DatasetInfo};

/// File extensions counted as training images (lowercase).
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "gif", "tiff", "webp"];

#[derive(Debug, Clone)]
pub struct DirectoryDatasetCatalog {
    root: PathBuf,
}

impl DirectoryDatasetCatalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dataset_dir(&self, dataset_id: &str) -> Result<PathBuf, CoreError> {
        let mut components = Path::new(dataset_id).components();
        let single_normal = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        );
        if !single_normal {
            return Err(CoreError::Validation(format!(
                "invalid dataset id {dataset_id:?}"
            )));
        }

        let dir = self.root.join(dataset_id);
        if !dir.is_dir() {
            return Err(CoreError::DatasetNotFound(dataset_id.to_string()));
        }
        let images = dir.join("images");
        Ok(if images.is_dir() { images } else { dir })
    }
}

impl DatasetCatalog for DirectoryDatasetCatalog {
    fn dataset(&self, dataset_id: &str) -> Result<DatasetInfo, CoreError> {
        let dir = self.dataset_dir(dataset_id)?;

        let mut image_count = 0_u64;
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_file() && is_image(&path) {
                image_count += 1;
            }
        }

        debug!(target: "tagtrack.manager", dataset_id, image_count, dir = %dir.display(), "Counted dataset images");
        Ok(DatasetInfo {
            dataset_id: dataset_id.to_string(),
            image_count,
        })
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
}
