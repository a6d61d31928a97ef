//! Enumeration of calibration photographs on disk.

use std::path::{Path, PathBuf};

use image::DynamicImage;
use log::debug;
use walkdir::WalkDir;

use crate::error::CalibrationError;

/// One entry of the image source: a file and its decoded content.
#[derive(Debug)]
pub struct SourceItem {
    pub path: PathBuf,
    pub image: Result<DynamicImage, CalibrationError>,
}

/// Lazy walk over every regular file below a root directory, sorted by file
/// name within each directory. Files are decoded as they are yielded.
pub struct ImageSource {
    entries: walkdir::IntoIter,
}

impl ImageSource {
    /// # Errors
    ///
    /// [`CalibrationError::Config`] if `root` is not an existing directory.
    pub fn new(root: &Path) -> Result<Self, CalibrationError> {
        if !root.is_dir() {
            return Err(CalibrationError::Config(format!(
                "input directory {root:?} does not exist"
            )));
        }
        Ok(ImageSource {
            entries: WalkDir::new(root).sort_by_file_name().into_iter(),
        })
    }
}

impl Iterator for ImageSource {
    type Item = SourceItem;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.entries.next()? {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e.path().map(Path::to_path_buf).unwrap_or_default();
                    return Some(SourceItem {
                        image: Err(CalibrationError::Decode {
                            path: path.clone(),
                            reason: e.to_string(),
                        }),
                        path,
                    });
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.into_path();
            debug!("Reading {path:?}");
            let image = image::open(&path).map_err(|e| CalibrationError::Decode {
                path: path.clone(),
                reason: e.to_string(),
            });
            return Some(SourceItem { path, image });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};
    use std::fs;

    #[test]
    fn test_missing_root_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ImageSource::new(&dir.path().join("missing")),
            Err(CalibrationError::Config(_))
        ));
    }

    #[test]
    fn test_walk_is_recursive_sorted_and_reports_undecodable() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested");
        fs::create_dir(&nested).unwrap();

        let img = GrayImage::from_pixel(4, 4, Luma([7]));
        img.save(dir.path().join("b.png")).unwrap();
        img.save(nested.join("c.png")).unwrap();
        fs::write(dir.path().join("a.png"), b"not an image").unwrap();

        let items: Vec<SourceItem> = ImageSource::new(dir.path()).unwrap().collect();
        let names: Vec<_> = items
            .iter()
            .map(|i| i.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.png", "b.png", "c.png"]);

        assert!(matches!(items[0].image, Err(CalibrationError::Decode { .. })));
        assert!(items[1].image.is_ok());
        assert!(items[2].image.is_ok());
    }

    #[test]
    fn test_empty_directory_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(ImageSource::new(dir.path()).unwrap().count(), 0);
    }
}
