//! Reading and writing containers on disk.
//!
//! The container kind is chosen once, from the file extension, when a path enters the
//! pipeline. Everything past that point works on the in-memory [`Container`].
//!
#[cfg(feature = "netcdf")]
mod netcdf;
mod snapshot;

use std::fs;
use std::path::Path;

use tempfile::Builder;
use tracing::debug;

use crate::{
    dataset::Container,
    errors::{Error, Result},
};

pub use snapshot::SNAPSHOT_EXTENSION;

/// Extensions handled by the netCDF-4 backend. HDF5 files share it since netCDF-4 is HDF5
/// storage.
pub const NETCDF_EXTENSIONS: [&str; 7] = ["nc", "nc4", "netcdf", "h5", "hdf", "hdf5", "he5"];

/// Read and write access to one kind of container
pub trait Codec {
    /// Read a whole container into memory. Files are closed before returning.
    fn open(&self, path: &Path) -> Result<Container>;

    /// Create or truncate `path` and write `container` to it
    fn write(&self, container: &Container, path: &Path) -> Result<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    NetCdf,
    Snapshot,
}

impl Format {
    /// Pick the container kind for a path from its extension
    pub fn sniff(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .ok_or_else(|| Error::UnknownFormat(path.to_path_buf()))?;

        if NETCDF_EXTENSIONS.contains(&extension.as_str()) {
            Ok(Format::NetCdf)
        } else if extension == SNAPSHOT_EXTENSION {
            Ok(Format::Snapshot)
        } else {
            Err(Error::UnknownFormat(path.to_path_buf()))
        }
    }

    /// Whether `path` has an extension of a known container kind
    pub fn recognizes(path: &Path) -> bool {
        Self::sniff(path).is_ok()
    }
}

impl Codec for Format {
    fn open(&self, path: &Path) -> Result<Container> {
        match self {
            Format::Snapshot => snapshot::Snapshot.open(path),

            #[cfg(feature = "netcdf")]
            Format::NetCdf => netcdf::NetCdf.open(path),

            #[cfg(not(feature = "netcdf"))]
            Format::NetCdf => Err(Error::FormatUnavailable("netCDF")),
        }
    }

    fn write(&self, container: &Container, path: &Path) -> Result<()> {
        match self {
            Format::Snapshot => snapshot::Snapshot.write(container, path),

            #[cfg(feature = "netcdf")]
            Format::NetCdf => netcdf::NetCdf.write(container, path),

            #[cfg(not(feature = "netcdf"))]
            Format::NetCdf => Err(Error::FormatUnavailable("netCDF")),
        }
    }
}

/// Open any supported container
pub fn open(path: &Path) -> Result<Container> {
    Format::sniff(path)?.open(path)
}

/// Write a container so that `path` either keeps its previous state or holds the complete
/// new file. Writing goes to a temporary file in the same directory, renamed into place.
pub fn persist(container: &Container, path: &Path) -> Result<()> {
    let format = Format::sniff(path)?;
    replace_atomically(path, |temporary| format.write(container, temporary))
}

/// Copy a file to `path` with the same all-or-nothing guarantee as [`persist`]
pub fn copy_atomically(source: &Path, path: &Path) -> Result<()> {
    replace_atomically(path, |temporary| {
        fs::copy(source, temporary)?;
        Ok(())
    })
}

fn replace_atomically<F>(path: &Path, fill: F) -> Result<()>
where
    F: FnOnce(&Path) -> Result<()>,
{
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let suffix = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{ext}"))
        .unwrap_or_default();
    let temporary = Builder::new()
        .prefix(".nestcat-")
        .suffix(&suffix)
        .tempfile_in(directory)?;

    debug!(temporary = %temporary.path().display(), "Writing to temporary file");
    fill(temporary.path())?;
    temporary.persist(path).map_err(|err| Error::IO(err.error))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::path::PathBuf;

    use crate::testing;

    #[test]
    fn test_sniff() {
        assert_eq!(Format::sniff(Path::new("a/b.nc4")).unwrap(), Format::NetCdf);
        assert_eq!(Format::sniff(Path::new("b.NC")).unwrap(), Format::NetCdf);
        assert_eq!(Format::sniff(Path::new("b.h5")).unwrap(), Format::NetCdf);
        assert_eq!(Format::sniff(Path::new("b.nest")).unwrap(), Format::Snapshot);
        assert!(matches!(
            Format::sniff(Path::new("list.txt")),
            Err(Error::UnknownFormat(_))
        ));
        assert!(Format::sniff(Path::new("noextension")).is_err());
        assert!(Format::recognizes(&PathBuf::from("x.netcdf")));
    }

    #[cfg(not(feature = "netcdf"))]
    #[test]
    fn test_netcdf_unavailable() {
        assert!(matches!(
            open(Path::new("missing.nc")),
            Err(Error::FormatUnavailable(_))
        ));
    }

    #[test]
    fn test_persist_replaces_existing_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("out.nest");
        fs::write(&path, b"old contents")?;

        let container = testing::toy_container(&[1, 2, 3], 0.0);
        persist(&container, &path)?;
        assert_eq!(open(&path)?, container);

        // Only the output remains, no temporary files
        let entries = fs::read_dir(dir.path())?.count();
        assert_eq!(entries, 1);

        Ok(())
    }

    #[test]
    fn test_failed_write_leaves_output_untouched() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("out.nest");
        fs::write(&path, b"old contents")?;

        let result = replace_atomically(&path, |_| Err(Error::Corrupt("boom".into())));
        assert!(result.is_err());
        assert_eq!(fs::read(&path)?, b"old contents");
        assert_eq!(fs::read_dir(dir.path())?.count(), 1);

        Ok(())
    }

    #[test]
    fn test_copy_atomically() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let source = dir.path().join("in.nest");
        let target = dir.path().join("out.nest");
        fs::write(&source, b"granule")?;

        copy_atomically(&source, &target)?;
        assert_eq!(fs::read(&target)?, b"granule");

        Ok(())
    }
}
