use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

pub type SpoolWriter = Box<dyn Write + Send>;

/// Creates the temporary files downloads are written into.
pub trait SpoolFactory: Send + Sync {
    fn create(&self, name: &str) -> io::Result<(SpoolWriter, PathBuf)>;
}

#[derive(Debug, Clone)]
pub struct DirSpool {
    dir: PathBuf,
}

impl DirSpool {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl SpoolFactory for DirSpool {
    fn create(&self, name: &str) -> io::Result<(SpoolWriter, PathBuf)> {
        let file_name = Path::new(name).file_name().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("'{}' is not a valid file name", name),
            )
        })?;

        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(file_name);
        let file = File::create(&path)?;
        Ok((Box::new(BufWriter::new(file)), path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dir_spool_creates_directory_and_file() {
        let temp = tempfile::tempdir().unwrap();
        let spool = DirSpool::new(temp.path().join("DownloadTemp"));

        let (mut writer, path) = spool.create("Maps.pkg.uz").unwrap();
        writer.write_all(b"data").unwrap();
        writer.flush().unwrap();
        drop(writer);

        assert_eq!(path, temp.path().join("DownloadTemp").join("Maps.pkg.uz"));
        assert_eq!(fs::read(&path).unwrap(), b"data");
    }

    #[test]
    fn test_dir_spool_strips_directories() {
        let temp = tempfile::tempdir().unwrap();
        let spool = DirSpool::new(temp.path());

        let (_, path) = spool.create("../escape/Pkg.u").unwrap();
        assert_eq!(path, temp.path().join("Pkg.u"));
        assert!(spool.create("..").is_err());
    }
}
