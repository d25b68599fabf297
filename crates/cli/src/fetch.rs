use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};

use ticknet::{
    Collaborators, DirSpool, DownloadConfig, FileRequest, HttpDownload, LogProgress, TaskRuntime,
};

pub fn run(
    base_url: &str,
    resource: &str,
    announced_size: u64,
    out_dir: &Path,
    config: DownloadConfig,
) -> Result<()> {
    let runtime = TaskRuntime::new();
    let request = FileRequest {
        base_url: base_url.to_string(),
        resource: resource.to_string(),
        announced_size,
    };
    let collaborators = Collaborators::new(Arc::new(DirSpool::new(out_dir)));

    let mut download = HttpDownload::start(&runtime, request, &config, collaborators);
    let mut progress = LogProgress::default();

    while !download.is_finished() || download.is_busy() {
        download.tick(&mut progress);
        std::thread::sleep(Duration::from_millis(1));
    }

    if let Some(error) = download.error() {
        bail!("{}", error);
    }

    let path = download
        .spool_path()
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    log::info!(
        "Saved {} bytes to {} ({:?})",
        download.transferred(),
        path,
        download.payload_format()
    );
    Ok(())
}
