//! File Discovery
//!
//! Bootstrap through a shared line-delimited file of peer addresses with an
//! adjacent lock file. Good enough for peers sharing a filesystem; a central
//! discovery server can replace it behind the same three operations.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;

use super::types::PeerId;

pub struct FileDiscovery {
    path: PathBuf,
    lock_path: PathBuf,
}

impl FileDiscovery {
    pub fn new(path: PathBuf) -> Self {
        let mut lock_path = path.clone();
        let mut name = lock_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "discovery".to_string());
        name.push_str(".lck");
        lock_path.set_file_name(name);
        Self { path, lock_path }
    }

    /// Appends the own address to the peer file.
    pub async fn announce(&self, own: &PeerId) -> Result<()> {
        self.lock().await?;
        let result = (|| -> Result<()> {
            let mut contents = self.read_contents()?;
            if !contents.iter().any(|line| line == own.address()) {
                contents.push(own.address().to_string());
                self.write_contents(&contents)?;
            } else {
                tracing::info!("Found registration of self from a previous run");
            }
            Ok(())
        })();
        self.unlock();
        result
    }

    /// All registered peers except the own address.
    pub async fn get_peers(&self, own: &PeerId) -> Result<Vec<PeerId>> {
        self.lock().await?;
        let result = self.read_contents();
        self.unlock();
        Ok(result?
            .into_iter()
            .filter(|line| !line.is_empty() && line != own.address())
            .map(PeerId::new)
            .collect())
    }

    /// Removes a peer (usually the own address on shutdown).
    pub async fn remove(&self, peer: &PeerId) -> Result<()> {
        self.lock().await?;
        let result = (|| -> Result<()> {
            let contents: Vec<String> = self
                .read_contents()?
                .into_iter()
                .filter(|line| line != peer.address())
                .collect();
            self.write_contents(&contents)
        })();
        self.unlock();
        result
    }

    async fn lock(&self) -> Result<()> {
        let mut attempts = 0u32;
        loop {
            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.lock_path)
            {
                Ok(_) => return Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    attempts += 1;
                    if attempts > 500 {
                        anyhow::bail!("discovery lock file {:?} stuck", self.lock_path);
                    }
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn unlock(&self) {
        if let Err(e) = std::fs::remove_file(&self.lock_path) {
            tracing::warn!("Failed to remove discovery lock file: {}", e);
        }
    }

    fn read_contents(&self) -> Result<Vec<String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => Ok(contents
                .lines()
                .map(|line| line.trim().to_string())
                .filter(|line| !line.is_empty())
                .collect()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_contents(&self, lines: &[String]) -> Result<()> {
        let mut body = lines.join("\n");
        if !body.is_empty() {
            body.push('\n');
        }
        std::fs::write(&self.path, body)?;
        Ok(())
    }
}
