use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum TrustError {
    #[error("malformed known_hosts entry at {}:{line_no}: {line:?}", path.display())]
    Format {
        path: PathBuf,
        line_no: usize,
        line: String,
    },
    #[error("failed to read known_hosts {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to write known_hosts {}: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },
    #[error("refusing to record invalid trust entry: {0}")]
    InvalidRecord(String),
}

/// Host to certificate fingerprint mapping backed by an append-only file.
///
/// Each line is `<host> <fingerprint>`. A host may appear more than once on
/// disk; the last line for it wins.
#[derive(Debug, Clone)]
pub struct TrustStore {
    path: PathBuf,
    hosts: BTreeMap<String, String>,
}

impl TrustStore {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, TrustError> {
        let path = path.into();
        let hosts = read_known_hosts(&path)?;
        debug!(path = %path.display(), hosts = hosts.len(), "loaded known hosts");
        Ok(Self { path, hosts })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn hosts(&self) -> &BTreeMap<String, String> {
        &self.hosts
    }

    pub fn fingerprint_for(&self, host: &str) -> Option<&str> {
        self.hosts.get(host).map(String::as_str)
    }

    /// Appends a trust decision and syncs it to disk before returning.
    pub fn record(&mut self, host: &str, fingerprint: &str) -> Result<(), TrustError> {
        validate_field("host", host)?;
        validate_field("fingerprint", fingerprint)?;

        let write_err = |source| TrustError::Write {
            path: self.path.clone(),
            source,
        };
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&self.path)
            .map_err(write_err)?;

        // A hand-edited file may lack the trailing newline.
        let mut entry = String::new();
        if !ends_with_newline(&mut file).map_err(write_err)? {
            entry.push('\n');
        }
        entry.push_str(&format!("{host} {fingerprint}\n"));
        file.write_all(entry.as_bytes()).map_err(write_err)?;
        file.sync_all().map_err(write_err)?;

        self.hosts.insert(host.to_string(), fingerprint.to_string());
        info!(host, path = %self.path.display(), "recorded trusted certificate");
        Ok(())
    }
}

fn validate_field(name: &str, value: &str) -> Result<(), TrustError> {
    if value.is_empty() || value.chars().any(char::is_whitespace) {
        return Err(TrustError::InvalidRecord(format!(
            "{name} must be non-empty and contain no whitespace"
        )));
    }
    Ok(())
}

fn ends_with_newline(file: &mut fs::File) -> io::Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0_u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

/// Reads `{host: fingerprint}` from `path`. A missing file is an empty mapping.
///
/// Every line must be exactly two fields, blank lines included; anything
/// else fails the whole load and nothing partial is returned.
pub fn read_known_hosts(path: &Path) -> Result<BTreeMap<String, String>, TrustError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(source) => {
            return Err(TrustError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let mut hosts = BTreeMap::new();
    for (idx, line) in raw.lines().enumerate() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let [host, fingerprint] = fields.as_slice() else {
            return Err(TrustError::Format {
                path: path.to_path_buf(),
                line_no: idx + 1,
                line: line.to_string(),
            });
        };
        hosts.insert((*host).to_string(), (*fingerprint).to_string());
    }
    Ok(hosts)
}
