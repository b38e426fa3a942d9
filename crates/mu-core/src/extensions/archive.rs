//! Extensions distributed as zip archives (or plain directories for `file://` urls).
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::Deserialize;
use sha1::{Digest, Sha1};
use url::Url;

use crate::artifact::ArtifactManager;
use crate::extensions::Extension;
use crate::kernel::error::{Error, Result};

const ETAG_FILE: &str = ".etag";
const MANIFEST_FILE: &str = "mu-extension.yml";
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

#[derive(Debug, Default, Deserialize)]
struct ExtensionManifest {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    version: Option<serde_yaml::Value>,
}

/// An extension unpacked into a local directory.
#[derive(Debug, Clone)]
pub struct ArchiveExtension {
    id: String,
    url: String,
    path: PathBuf,
}

/// Cache id of an extension: hex sha1 of its url.
pub fn extension_id(url: &str) -> String {
    hex::encode(Sha1::digest(url.as_bytes()))
}

/// Resolve `raw` to an absolute url; bare paths are relative to `basedir`.
pub fn parse_extension_url(raw: &str, basedir: &Path) -> Result<Url> {
    match Url::parse(raw) {
        Ok(url) => Ok(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => Url::from_file_path(basedir.join(raw))
            .map_err(|_| Error::parse("extension url", raw, "unable to handle relative path")),
        Err(err) => Err(Error::parse("extension url", raw, err)),
    }
}

impl ArchiveExtension {
    /// Fetch the extension at `raw_url` into `cache_root`, reusing the cached copy
    /// while its etag is current. Local directories are used in place.
    pub async fn load(raw_url: &str, basedir: &Path, artifacts: &ArtifactManager, cache_root: &Path) -> Result<Self> {
        let url = parse_extension_url(raw_url, basedir)?;
        let id = extension_id(url.as_str());
        let cache_dir = cache_root.join(&id);
        let etag_file = cache_dir.join(ETAG_FILE);
        let etag = fs::read_to_string(&etag_file).unwrap_or_default();

        let local_dir = if url.scheme() == "file" {
            url.to_file_path().ok().filter(|p| p.is_dir())
        } else {
            None
        };

        let path = match local_dir {
            Some(dir) => {
                debug!("Loaded extension from '{}'", dir.display());
                dir
            }
            None => {
                let fetched = artifacts.get_artifact(url.as_str(), &etag).await?;
                match fetched.body {
                    Some(body) => {
                        if cache_dir.exists() {
                            fs::remove_dir_all(&cache_dir).map_err(|e| Error::io(e, "remove", &cache_dir))?;
                        }
                        fs::create_dir_all(&cache_dir).map_err(|e| Error::io(e, "create", &cache_dir))?;
                        extract_archive(&body, &cache_dir, &url)?;
                        fs::write(&etag_file, &fetched.etag).map_err(|e| Error::io(e, "write", &etag_file))?;
                        debug!("Loaded extension from '{url}' [id={id}]");
                    }
                    None => debug!("Loaded extension from cache [id={id}]"),
                }
                cache_dir
            }
        };

        log_manifest(&path, &url);
        Ok(Self {
            id,
            url: url.to_string(),
            path,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Extension for ArchiveExtension {
    fn id(&self) -> &str {
        &self.id
    }

    fn template_overlay(&self, template_name: &str, _stack_name: &str) -> Option<serde_yaml::Value> {
        let asset = format!("{}.yml", template_name.trim_end_matches(".yml"));
        let asset_path = self.path.join(&asset);
        let body = match fs::read_to_string(&asset_path) {
            Ok(body) => body,
            Err(err) => {
                debug!("Unable to find asset '{asset}' in extension '{}': {err}", self.id);
                return None;
            }
        };
        match serde_yaml::from_str::<serde_yaml::Value>(&body) {
            Ok(overlay) if !overlay.is_null() => Some(overlay),
            Ok(_) => None,
            Err(err) => {
                warn!("Unable to parse asset '{asset}' in extension '{}': {err}", self.id);
                None
            }
        }
    }
}

fn extract_archive(body: &[u8], dest: &Path, url: &Url) -> Result<()> {
    if !body.starts_with(ZIP_MAGIC) {
        return Err(Error::parse("extension archive", url.as_str(), "not a zip archive"));
    }
    let mut archive =
        zip::ZipArchive::new(Cursor::new(body)).map_err(|e| Error::parse("extension archive", url.as_str(), e))?;
    debug!("Extracting {} entries to '{}'", archive.len(), dest.display());
    archive
        .extract(dest)
        .map_err(|e| Error::parse("extension archive", url.as_str(), e))
}

fn log_manifest(path: &Path, url: &Url) {
    let manifest_file = path.join(MANIFEST_FILE);
    let manifest = match fs::read_to_string(&manifest_file) {
        Ok(body) => serde_yaml::from_str::<ExtensionManifest>(&body).unwrap_or_else(|err| {
            debug!("error unmarshalling {MANIFEST_FILE}: {err}");
            ExtensionManifest::default()
        }),
        Err(err) => {
            debug!("error reading {MANIFEST_FILE}: {err}");
            ExtensionManifest::default()
        }
    };

    match (manifest.name, manifest.version) {
        (Some(name), Some(version)) => info!("Loaded extension {name} (version={})", scalar_string(&version)),
        (Some(name), None) => info!("Loaded extension {name}"),
        _ => info!("Loaded extension {url}"),
    }
}

fn scalar_string(value: &serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other).unwrap_or_default().trim().to_string(),
    }
}
