//! # Artifact Manager
//!
//! Uploads blobs to object storage, empties buckets before their stacks are
//! deleted, and fetches artifacts conditionally by etag from `s3://`,
//! `http(s)://` and `file://` locations.
use std::fs;
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use url::Url;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::kernel::error::{Error, Result};
use crate::provider::error::{ApiError, ApiResult, codes};

/// Maximum number of keys listed and deleted per request.
pub const OBJECTS_PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObject {
    pub body: Vec<u8>,
    pub etag: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectPage {
    pub keys: Vec<String>,
    pub next_token: Option<String>,
}

/// Raw object storage API.
#[async_trait]
pub trait ObjectStoreApi: Send + Sync {
    /// Returns the etag of the stored object.
    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>, key_id: Option<&str>) -> ApiResult<String>;

    /// Fails with [`codes::NOT_MODIFIED`] when `if_none_match` equals the current etag.
    async fn get_object(&self, bucket: &str, key: &str, if_none_match: Option<&str>) -> ApiResult<StoredObject>;

    async fn list_objects(&self, bucket: &str, next_token: Option<String>, max_keys: usize) -> ApiResult<ObjectPage>;

    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> ApiResult<()>;
}

/// Result of a conditional fetch. `body` is `None` when the caller's etag is still current.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedArtifact {
    pub body: Option<Vec<u8>>,
    pub etag: String,
}

pub struct ArtifactManager {
    api: Arc<dyn ObjectStoreApi>,
    http: reqwest::Client,
    dryrun: bool,
}

impl ArtifactManager {
    pub fn new(api: Arc<dyn ObjectStoreApi>, dryrun: bool) -> Self {
        Self {
            api,
            http: reqwest::Client::new(),
            dryrun,
        }
    }

    /// Send `http(s)://` fetches through `proxy`.
    pub fn with_proxy(mut self, proxy: &str) -> Result<Self> {
        let to_err = |e: reqwest::Error| Error::parse("proxy", proxy, e);
        let proxy_config = reqwest::Proxy::all(proxy).map_err(to_err)?;
        self.http = reqwest::Client::builder().proxy(proxy_config).build().map_err(to_err)?;
        debug!("Using proxy '{proxy}' for artifact downloads");
        Ok(self)
    }

    /// Upload `body` to `dest_uri`, which must be an `s3://bucket/key` URI.
    pub async fn create_artifact(&self, body: Vec<u8>, dest_uri: &str, key_ref: &str) -> Result<()> {
        let (bucket, key) = parse_object_uri(dest_uri)?;
        if self.dryrun {
            info!("  DRYRUN: Skipping upload of artifact to '{dest_uri}'");
            return Ok(());
        }
        debug!("Creating artifact at '{dest_uri}'");
        let key_id = (!key_ref.is_empty()).then_some(key_ref);
        self.api
            .put_object(&bucket, &key, body, key_id)
            .await
            .map(|_| ())
            .map_err(|e| Error::provider("PutObject", dest_uri, e))
    }

    /// Delete every object in `bucket`. A missing bucket is already empty.
    pub async fn empty_bucket(&self, bucket: &str) -> Result<()> {
        if self.dryrun {
            info!("  DRYRUN: Skipping emptying of bucket '{bucket}'");
            return Ok(());
        }
        let mut next_token = None;
        loop {
            let page = match self.api.list_objects(bucket, next_token, OBJECTS_PAGE_SIZE).await {
                Ok(page) => page,
                Err(err) if err.is(codes::NO_SUCH_BUCKET) => {
                    debug!("Bucket '{bucket}' does not exist");
                    return Ok(());
                }
                Err(err) => return Err(Error::provider("ListObjects", bucket, err)),
            };

            if !page.keys.is_empty() {
                debug!("Deleting {} objects from bucket '{bucket}'", page.keys.len());
                self.api
                    .delete_objects(bucket, &page.keys)
                    .await
                    .map_err(|e| Error::provider("DeleteObjects", bucket, e))?;
            }

            next_token = page.next_token;
            if next_token.is_none() {
                return Ok(());
            }
        }
    }

    /// Fetch `uri` unless its etag still equals `etag`.
    pub async fn get_artifact(&self, uri: &str, etag: &str) -> Result<FetchedArtifact> {
        let url = Url::parse(uri).map_err(|e| Error::parse("artifact url", uri, e))?;
        match url.scheme() {
            "s3" => {
                let (bucket, key) = parse_object_uri(uri)?;
                let if_none_match = (!etag.is_empty()).then_some(etag);
                match self.api.get_object(&bucket, &key, if_none_match).await {
                    Ok(object) => Ok(FetchedArtifact {
                        body: Some(object.body),
                        etag: object.etag,
                    }),
                    Err(err) if err.is(codes::NOT_MODIFIED) => Ok(FetchedArtifact {
                        body: None,
                        etag: etag.to_string(),
                    }),
                    Err(err) => Err(Error::provider("GetObject", uri, err)),
                }
            }
            "http" | "https" => fetch_http(&self.http, url, etag).await,
            "file" => {
                let path = url
                    .to_file_path()
                    .map_err(|_| Error::parse("artifact url", uri, "not a local path"))?;
                fetch_file(&path, etag)
            }
            other => Err(Error::parse("artifact url", uri, format!("unknown scheme '{other}'"))),
        }
    }
}

/// Split `s3://bucket/key` into bucket and key.
pub fn parse_object_uri(uri: &str) -> Result<(String, String)> {
    let url = Url::parse(uri).map_err(|e| Error::parse("artifact url", uri, e))?;
    if url.scheme() != "s3" {
        return Err(Error::Other(format!(
            "destURL must have scheme of 's3', received '{}'",
            url.scheme()
        )));
    }
    let bucket = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| Error::parse("artifact url", uri, "missing bucket"))?;
    Ok((bucket.to_string(), url.path().trim_start_matches('/').to_string()))
}

/// Hex md5 of a file's contents, used as the etag of local artifacts.
pub fn md5_file(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).map_err(|e| Error::io(e, "read", path))?;
    Ok(hex::encode(Md5::digest(&bytes)))
}

fn fetch_file(path: &Path, etag: &str) -> Result<FetchedArtifact> {
    let new_etag = md5_file(path)?;
    if !etag.is_empty() && etag == new_etag {
        return Ok(FetchedArtifact {
            body: None,
            etag: new_etag,
        });
    }
    let body = std::fs::read(path).map_err(|e| Error::io(e, "read", path))?;
    Ok(FetchedArtifact {
        body: Some(body),
        etag: new_etag,
    })
}

async fn fetch_http(client: &reqwest::Client, url: Url, etag: &str) -> Result<FetchedArtifact> {
    let target = url.to_string();
    let to_err = |e: reqwest::Error| Error::provider("GET", &target, ApiError::new("HttpError", e.to_string()));

    let response = client
        .get(url.clone())
        .header(reqwest::header::IF_NONE_MATCH, etag)
        .send()
        .await
        .map_err(to_err)?;

    if response.status() == reqwest::StatusCode::NOT_MODIFIED {
        return Ok(FetchedArtifact {
            body: None,
            etag: etag.to_string(),
        });
    }
    let response = response.error_for_status().map_err(to_err)?;
    let new_etag = response
        .headers()
        .get(reqwest::header::ETAG)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let body = response.bytes().await.map_err(to_err)?;
    Ok(FetchedArtifact {
        body: Some(body.to_vec()),
        etag: new_etag,
    })
}

/// Zip the contents of `dir` (without `.git`) into an in-memory archive.
pub fn zip_directory(dir: &Path) -> Result<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    add_directory(&mut writer, dir, dir)?;
    let cursor = writer.finish().map_err(|e| Error::serialization("zip archive", e))?;
    Ok(cursor.into_inner())
}

fn add_directory(writer: &mut ZipWriter<Cursor<Vec<u8>>>, root: &Path, dir: &Path) -> Result<()> {
    let mut entries = fs::read_dir(dir)
        .map_err(|e| Error::io(e, "read directory", dir))?
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|e| Error::io(e, "read directory", dir))?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let path = entry.path();
        if entry.file_name() == ".git" {
            continue;
        }
        let name = path
            .strip_prefix(root)
            .unwrap_or(&path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if path.is_dir() {
            writer
                .add_directory(format!("{name}/"), SimpleFileOptions::default())
                .map_err(|e| Error::serialization("zip archive", e))?;
            add_directory(writer, root, &path)?;
        } else {
            let body = fs::read(&path).map_err(|e| Error::io(e, "read", &path))?;
            writer
                .start_file(name, SimpleFileOptions::default())
                .map_err(|e| Error::serialization("zip archive", e))?;
            writer.write_all(&body).map_err(|e| Error::io(e, "write archive entry", &path))?;
        }
    }
    Ok(())
}
