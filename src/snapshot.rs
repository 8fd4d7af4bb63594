//! Raw payload snapshots, to S3 or a local directory.

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use flate2::Compression;
use flate2::write::GzEncoder;
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use tracing::info;

use crate::extract::{LineRoutes, RawPayload};

/// A destination for snapshot objects.
#[async_trait]
pub trait SnapshotSink: Send + Sync {
    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()>;

    /// Human-readable location of `key`, for logs.
    fn location(&self, key: &str) -> String;
}

pub struct S3Sink {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3Sink {
    pub fn new(client: aws_sdk_s3::Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Uses the ambient AWS configuration (env vars, profile, instance role).
    pub async fn from_env(bucket: impl Into<String>) -> Self {
        let config = aws_config::load_from_env().await;
        Self::new(aws_sdk_s3::Client::new(&config), bucket)
    }
}

#[async_trait]
impl SnapshotSink for S3Sink {
    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .send()
            .await
            .with_context(|| format!("S3 PutObject failed for {}", self.location(key)))?;
        Ok(())
    }

    fn location(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket, key)
    }
}

/// Writes snapshots under a local root directory, keys becoming relative paths.
pub struct DirSink {
    root: PathBuf,
}

impl DirSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl SnapshotSink for DirSink {
    async fn put(&self, key: &str, body: Vec<u8>, _content_type: &str) -> Result<()> {
        let path = self.root.join(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        tokio::fs::write(&path, body)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }

    fn location(&self, key: &str) -> String {
        self.root.join(key).display().to_string()
    }
}

/// `{prefix}/{stem}-{YYYYmmddTHHMMSSZ}.json[.gz]`, the prefix being optional.
pub fn snapshot_key(prefix: &str, stem: &str, payload: &RawPayload, compress: bool) -> String {
    let mut filename = format!(
        "{}-{}.json",
        stem,
        payload.captured_at.format("%Y%m%dT%H%M%SZ")
    );
    if compress {
        filename.push_str(".gz");
    }
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        filename
    } else {
        format!("{prefix}/{filename}")
    }
}

/// Serializes `value` as JSON, gzip-compressed when `compress` is set.
pub fn encode_json(value: &impl Serialize, compress: bool) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(value)?;
    if !compress {
        return Ok(json);
    }
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    Ok(encoder.finish()?)
}

/// Writes `value` to `sink` under `key`.
pub async fn write_snapshot(
    sink: &dyn SnapshotSink,
    key: &str,
    value: &impl Serialize,
    compress: bool,
) -> Result<()> {
    let body = encode_json(value, compress)?;
    let content_type = if compress {
        "application/gzip"
    } else {
        "application/json"
    };
    let bytes = body.len();
    sink.put(key, body, content_type).await?;
    info!(location = %sink.location(key), bytes, "Snapshot written");
    Ok(())
}

/// Uploads the selected line routes as raw JSON, returning the object key.
///
/// Without requested line ids the whole catalogue body is written.
pub async fn upload_line_routes(
    sink: &dyn SnapshotSink,
    prefix: &str,
    routes: &LineRoutes,
    compress: bool,
) -> Result<String> {
    let key = snapshot_key(prefix, "line-routes", &routes.catalogue.payload, compress);
    write_snapshot(sink, &key, &routes.selected_body(), compress).await?;
    Ok(key)
}

/// Archives a whole payload (fingerprint, capture time and body) for replay.
pub async fn archive_payload(sink: &dyn SnapshotSink, payload: &RawPayload) -> Result<String> {
    let key = snapshot_key(
        &payload.fingerprint.slug(),
        &payload.fingerprint.slug(),
        payload,
        true,
    );
    write_snapshot(sink, &key, payload, true).await?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::types::RawLine;
    use crate::extract::{Decoded, Extraction, select_lines};
    use crate::fetch::RequestFingerprint;
    use crate::normalize::resolve::ExactNameResolver;
    use chrono::{TimeZone, Utc};
    use flate2::read::GzDecoder;
    use serde_json::json;
    use std::io::Read;

    fn payload() -> RawPayload {
        RawPayload {
            fingerprint: RequestFingerprint::new("/Line/Route", &[("modes", "tube".into())]),
            captured_at: Utc.with_ymd_and_hms(2026, 10, 14, 8, 5, 9).unwrap(),
            body: json!([{"id": "central", "name": "Central"}]),
        }
    }

    fn temp_root(name: &str) -> PathBuf {
        let root = std::env::temp_dir().join(name);
        let _ = std::fs::remove_dir_all(&root);
        root
    }

    #[test]
    fn test_snapshot_key() {
        let p = payload();
        assert_eq!(
            snapshot_key("tfl/routes/", "line-routes", &p, true),
            "tfl/routes/line-routes-20261014T080509Z.json.gz"
        );
        assert_eq!(
            snapshot_key("", "line-routes", &p, false),
            "line-routes-20261014T080509Z.json"
        );
    }

    fn line_routes(line_ids: Option<&[String]>) -> LineRoutes {
        let mut p = payload();
        p.body = json!([
            {"id": "central", "name": "Central"},
            {"id": "victoria", "name": "Victoria"},
            {"id": null, "name": "Mystery"}
        ]);
        let records: Vec<Decoded<RawLine>> = p
            .body
            .as_array()
            .unwrap()
            .iter()
            .enumerate()
            .map(|(index, v)| Decoded {
                index,
                record: serde_json::from_value(v.clone()).unwrap(),
            })
            .collect();
        let selection = select_lines(&records, line_ids, &ExactNameResolver::new());
        LineRoutes {
            catalogue: Extraction {
                payload: p,
                records,
                rejected: vec![],
            },
            filtered: line_ids.is_some(),
            selected: selection.selected,
            unresolved: selection.unresolved,
        }
    }

    fn read_gzip_json(path: &std::path::Path) -> serde_json::Value {
        let compressed = std::fs::read(path).unwrap();
        let mut json = String::new();
        GzDecoder::new(&compressed[..]).read_to_string(&mut json).unwrap();
        serde_json::from_str(&json).unwrap()
    }

    #[tokio::test]
    async fn test_upload_line_routes_gzip() {
        let root = temp_root("tfl_etl_test_snapshot_gzip");
        let sink = DirSink::new(&root);
        let routes = line_routes(None);

        let key = upload_line_routes(&sink, "snapshots", &routes, true)
            .await
            .unwrap();

        assert_eq!(key, "snapshots/line-routes-20261014T080509Z.json.gz");
        let body = read_gzip_json(&root.join(&key));
        assert_eq!(body, routes.catalogue.payload.body);

        std::fs::remove_dir_all(&root).unwrap();
    }

    #[tokio::test]
    async fn test_upload_line_routes_narrowed_to_line_ids() {
        let root = temp_root("tfl_etl_test_snapshot_filtered");
        let sink = DirSink::new(&root);
        let wanted = vec!["central".to_string()];
        let routes = line_routes(Some(&wanted));

        let key = upload_line_routes(&sink, "", &routes, false).await.unwrap();

        let body: serde_json::Value =
            serde_json::from_slice(&std::fs::read(root.join(&key)).unwrap()).unwrap();
        assert_eq!(body, json!([{"id": "central", "name": "Central"}]));

        std::fs::remove_dir_all(&root).unwrap();
    }

    #[tokio::test]
    async fn test_archive_payload_keeps_fingerprint() {
        let root = temp_root("tfl_etl_test_snapshot_archive");
        let sink = DirSink::new(&root);

        let key = archive_payload(&sink, &payload()).await.unwrap();
        assert!(key.starts_with("line-route/line-route-"));

        let envelope = read_gzip_json(&root.join(&key));
        assert_eq!(envelope["fingerprint"]["endpoint"], "/Line/Route");
        assert_eq!(envelope["fingerprint"]["params"]["modes"], "tube");

        std::fs::remove_dir_all(&root).unwrap();
    }
}
