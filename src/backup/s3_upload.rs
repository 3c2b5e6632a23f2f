// plantvault/src/backup/s3_upload.rs
use aws_sdk_s3 as s3;
use s3::config::Region;
use s3::primitives::ByteStream;
use std::path::Path;
use tracing::{info, warn};

use crate::config::SpacesConfig;
use crate::errors::{AppError, Result};

/// Object key for an artifact: `<folder_prefix>/<file name>`.
pub fn object_key(spaces_config: &SpacesConfig, file_path: &Path) -> Result<String> {
    let file_name = file_path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| AppError::InvalidInput(format!("artifact has no file name: {}", file_path.display())))?;

    Ok(match spaces_config.folder_prefix.as_deref().map(|p| p.trim_matches('/')) {
        Some(prefix) if !prefix.is_empty() => format!("{}/{}", prefix, file_name),
        _ => file_name.to_string(),
    })
}

async fn client_for(spaces_config: &SpacesConfig) -> s3::Client {
    let sdk_config = aws_config::defaults(s3::config::BehaviorVersion::latest())
        .endpoint_url(&spaces_config.endpoint_url)
        .region(Region::new(spaces_config.region.clone()))
        .credentials_provider(s3::config::Credentials::new(
            &spaces_config.access_key_id,
            &spaces_config.secret_access_key,
            None,
            None,
            "Static",
        ))
        .load()
        .await;

    s3::Client::new(&sdk_config)
}

/// Mirrors a finished artifact to the S3-compatible bucket, tagging the object with its digest.
///
/// # Returns
/// The object key the artifact was stored under.
pub async fn upload_artifact(spaces_config: &SpacesConfig, file_path: &Path, checksum: &str) -> Result<String> {
    let key = object_key(spaces_config, file_path)?;
    info!(
        path = %file_path.display(),
        bucket = %spaces_config.bucket_name,
        key = %key,
        "uploading artifact to remote mirror"
    );

    let client = client_for(spaces_config).await;
    let body = ByteStream::from_path(file_path)
        .await
        .map_err(|e| AppError::Storage(format!("cannot stream {}: {}", file_path.display(), e)))?;

    client
        .put_object()
        .bucket(&spaces_config.bucket_name)
        .key(&key)
        .metadata("sha256", checksum)
        .body(body)
        .send()
        .await
        .map_err(|e| {
            warn!(bucket = %spaces_config.bucket_name, key = %key, error = %e, "remote upload failed");
            AppError::Storage(format!(
                "upload of {} to bucket {} failed: {}",
                file_path.display(),
                spaces_config.bucket_name,
                e
            ))
        })?;

    info!(bucket = %spaces_config.bucket_name, key = %key, "artifact mirrored");
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spaces(prefix: Option<&str>) -> SpacesConfig {
        SpacesConfig {
            endpoint_url: "https://fra1.digitaloceanspaces.com".to_string(),
            region: "fra1".to_string(),
            access_key_id: "key".to_string(),
            secret_access_key: "secret".to_string(),
            bucket_name: "vivero-backups".to_string(),
            folder_prefix: prefix.map(str::to_string),
        }
    }

    #[test]
    fn key_uses_trimmed_prefix() {
        let path = Path::new("/var/backups/full_20260310_020000.sql.gz");
        assert_eq!(
            object_key(&spaces(Some("/nightly/")), path).unwrap(),
            "nightly/full_20260310_020000.sql.gz"
        );
        assert_eq!(object_key(&spaces(None), path).unwrap(), "full_20260310_020000.sql.gz");
        assert_eq!(object_key(&spaces(Some("")), path).unwrap(), "full_20260310_020000.sql.gz");
    }
}
