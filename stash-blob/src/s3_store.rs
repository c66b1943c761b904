//! Blob Store API on top of an S3-compatible bucket.

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::primitives::ByteStream as AwsByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart, Delete, MetadataDirective, ObjectIdentifier};
use aws_sdk_s3::Client;
use bytes::BytesMut;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use stash_core::StashConfigSnapshot;

use crate::store::{admit, check_limit, collect_limited, resolve_pathname, BlobStore, PutRequest, DEFAULT_LIST_LIMIT};
use crate::types::pathname_from_url;
use crate::{
    BlobError, BlobResult, ByteStream, CopyOptions, ListMode, ListOptions, ListPage, ObjectSummary,
    StoredObjectDescriptor, OCTET_STREAM,
};

/// Part size for multipart writes.
pub const PART_SIZE_BYTES: usize = 8 * 1024 * 1024;

/// S3 caps a single DeleteObjects call at this many keys.
const DELETE_BATCH: usize = 1000;

/// Connection settings for an S3-compatible bucket.
#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub endpoint_url: Option<String>,
    pub access_key_id: String,
    pub secret_access_key: String,
    /// Base that object URLs are served from (CDN or bucket website).
    pub public_base_url: String,
    pub force_path_style: bool,
}

impl S3Config {
    /// Read `s3.*`, `store.token` and `store.public_base_url` from a config
    /// snapshot.
    pub fn from_config(config: &StashConfigSnapshot) -> BlobResult<Self> {
        fn required(config: &StashConfigSnapshot, key: &str) -> BlobResult<String> {
            config
                .get_string(key)
                .ok_or_else(|| BlobError::config(format!("{key} must be set")))
        }

        Ok(Self {
            bucket: required(config, "s3.bucket")?,
            region: config
                .get_string("s3.region")
                .unwrap_or_else(|| "us-east-1".to_string()),
            endpoint_url: config.get_string("s3.endpoint_url"),
            access_key_id: required(config, "s3.access_key_id")?,
            // `store.token` is the conventional read-write credential.
            secret_access_key: config
                .get_string("s3.secret_access_key")
                .or_else(|| config.get_string("store.token"))
                .ok_or_else(|| BlobError::config("s3.secret_access_key or store.token must be set"))?,
            public_base_url: required(config, "store.public_base_url")?,
            force_path_style: config.get_bool("s3.force_path_style").unwrap_or(true),
        })
    }
}

#[derive(Clone)]
pub struct S3CompatibleStore {
    client: Client,
    bucket: String,
    public_base_url: String,
}

impl std::fmt::Debug for S3CompatibleStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3CompatibleStore")
            .field("bucket", &self.bucket)
            .field("public_base_url", &self.public_base_url)
            .finish_non_exhaustive()
    }
}

impl S3CompatibleStore {
    pub async fn new(config: S3Config) -> Self {
        let credentials = Credentials::new(
            config.access_key_id,
            config.secret_access_key,
            None,
            None,
            "stash",
        );

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region))
            .credentials_provider(credentials);
        if let Some(endpoint) = config.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        let aws_config = loader.load().await;

        let client = Client::from_conf(
            aws_sdk_s3::config::Builder::from(&aws_config)
                .force_path_style(config.force_path_style)
                .build(),
        );

        Self {
            client,
            bucket: config.bucket,
            public_base_url: config.public_base_url.trim_end_matches('/').to_string(),
        }
    }

    fn key<'a>(&self, url: &'a str) -> BlobResult<&'a str> {
        pathname_from_url(&self.public_base_url, url).ok_or_else(|| BlobError::not_found(url))
    }

    async fn exists(&self, key: &str) -> BlobResult<bool> {
        match self.client.head_object().bucket(&self.bucket).key(key).send().await {
            Ok(_) => Ok(true),
            Err(SdkError::ServiceError(ref e)) if e.raw().status().as_u16() == 404 => Ok(false),
            Err(e) => Err(map_sdk_error(e, key)),
        }
    }

    async fn put_single(
        &self,
        key: &str,
        request: &PutRequest,
        body: ByteStream,
    ) -> BlobResult<u64> {
        let auth = &request.authorization;
        let data = collect_limited(body, auth.maximum_size_in_bytes).await?;
        let size = data.len() as u64;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(&request.content_type)
            .cache_control(cache_control(auth.cache_control_max_age))
            .set_if_none_match((!auth.allow_overwrite).then(|| "*".to_string()))
            .body(AwsByteStream::from(data))
            .send()
            .await
            .map_err(|e| map_sdk_error(e, key))?;
        Ok(size)
    }

    async fn put_multipart(
        &self,
        key: &str,
        request: &PutRequest,
        mut body: ByteStream,
    ) -> BlobResult<u64> {
        let auth = &request.authorization;
        let created = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(&request.content_type)
            .cache_control(cache_control(auth.cache_control_max_age))
            .send()
            .await
            .map_err(|e| map_sdk_error(e, key))?;
        let upload_id = created
            .upload_id()
            .map(str::to_string)
            .ok_or_else(|| BlobError::upstream(502, "Missing multipart upload id"))?;

        let result: BlobResult<u64> = async {
            let mut parts = Vec::new();
            let mut buffer = BytesMut::with_capacity(PART_SIZE_BYTES);
            let mut total: u64 = 0;
            let mut part_number = 1;
            let mut finished = false;

            while !finished {
                match body.next().await {
                    Some(chunk) => {
                        let chunk = chunk?;
                        total += chunk.len() as u64;
                        check_limit(total, auth.maximum_size_in_bytes)?;
                        buffer.extend_from_slice(&chunk);
                        if buffer.len() < PART_SIZE_BYTES {
                            continue;
                        }
                    }
                    None => finished = true,
                }
                if buffer.is_empty() && !(finished && parts.is_empty()) {
                    continue;
                }

                let part = buffer.split().freeze();
                let output = self
                    .client
                    .upload_part()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .part_number(part_number)
                    .body(AwsByteStream::from(part))
                    .send()
                    .await
                    .map_err(|e| map_sdk_error(e, key))?;

                parts.push(
                    CompletedPart::builder()
                        .set_e_tag(output.e_tag().map(str::to_string))
                        .part_number(part_number)
                        .build(),
                );
                tracing::trace!(key, part_number, total, "uploaded part");
                part_number += 1;
            }

            self.client
                .complete_multipart_upload()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(&upload_id)
                .set_if_none_match((!auth.allow_overwrite).then(|| "*".to_string()))
                .multipart_upload(CompletedMultipartUpload::builder().set_parts(Some(parts)).build())
                .send()
                .await
                .map_err(|e| map_sdk_error(e, key))?;
            Ok(total)
        }
        .await;

        if result.is_err() {
            if let Err(e) = self
                .client
                .abort_multipart_upload()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(&upload_id)
                .send()
                .await
            {
                tracing::warn!(key, error = %DisplayErrorContext(&e), "failed to abort multipart upload");
            }
        }
        result
    }

    async fn describe(&self, key: &str) -> BlobResult<StoredObjectDescriptor> {
        let head = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, key))?;

        let mut descriptor = StoredObjectDescriptor::new(
            &self.public_base_url,
            key,
            head.content_type().unwrap_or(OCTET_STREAM),
            0,
            head.content_length().unwrap_or(0).max(0) as u64,
            head.last_modified().and_then(to_chrono).unwrap_or_else(Utc::now),
        );
        if let Some(cc) = head.cache_control() {
            descriptor.cache_control = cc.to_string();
        }
        Ok(descriptor)
    }
}

#[async_trait]
impl BlobStore for S3CompatibleStore {
    async fn put(&self, request: PutRequest, body: ByteStream) -> BlobResult<StoredObjectDescriptor> {
        admit(&request, Utc::now())?;
        let auth = &request.authorization;
        let key = resolve_pathname(&auth.pathname, auth.add_random_suffix);

        if !auth.allow_overwrite && self.exists(&key).await? {
            return Err(BlobError::AlreadyExists { pathname: key });
        }

        let size = if request.multipart {
            self.put_multipart(&key, &request, body).await?
        } else {
            self.put_single(&key, &request, body).await?
        };

        tracing::debug!(key = %key, size, multipart = request.multipart, "stored object");
        Ok(StoredObjectDescriptor::new(
            &self.public_base_url,
            &key,
            &request.content_type,
            auth.cache_control_max_age,
            size,
            Utc::now(),
        ))
    }

    async fn copy(
        &self,
        from_url: &str,
        to_pathname: &str,
        options: &CopyOptions,
    ) -> BlobResult<StoredObjectDescriptor> {
        let from = self.key(from_url)?;
        let source = self.describe(from).await?;
        let to = resolve_pathname(to_pathname, options.add_random_suffix);

        if self.exists(&to).await? {
            return Err(BlobError::AlreadyExists { pathname: to });
        }

        let mut request = self
            .client
            .copy_object()
            .bucket(&self.bucket)
            .key(&to)
            .copy_source(format!("{}/{}", self.bucket, encode_key(from)));

        if options.content_type.is_some() || options.cache_control_max_age.is_some() {
            let content_type = options
                .content_type
                .clone()
                .unwrap_or_else(|| source.content_type.clone());
            let cache = options
                .cache_control_max_age
                .map(cache_control)
                .unwrap_or_else(|| source.cache_control.clone());
            request = request
                .metadata_directive(MetadataDirective::Replace)
                .content_type(content_type)
                .cache_control(cache);
        }

        request.send().await.map_err(|e| map_sdk_error(e, from))?;
        self.describe(&to).await
    }

    async fn delete(&self, urls: &[String]) -> BlobResult<()> {
        let keys: Vec<&str> = urls
            .iter()
            .filter_map(|url| pathname_from_url(&self.public_base_url, url))
            .collect();

        for batch in keys.chunks(DELETE_BATCH) {
            let objects = batch
                .iter()
                .map(|key| ObjectIdentifier::builder().key(*key).build())
                .collect::<Result<Vec<_>, _>>()
                .map_err(BlobError::backend)?;
            let delete = Delete::builder()
                .set_objects(Some(objects))
                .quiet(true)
                .build()
                .map_err(BlobError::backend)?;

            self.client
                .delete_objects()
                .bucket(&self.bucket)
                .delete(delete)
                .send()
                .await
                .map_err(|e| map_sdk_error(e, "batch"))?;
        }
        Ok(())
    }

    async fn list(&self, options: &ListOptions) -> BlobResult<ListPage> {
        let limit = options.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, DEFAULT_LIST_LIMIT);
        let mut request = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .max_keys(limit as i32)
            .set_prefix(options.prefix.clone())
            .set_continuation_token(options.cursor.clone());
        if options.mode == ListMode::Folded {
            request = request.delimiter("/");
        }

        let output = request.send().await.map_err(|e| map_sdk_error(e, "list"))?;

        let blobs = output
            .contents()
            .iter()
            .filter_map(|object| {
                let key = object.key()?;
                Some(ObjectSummary::new(
                    &self.public_base_url,
                    key,
                    object.size().unwrap_or(0).max(0) as u64,
                    object.last_modified().and_then(to_chrono).unwrap_or_else(Utc::now),
                ))
            })
            .collect();

        let folders = (options.mode == ListMode::Folded).then(|| {
            output
                .common_prefixes()
                .iter()
                .filter_map(|p| p.prefix().map(str::to_string))
                .collect()
        });

        let has_more = output.is_truncated().unwrap_or(false);
        Ok(ListPage {
            blobs,
            cursor: if has_more {
                output.next_continuation_token().map(str::to_string)
            } else {
                None
            },
            has_more,
            folders,
        })
    }

    async fn head(&self, url: &str) -> BlobResult<StoredObjectDescriptor> {
        let key = self.key(url)?;
        self.describe(key).await
    }

    fn public_base_url(&self) -> &str {
        &self.public_base_url
    }
}

fn cache_control(max_age: u64) -> String {
    format!("public, max-age={max_age}")
}

fn to_chrono(dt: &aws_sdk_s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(dt.secs(), dt.subsec_nanos())
}

/// Characters escaped in `x-amz-copy-source`; `/` separators stay as-is.
const COPY_SOURCE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

fn encode_key(key: &str) -> String {
    utf8_percent_encode(key, COPY_SOURCE).to_string()
}

fn map_sdk_error<E>(err: SdkError<E>, key: &str) -> BlobError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let status = match &err {
        SdkError::ServiceError(service) => Some(service.raw().status().as_u16()),
        SdkError::ResponseError(response) => Some(response.raw().status().as_u16()),
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => {
            return BlobError::network(DisplayErrorContext(&err).to_string());
        }
        _ => None,
    };

    match status {
        Some(404) => BlobError::not_found(key),
        Some(412) => BlobError::AlreadyExists {
            pathname: key.to_string(),
        },
        Some(401 | 403) => BlobError::access_denied(DisplayErrorContext(&err).to_string()),
        Some(status @ (408 | 429 | 500..=599)) => {
            BlobError::upstream(status, DisplayErrorContext(&err).to_string())
        }
        _ => BlobError::backend(std::io::Error::other(DisplayErrorContext(&err).to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_source_keys_are_encoded() {
        assert_eq!(encode_key("photos/my cat.png"), "photos/my%20cat.png");
        assert_eq!(encode_key("a+b/ü"), "a%2Bb/%C3%BC");
        assert_eq!(encode_key("raw/~v1_final-2.tar.gz"), "raw/~v1_final-2.tar.gz");
        assert_eq!(encode_key("q?x=1&y#z"), "q%3Fx%3D1%26y%23z");
    }

    #[test]
    fn config_requires_bucket_and_credentials() {
        let mut config = stash_core::StashConfig::new();
        config.set("s3.bucket", "media");
        let err = S3Config::from_config(&config.snapshot()).unwrap_err();
        assert!(err.to_string().contains("s3.access_key_id"));

        config.set("s3.access_key_id", "id");
        config.set("s3.secret_access_key", "secret");
        config.set("store.public_base_url", "https://cdn.test");
        let s3 = S3Config::from_config(&config.snapshot()).unwrap();
        assert_eq!(s3.region, "us-east-1");
        assert!(s3.force_path_style);
    }
}
