use crate::{
    config::ObjectStoreParams,
    logging::event,
    objectstore::{ObjectEntry, ObjectStore, StoreError},
    retries::retry_request,
};
use rusoto_core::{credential::StaticProvider, ByteStream, Region, RusotoError};
use rusoto_s3::{GetObjectRequest, ListObjectsV2Request, S3Client, S3};
use slog::{info, o, Logger};
use std::{
    fs::File,
    io::{self, Read},
    path::Path,
    pin::Pin,
    time::Duration,
};
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    runtime::Handle,
};

/// An object store backed by an S3-compatible service (AWS S3, MinIO, or a
/// vendor gateway speaking the S3 API). The endpoint and region come from
/// the source configuration; credentials are optional because public market
/// data buckets permit anonymous reads.
#[derive(Clone)]
pub struct S3ObjectStore {
    bucket: String,
    region: Region,
    credentials: Option<(String, String)>,
    runtime_handle: Handle,
    logger: Logger,
}

impl std::fmt::Debug for S3ObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Credentials deliberately omitted.
        f.debug_struct("S3ObjectStore")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .finish()
    }
}

impl S3ObjectStore {
    pub fn new(
        params: &ObjectStoreParams,
        runtime_handle: &Handle,
        parent_logger: &Logger,
    ) -> S3ObjectStore {
        let region = Region::Custom {
            name: params.region.clone(),
            endpoint: params.endpoint.clone(),
        };
        let logger = parent_logger.new(o!(
            event::STORAGE_PATH => format!("s3://{}/{}", params.endpoint, params.bucket),
        ));
        S3ObjectStore {
            bucket: params.bucket.clone(),
            region,
            credentials: params
                .credentials
                .as_ref()
                .map(|c| (c.access_key.clone(), c.secret_key.expose().to_owned())),
            runtime_handle: runtime_handle.clone(),
            logger,
        }
    }

    /// Construct an S3 client for one API call. The hyper client underneath
    /// is configured to drop idle connections after 10 seconds because S3
    /// closes idle server-side connections faster than hyper's default pool
    /// timeout, which otherwise surfaces as spurious upload failures.
    fn client(&self) -> S3Client {
        let mut builder = hyper::Client::builder();
        builder.pool_idle_timeout(Duration::from_secs(10));
        let connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_native_roots()
            // Vendor gateways and test fixtures speak plain HTTP
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .build();
        let http_client = rusoto_core::HttpClient::from_builder(builder, connector);

        let provider = match &self.credentials {
            Some((access, secret)) => {
                StaticProvider::new_minimal(access.clone(), secret.clone())
            }
            // Anonymous mode: empty static credentials, accepted by stores
            // that allow unauthenticated reads.
            None => StaticProvider::new_minimal(String::new(), String::new()),
        };

        S3Client::new_with(http_client, provider, self.region.clone())
    }
}

fn is_transient<E>(error: &RusotoError<E>) -> bool {
    matches!(
        error,
        RusotoError::HttpDispatch(_) | RusotoError::Unknown(_)
    )
}

impl ObjectStore for S3ObjectStore {
    fn path(&self) -> String {
        format!("s3://{}/{}", self.region.name(), self.bucket)
    }

    fn list(&self, prefix: &str) -> Result<Vec<ObjectEntry>, StoreError> {
        let logger = self.logger.new(o!(
            event::ACTION => "list objects",
            "prefix" => prefix.to_owned(),
        ));
        info!(logger, "list");
        let client = self.client();

        let mut objects = Vec::new();
        let mut continuation_token: Option<String> = None;
        loop {
            let request = ListObjectsV2Request {
                bucket: self.bucket.clone(),
                prefix: Some(prefix.to_owned()),
                continuation_token: continuation_token.clone(),
                ..Default::default()
            };
            let output = retry_request(
                &logger,
                "ListObjectsV2",
                || {
                    self.runtime_handle
                        .block_on(client.list_objects_v2(request.clone()))
                },
                is_transient,
            )
            .map_err(|e| StoreError::List {
                prefix: prefix.to_owned(),
                detail: e.to_string(),
            })?;

            for object in output.contents.unwrap_or_default() {
                if let Some(key) = object.key {
                    objects.push(ObjectEntry {
                        key,
                        size: object.size.unwrap_or(0).max(0) as u64,
                    });
                }
            }

            continuation_token = output.next_continuation_token;
            if continuation_token.is_none() {
                break;
            }
        }
        Ok(objects)
    }

    fn fetch(&self, key: &str, dest: &Path) -> Result<u64, StoreError> {
        let logger = self.logger.new(o!(
            event::ACTION => "get object",
            event::STORAGE_KEY => key.to_owned(),
        ));
        info!(logger, "get");
        let client = self.client();

        let output = retry_request(
            &logger,
            "GetObject",
            || {
                self.runtime_handle.block_on(client.get_object(GetObjectRequest {
                    bucket: self.bucket.clone(),
                    key: key.to_owned(),
                    ..Default::default()
                }))
            },
            is_transient,
        )
        .map_err(|e| StoreError::Fetch {
            key: key.to_owned(),
            detail: e.to_string(),
        })?;

        let body = output.body.ok_or_else(|| StoreError::NoBody(key.to_owned()))?;
        let mut reader = StreamingBodyReader::new(body, &self.runtime_handle);
        let mut file = File::create(dest)
            .map_err(|e| StoreError::Io(e, dest.display().to_string()))?;
        io::copy(&mut reader, &mut file)
            .map_err(|e| StoreError::Io(e, dest.display().to_string()))
    }
}

/// An std::io::Read over the async streaming body of an S3 response,
/// blocking on the shared tokio runtime for each chunk.
struct StreamingBodyReader {
    body_reader: Pin<Box<dyn AsyncRead + Send>>,
    runtime_handle: Handle,
}

impl StreamingBodyReader {
    fn new(body: ByteStream, runtime_handle: &Handle) -> StreamingBodyReader {
        StreamingBodyReader {
            body_reader: Box::pin(body.into_async_read()),
            runtime_handle: runtime_handle.clone(),
        }
    }
}

impl Read for StreamingBodyReader {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, io::Error> {
        self.runtime_handle.block_on(self.body_reader.read(buf))
    }
}
