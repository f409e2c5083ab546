use super::{ObjectWrite, Result, Store, StoreError};

use anyhow::Context;
use rusoto_core::{HttpClient, Region, RusotoError};
use rusoto_credential::StaticProvider;
use rusoto_s3::{
    CopyObjectRequest, DeleteObjectRequest, GetObjectRequest, HeadBucketRequest,
    ListObjectsV2Request, PutObjectRequest, S3Client, S3,
};
use tokio::{io::AsyncReadExt, runtime::Handle};

use std::{
    io::{Cursor, Read, Write},
    mem,
};

/// Backups in an S3-compatible bucket.
///
/// Must be constructed inside a tokio runtime; the captured handle drives
/// the client from the blocking threads the engine runs on.
pub struct S3Store {
    client: S3Client,
    bucket: String,
    prefix: String,
    handle: Handle,
}

impl S3Store {
    pub fn new(
        bucket: impl Into<String>,
        region: &str,
        endpoint: Option<&str>,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
        prefix: impl Into<String>,
    ) -> Result<S3Store> {
        let region = match endpoint {
            Some(endpoint) => Region::Custom {
                name: region.into(),
                endpoint: endpoint.into(),
            },
            None => region.parse().context("invalid S3 region")?,
        };

        let credentials = StaticProvider::new_minimal(access_key.into(), secret_key.into());
        let dispatcher = HttpClient::new().context("failed to set up S3 client")?;

        Ok(S3Store {
            client: S3Client::new_with(dispatcher, credentials, region),
            bucket: bucket.into(),
            prefix: prefix.into(),
            handle: Handle::current(),
        })
    }

    fn key(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }
}

struct S3Object {
    client: S3Client,
    bucket: String,
    key: String,
    buf: Vec<u8>,
    handle: Handle,
}

impl Write for S3Object {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl ObjectWrite for S3Object {
    fn complete(&mut self) -> Result<()> {
        let body = mem::take(&mut self.buf);
        self.handle
            .block_on(self.client.put_object(PutObjectRequest {
                bucket: self.bucket.clone(),
                key: self.key.clone(),
                body: Some(body.into()),
                ..Default::default()
            }))
            .context("failed to store object")?;
        Ok(())
    }
}

impl Store for S3Store {
    fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut token = None;

        loop {
            let page = self
                .handle
                .block_on(self.client.list_objects_v2(ListObjectsV2Request {
                    bucket: self.bucket.clone(),
                    prefix: Some(self.prefix.clone()),
                    continuation_token: token.take(),
                    ..Default::default()
                }))
                .context("failed to list objects")?;

            for object in page.contents.unwrap_or_default() {
                if let Some(name) = object
                    .key
                    .as_deref()
                    .and_then(|key| key.strip_prefix(&self.prefix))
                {
                    names.push(name.to_string());
                }
            }

            if page.is_truncated == Some(true) {
                token = page.next_continuation_token;
            } else {
                break;
            }
        }

        names.sort();
        Ok(names)
    }

    fn open(&self, name: &str) -> Result<Box<dyn Read + Send>> {
        let request = GetObjectRequest {
            bucket: self.bucket.clone(),
            key: self.key(name),
            ..Default::default()
        };

        let output = match self.handle.block_on(self.client.get_object(request)) {
            Err(RusotoError::Service(rusoto_s3::GetObjectError::NoSuchKey(_))) => {
                return Err(StoreError::NotFound { name: name.into() })
            }
            other => other.context("failed to fetch object")?,
        };

        let body = output
            .body
            .context("no body for retrieved object")?
            .into_async_read();

        let mut buf = Vec::new();
        self.handle.block_on(async {
            tokio::pin!(body);
            body.read_to_end(&mut buf).await
        })?;

        Ok(Box::new(Cursor::new(buf)))
    }

    fn create(&self, name: &str) -> Result<Box<dyn ObjectWrite>> {
        Ok(Box::new(S3Object {
            client: self.client.clone(),
            bucket: self.bucket.clone(),
            key: self.key(name),
            buf: Vec::new(),
            handle: self.handle.clone(),
        }))
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        self.handle
            .block_on(self.client.copy_object(CopyObjectRequest {
                bucket: self.bucket.clone(),
                copy_source: format!("{}/{}", self.bucket, self.key(from)),
                key: self.key(to),
                ..Default::default()
            }))
            .context("failed to copy object")?;
        self.delete(from)
    }

    fn delete(&self, name: &str) -> Result<()> {
        self.handle
            .block_on(self.client.delete_object(DeleteObjectRequest {
                bucket: self.bucket.clone(),
                key: self.key(name),
                ..Default::default()
            }))
            .context("failed to delete object")?;
        Ok(())
    }

    fn ping(&self) -> Result<()> {
        self.handle
            .block_on(self.client.head_bucket(HeadBucketRequest {
                bucket: self.bucket.clone(),
                ..Default::default()
            }))
            .context("bucket not reachable")?;
        Ok(())
    }
}
