//! OCI distribution client.
//!
//! Implements the pull half of the distribution API: manifests, blobs and
//! tag listing, with bearer-token auth.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::try_join_all;
use reqwest::header::{ACCEPT, HeaderMap, LINK, WWW_AUTHENTICATE};
use reqwest::{Client, Method, Response, StatusCode};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;
use up_schema::Platform;

use super::auth::{self, Challenge};
use super::image::{Descriptor, Image, ImageIndex, Index, MediaTypeProbe, media_types, sha256_digest, verify_digest};
use super::reference::Reference;
use crate::config::Config;
use crate::error::{RegistryError, Result};

const MANIFEST_ACCEPT: &str = "application/vnd.oci.image.manifest.v1+json, \
application/vnd.docker.distribution.manifest.v2+json, \
application/vnd.oci.image.index.v1+json, \
application/vnd.docker.distribution.manifest.list.v2+json";

const DIGEST_HEADER: &str = "Docker-Content-Digest";

/// A fetched manifest or index.
#[derive(Debug, Clone)]
pub struct RawManifest {
    pub media_type: String,
    /// Digest of `body`, checked against the reference when it pinned one.
    pub digest: String,
    pub body: Bytes,
}

impl RawManifest {
    pub fn is_index(&self) -> bool {
        media_types::is_index(&self.media_type)
    }
}

#[derive(Debug, Deserialize)]
struct TagList {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

/// Minimal OCI distribution client: manifests, tags and blobs, with
/// anonymous or basic-auth bearer tokens cached per repository.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    http: Client,
    insecure: bool,
    credentials: Option<(String, String)>,
    /// Bearer tokens per `registry/repository`.
    tokens: Arc<Mutex<HashMap<String, String>>>,
}

impl Default for RegistryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryClient {
    pub fn new() -> Self {
        let http = Client::builder()
            .user_agent(crate::USER_AGENT)
            .build()
            .unwrap_or_default();
        Self {
            http,
            insecure: false,
            credentials: None,
            tokens: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// A client using the configured credentials and transport.
    pub fn from_config(config: &Config) -> Self {
        let mut client = Self::new().insecure(config.registry.insecure);
        client.credentials = config.credentials();
        client
    }

    /// Speak plain HTTP to every registry.
    pub fn insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.credentials = Some((username.to_string(), password.to_string()));
        self
    }

    fn base_url(&self, reference: &Reference) -> String {
        let scheme = if self.insecure || reference.is_local() {
            "http"
        } else {
            "https"
        };
        format!("{scheme}://{}/v2/{}", reference.api_host(), reference.repository)
    }

    /// Send a request, answering one auth challenge if the registry asks.
    async fn send(
        &self,
        method: Method,
        reference: &Reference,
        url: &str,
        accept: Option<&str>,
    ) -> Result<Response> {
        let key = reference.context();
        let build = |token: Option<&str>| {
            let mut req = self.http.request(method.clone(), url);
            if let Some(accept) = accept {
                req = req.header(ACCEPT, accept);
            }
            match token {
                Some(token) => req.bearer_auth(token),
                None => req,
            }
        };

        let cached = self.tokens.lock().await.get(&key).cloned();
        debug!(%method, url, "registry request");
        let resp = build(cached.as_deref()).send().await.map_err(RegistryError::Http)?;
        if resp.status() != StatusCode::UNAUTHORIZED {
            return Ok(resp);
        }

        let challenge = resp
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .and_then(Challenge::parse);

        let retry = match challenge {
            Some(Challenge::Bearer { realm, service, scope }) => {
                let scope = scope.unwrap_or_else(|| format!("repository:{}:pull", reference.repository));
                let token = auth::fetch_token(
                    &self.http,
                    &realm,
                    service.as_deref(),
                    Some(&scope),
                    self.credentials.as_ref(),
                )
                .await?;
                self.tokens.lock().await.insert(key, token.clone());
                build(Some(&token))
            }
            Some(Challenge::Basic) => match &self.credentials {
                Some((user, pass)) => build(None).basic_auth(user, Some(pass)),
                None => return Ok(resp),
            },
            None => return Ok(resp),
        };
        Ok(retry.send().await.map_err(RegistryError::Http)?)
    }

    fn check(resp: Response, what: &str) -> Result<Response> {
        match resp.status() {
            s if s.is_success() => Ok(resp),
            StatusCode::NOT_FOUND => Err(RegistryError::NotFound(what.to_string()).into()),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(RegistryError::Unauthorized(what.to_string()).into())
            }
            s => Err(RegistryError::Status {
                status: s.as_u16(),
                url: resp.url().to_string(),
            }
            .into()),
        }
    }

    fn header_digest(headers: &HeaderMap) -> Option<String> {
        headers
            .get(DIGEST_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }

    fn content_type(headers: &HeaderMap) -> Option<String> {
        headers
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
    }

    /// Fetch the manifest or index `reference` points at.
    pub async fn get_manifest(&self, reference: &Reference) -> Result<RawManifest> {
        let url = format!("{}/manifests/{}", self.base_url(reference), reference.identifier());
        let resp = self
            .send(Method::GET, reference, &url, Some(MANIFEST_ACCEPT))
            .await?;
        let resp = Self::check(resp, &reference.to_string())?;

        let header_type = Self::content_type(resp.headers());
        let body = resp.bytes().await.map_err(RegistryError::Http)?;

        let digest = match &reference.digest {
            Some(expected) => {
                verify_digest(expected, &body)?;
                expected.clone()
            }
            None => sha256_digest(&body),
        };

        let probe: MediaTypeProbe = serde_json::from_slice(&body)?;
        Ok(RawManifest {
            media_type: probe.resolve(header_type.as_deref()),
            digest,
            body,
        })
    }

    /// Descriptor of the manifest at `reference`, without downloading it when
    /// the registry reports the digest.
    pub async fn head_manifest(&self, reference: &Reference) -> Result<Descriptor> {
        let url = format!("{}/manifests/{}", self.base_url(reference), reference.identifier());
        let resp = self
            .send(Method::HEAD, reference, &url, Some(MANIFEST_ACCEPT))
            .await?;
        let resp = Self::check(resp, &reference.to_string())?;

        let headers = resp.headers();
        match (Self::header_digest(headers), Self::content_type(headers)) {
            (Some(digest), Some(media_type)) => Ok(Descriptor {
                media_type,
                digest,
                size: resp.content_length().unwrap_or_default(),
                annotations: Default::default(),
                platform: None,
            }),
            _ => {
                let raw = self.get_manifest(reference).await?;
                let mut desc = Descriptor::for_bytes(&raw.media_type, &raw.body);
                desc.digest = raw.digest;
                Ok(desc)
            }
        }
    }

    /// Fetch and verify a blob.
    pub async fn get_blob(&self, reference: &Reference, digest: &str) -> Result<Bytes> {
        let url = format!("{}/blobs/{digest}", self.base_url(reference));
        let resp = self.send(Method::GET, reference, &url, None).await?;
        let resp = Self::check(resp, &format!("{}@{digest}", reference.context()))?;
        let body = resp.bytes().await.map_err(RegistryError::Http)?;
        verify_digest(digest, &body)?;
        Ok(body)
    }

    /// Every tag of the repository, following `Link` pagination.
    pub async fn list_tags(&self, reference: &Reference) -> Result<Vec<String>> {
        let base = self.base_url(reference);
        let origin = base.split("/v2/").next().unwrap_or(&base).to_string();
        let mut url = format!("{base}/tags/list");
        let mut tags = Vec::new();

        loop {
            let resp = self.send(Method::GET, reference, &url, None).await?;
            let resp = Self::check(resp, &reference.context())?;
            let next = resp
                .headers()
                .get(LINK)
                .and_then(|v| v.to_str().ok())
                .and_then(next_link);
            let page: TagList = resp.json().await.map_err(RegistryError::Http)?;
            tags.extend(page.tags.unwrap_or_default());

            match next {
                Some(path) if path.starts_with("http") => url = path,
                Some(path) => url = format!("{origin}{path}"),
                None => break,
            }
        }
        Ok(tags)
    }

    /// Pull the image for `platform`, resolving an index if the reference
    /// points at one.
    pub async fn image(&self, reference: &Reference, platform: &Platform) -> Result<Image> {
        let raw = self.get_manifest(reference).await?;

        let raw = if raw.is_index() {
            let index: Index = serde_json::from_slice(&raw.body)?;
            let desc = index
                .manifests
                .iter()
                .find(|d| d.platform.as_ref().is_some_and(|p| platform.matches(p)))
                .ok_or_else(|| RegistryError::PlatformNotFound(platform.to_string()))?;
            debug!(%reference, %platform, digest = %desc.digest, "resolved index entry");
            self.get_manifest(&reference.with_digest(&desc.digest)).await?
        } else {
            raw
        };

        if !media_types::is_manifest(&raw.media_type) {
            return Err(RegistryError::UnsupportedMediaType(raw.media_type).into());
        }
        self.assemble(reference, raw).await
    }

    /// Pull every platform image of `reference`. A plain manifest yields a
    /// one-image index.
    pub async fn index(&self, reference: &Reference) -> Result<ImageIndex> {
        let raw = self.get_manifest(reference).await?;
        if !raw.is_index() {
            return Ok(ImageIndex::new(vec![self.assemble(reference, raw).await?]));
        }

        let index: Index = serde_json::from_slice(&raw.body)?;
        // Attestation manifests carry an `unknown/unknown` platform.
        let wanted = index
            .manifests
            .iter()
            .filter(|d| d.platform.as_ref().is_some_and(|p| p.os != "unknown"));
        let images = try_join_all(wanted.map(|d| async move {
            let raw = self.get_manifest(&reference.with_digest(&d.digest)).await?;
            self.assemble(reference, raw).await
        }))
        .await?;
        Ok(ImageIndex::new(images))
    }

    async fn assemble(&self, reference: &Reference, raw: RawManifest) -> Result<Image> {
        let manifest: super::image::Manifest = serde_json::from_slice(&raw.body)?;
        let config = self.get_blob(reference, &manifest.config.digest).await?;
        let blobs = try_join_all(
            manifest
                .layers
                .iter()
                .map(|l| self.get_blob(reference, &l.digest)),
        )
        .await?;
        Image::from_parts(raw.body, config, blobs)
    }
}

/// Target of a `Link: <...>; rel="next"` header.
fn next_link(header: &str) -> Option<String> {
    header.split(',').find_map(|part| {
        let (target, params) = part.split_once(';')?;
        if !params.contains("rel=\"next\"") && !params.contains("rel=next") {
            return None;
        }
        let target = target.trim();
        Some(target.strip_prefix('<')?.strip_suffix('>')?.to_string())
    })
}

#[cfg(test)]
pub(crate) mod testing {
    //! Serve images from a mockito registry.

    use super::*;

    /// Register manifest (by tag and digest), config and layer mocks.
    pub(crate) async fn serve_image(server: &mut mockito::ServerGuard, repo: &str, tag: &str, image: &Image) {
        let manifest = image.manifest_bytes().unwrap();
        let digest = image.digest().unwrap();
        for ident in [tag.to_string(), digest.clone()] {
            for method in ["GET", "HEAD"] {
                server
                    .mock(method, format!("/v2/{repo}/manifests/{ident}").as_str())
                    .with_status(200)
                    .with_header("content-type", image.media_type())
                    .with_header(DIGEST_HEADER, &digest)
                    .with_body(manifest.clone())
                    .create_async()
                    .await;
            }
        }
        let config = image.config_bytes().unwrap();
        server
            .mock("GET", format!("/v2/{repo}/blobs/{}", sha256_digest(&config)).as_str())
            .with_status(200)
            .with_body(config)
            .create_async()
            .await;
        for layer in image.layers() {
            server
                .mock("GET", format!("/v2/{repo}/blobs/{}", layer.descriptor.digest).as_str())
                .with_status(200)
                .with_body(layer.blob.clone())
                .create_async()
                .await;
        }
    }

    pub(crate) fn registry_host(server: &mockito::ServerGuard) -> String {
        server.host_with_port()
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::oci::image::Layer;

    fn sample_image(arch: &str) -> Image {
        let mut img = Image::empty(&Platform::linux(arch));
        img.append_layer(Layer::from_tar(&tar_of(arch)).unwrap());
        img
    }

    fn tar_of(name: &str) -> Vec<u8> {
        let mut t = crate::tree::MemTree::new();
        t.insert_file(name, name.to_string()).unwrap();
        crate::archive::pack_tree(&t, "layer", &Default::default()).unwrap()
    }

    fn reference(server: &mockito::ServerGuard, path: &str) -> Reference {
        Reference::parse(&format!("{}/{path}", registry_host(server))).unwrap()
    }

    #[test]
    fn test_next_link() {
        assert_eq!(
            next_link(r#"</v2/acme/fn/tags/list?n=2&last=v2>; rel="next""#),
            Some("/v2/acme/fn/tags/list?n=2&last=v2".into())
        );
        assert_eq!(next_link(r#"</x>; rel="prev""#), None);
    }

    #[tokio::test]
    async fn test_list_tags_follows_pagination() {
        let mut server = mockito::Server::new_async().await;
        let _p1 = server
            .mock("GET", "/v2/acme/fn/tags/list")
            .match_query(mockito::Matcher::Regex("^$".into()))
            .with_status(200)
            .with_header("link", r#"</v2/acme/fn/tags/list?last=v0.2.0>; rel="next""#)
            .with_body(r#"{"name":"acme/fn","tags":["v0.1.0","v0.2.0"]}"#)
            .create_async()
            .await;
        let _p2 = server
            .mock("GET", "/v2/acme/fn/tags/list")
            .match_query(mockito::Matcher::UrlEncoded("last".into(), "v0.2.0".into()))
            .with_status(200)
            .with_body(r#"{"name":"acme/fn","tags":["v0.3.0"]}"#)
            .create_async()
            .await;

        let client = RegistryClient::new();
        let tags = client.list_tags(&reference(&server, "acme/fn")).await.unwrap();
        assert_eq!(tags, ["v0.1.0", "v0.2.0", "v0.3.0"]);
    }

    #[tokio::test]
    async fn test_pull_image_and_head() {
        let mut server = mockito::Server::new_async().await;
        let img = sample_image("amd64");
        serve_image(&mut server, "acme/fn", "v1.0.0", &img).await;

        let client = RegistryClient::new();
        let r = reference(&server, "acme/fn:v1.0.0");
        let pulled = client.image(&r, &Platform::linux("amd64")).await.unwrap();
        assert_eq!(pulled.digest().unwrap(), img.digest().unwrap());
        assert_eq!(pulled.layers().len(), 1);

        let desc = client.head_manifest(&r).await.unwrap();
        assert_eq!(desc.digest, img.digest().unwrap());
    }

    #[tokio::test]
    async fn test_index_resolves_platform() {
        let mut server = mockito::Server::new_async().await;
        let amd = sample_image("amd64");
        let arm = sample_image("arm64");
        serve_image(&mut server, "acme/base", "amd", &amd).await;
        serve_image(&mut server, "acme/base", "arm", &arm).await;

        let index = super::super::image::ImageIndex::new(vec![amd.clone(), arm.clone()]);
        let body = serde_json::to_vec(&index.manifest().unwrap()).unwrap();
        let _idx = server
            .mock("GET", "/v2/acme/base/manifests/latest")
            .with_status(200)
            .with_header("content-type", media_types::OCI_INDEX)
            .with_body(body)
            .create_async()
            .await;

        let client = RegistryClient::new();
        let r = reference(&server, "acme/base");
        let pulled = client.image(&r, &Platform::linux("arm64")).await.unwrap();
        assert_eq!(pulled.config().architecture, "arm64");

        let err = client.image(&r, &Platform::linux("s390x")).await.unwrap_err();
        assert!(err.to_string().contains("linux/s390x"));
    }

    #[tokio::test]
    async fn test_not_found_and_bearer_auth() {
        let mut server = mockito::Server::new_async().await;
        let _missing = server
            .mock("GET", "/v2/acme/missing/manifests/v1")
            .with_status(404)
            .create_async()
            .await;

        let realm = format!("{}/token", server.url());
        let _challenge = server
            .mock("GET", "/v2/acme/private/tags/list")
            .match_header("authorization", mockito::Matcher::Missing)
            .with_status(401)
            .with_header(
                "www-authenticate",
                &format!(r#"Bearer realm="{realm}",service="test""#),
            )
            .create_async()
            .await;
        let _token = server
            .mock("GET", "/token")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(r#"{"token":"t0k"}"#)
            .create_async()
            .await;
        let _authed = server
            .mock("GET", "/v2/acme/private/tags/list")
            .match_header("authorization", "Bearer t0k")
            .with_status(200)
            .with_body(r#"{"tags":["v1"]}"#)
            .create_async()
            .await;

        let client = RegistryClient::new();
        let err = client
            .get_manifest(&reference(&server, "acme/missing:v1"))
            .await
            .unwrap_err();
        assert!(matches!(err, crate::Error::Registry(RegistryError::NotFound(_))));

        let tags = client.list_tags(&reference(&server, "acme/private")).await.unwrap();
        assert_eq!(tags, ["v1"]);
    }
}
