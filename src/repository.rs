pub mod group;
pub mod registry;

use std::collections::HashSet;

use async_recursion::async_recursion;
use hyper::{Method, StatusCode};
use tracing::{debug, error, trace};

use crate::error::{RepoError, RepoResult};
use crate::maven::content_facet::MavenContentFacet;
use crate::maven::coordinates::MavenPath;
use crate::maven::paths::parse_path;
use crate::maven::policy::{RedeployPolicy, VersionPolicy};
use crate::maven::proxy_facet::{MavenProxyFacet, ProxyFacet};
use crate::repository::group::GroupFacet;
use crate::repository::registry::RepositoryRegistry;
use crate::storage::facet::StorageFacet;
use crate::util::payload::Payload;

/// A request to a repository, with the path relative to the repository root
pub struct Request {
    pub method: Method,
    pub path: String,
    pub payload: Option<Payload>,
}
impl Request {
    pub fn get(path: &str) -> Request {
        Request {
            method: Method::GET,
            path: path.to_string(),
            payload: None,
        }
    }

    pub fn put(path: &str, payload: Payload) -> Request {
        Request {
            method: Method::PUT,
            path: path.to_string(),
            payload: Some(payload),
        }
    }

    pub fn delete(path: &str) -> Request {
        Request {
            method: Method::DELETE,
            path: path.to_string(),
            payload: None,
        }
    }
}

#[derive(Debug)]
pub struct Response {
    pub status: StatusCode,
    pub payload: Option<Payload>,
    pub message: Option<String>,
}
impl Response {
    pub fn status(status: StatusCode) -> Response {
        Response {
            status,
            payload: None,
            message: None,
        }
    }

    pub fn ok(payload: Payload) -> Response {
        Response {
            status: StatusCode::OK,
            payload: Some(payload),
            message: None,
        }
    }

    pub fn found(payload: Option<Payload>) -> Response {
        match payload {
            Some(payload) => Response::ok(payload),
            None => Response::status(StatusCode::NOT_FOUND),
        }
    }

    pub fn from_error(e: &RepoError) -> Response {
        Response {
            status: e.status(),
            payload: None,
            message: Some(e.to_string()),
        }
    }
}

/// Request scoped state shared by nested dispatches
#[derive(Default)]
pub struct Context {
    /// repositories this request was dispatched to, for cycle protection in groups
    dispatched: HashSet<String>,
}
impl Context {
    pub fn new() -> Context {
        Default::default()
    }

    pub fn was_dispatched(&self, repository: &str) -> bool {
        self.dispatched.contains(repository)
    }
}

pub struct HostedView {
    content: MavenContentFacet,
    version_policy: VersionPolicy,
    redeploy_policy: RedeployPolicy,
}

pub struct ProxyView {
    proxy: MavenProxyFacet,
    version_policy: VersionPolicy,
}

pub enum View {
    Hosted(HostedView),
    Proxy(ProxyView),
    Group(GroupFacet),
}

pub struct Repository {
    name: String,
    view: View,
}

impl Repository {
    pub fn hosted(name: &str, content: MavenContentFacet, version_policy: VersionPolicy, redeploy_policy: RedeployPolicy) -> Repository {
        Repository {
            name: name.to_string(),
            view: View::Hosted(HostedView { content, version_policy, redeploy_policy }),
        }
    }

    pub fn proxy(name: &str, proxy: MavenProxyFacet, version_policy: VersionPolicy) -> Repository {
        Repository {
            name: name.to_string(),
            view: View::Proxy(ProxyView { proxy, version_policy }),
        }
    }

    pub fn group(name: &str, members: Vec<String>) -> Repository {
        Repository {
            name: name.to_string(),
            view: View::Group(GroupFacet::new(members)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &'static str {
        match &self.view {
            View::Hosted(_) => "hosted",
            View::Proxy(_) => "proxy",
            View::Group(_) => "group",
        }
    }

    /// `None` for groups, which have no storage of their own
    pub fn storage(&self) -> Option<&StorageFacet> {
        match &self.view {
            View::Hosted(hosted) => Some(hosted.content.storage()),
            View::Proxy(proxy) => Some(proxy.proxy.content().storage()),
            View::Group(_) => None,
        }
    }

    pub async fn handle(&self, registry: &RepositoryRegistry, request: Request) -> Response {
        self.dispatch(registry, &mut Context::new(), request).await
    }

    /// Errors are mapped to responses here: failures caused by the request are logged at debug
    ///  level, everything else as an error with the full request context.
    #[async_recursion]
    pub async fn dispatch(&self, registry: &RepositoryRegistry, context: &mut Context, request: Request) -> Response {
        context.dispatched.insert(self.name.clone());
        let method = request.method.clone();
        let path = request.path.clone();
        trace!("{} {} in {}", method, path, self.name);

        match self.do_dispatch(registry, context, request).await {
            Ok(response) => response,
            Err(e) if e.is_client_error() => {
                debug!("rejected {} {} in {}: {}", method, path, self.name, e);
                Response::from_error(&e)
            }
            Err(e) => {
                error!("{} {} in {} failed: {}", method, path, self.name, e);
                Response::from_error(&e)
            }
        }
    }

    async fn do_dispatch(&self, registry: &RepositoryRegistry, context: &mut Context, request: Request) -> RepoResult<Response> {
        let path = parse_path(&request.path);
        match &self.view {
            View::Hosted(hosted) => hosted.handle(&path, request).await,
            View::Proxy(proxy) => proxy.handle(&path, request).await,
            View::Group(group) => group.handle(&self.name, registry, context, &path, request).await,
        }
    }
}

impl HostedView {
    async fn handle(&self, path: &MavenPath, request: Request) -> RepoResult<Response> {
        match request.method {
            Method::GET => Ok(Response::found(self.content.get(path).await?)),
            Method::PUT => {
                if let Some(artifact) = path.as_artifact() {
                    self.version_policy.check(artifact)?;
                }
                let payload = request.payload
                    .unwrap_or_else(|| Payload::from_bytes(Default::default(), None));
                // redeploys answer 201 as well, which is what Maven clients expect
                self.content.put(path, payload, self.redeploy_policy).await?;
                Ok(Response::status(StatusCode::CREATED))
            }
            Method::DELETE => {
                if self.content.delete(path).await? {
                    Ok(Response::status(StatusCode::NO_CONTENT))
                }
                else {
                    Ok(Response::status(StatusCode::NOT_FOUND))
                }
            }
            _ => Ok(Response::status(StatusCode::METHOD_NOT_ALLOWED)),
        }
    }
}

impl ProxyView {
    async fn handle(&self, path: &MavenPath, request: Request) -> RepoResult<Response> {
        if request.method != Method::GET {
            return Ok(Response::status(StatusCode::METHOD_NOT_ALLOWED));
        }
        if let Some(artifact) = path.as_artifact() {
            if !self.version_policy.allows(artifact) {
                debug!("{} is not served by {} proxy", artifact.version, self.version_policy);
                return Ok(Response::status(StatusCode::NOT_FOUND));
            }
        }
        Ok(Response::found(self.proxy.get(path).await?))
    }
}
