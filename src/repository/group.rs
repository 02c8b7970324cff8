use hyper::{Method, StatusCode};
use tracing::{debug, trace, warn};

use crate::error::RepoResult;
use crate::maven::coordinates::MavenPath;
use crate::repository::registry::RepositoryRegistry;
use crate::repository::{Context, Request, Response};

/// Read-only view over member repositories, asked in their configured order.
///
/// The first member that has a file serves it. Metadata is collected from all members, but as
///  merging is not supported, the first member's metadata is served.
pub struct GroupFacet {
    members: Vec<String>,
}

impl GroupFacet {
    pub fn new(members: Vec<String>) -> GroupFacet {
        GroupFacet {
            members,
        }
    }

    pub fn members(&self) -> &[String] {
        &self.members
    }

    pub async fn handle(&self, group: &str, registry: &RepositoryRegistry, context: &mut Context, path: &MavenPath, request: Request) -> RepoResult<Response> {
        if request.method != Method::GET {
            return Ok(Response::status(StatusCode::METHOD_NOT_ALLOWED));
        }

        let is_metadata = path.is_metadata();
        let mut found = vec![];
        for member in &self.members {
            if context.was_dispatched(member) {
                debug!("skipping {} in group {}: request was dispatched there already", member, group);
                continue;
            }
            let repository = match registry.get(member) {
                Some(repository) => repository,
                None => {
                    warn!("group {} has unknown member {}", group, member);
                    continue;
                }
            };

            let response = repository.dispatch(registry, context, Request::get(&request.path)).await;
            if response.status != StatusCode::OK {
                trace!("{} in {}: {}", request.path, member, response.status);
                continue;
            }
            if !is_metadata {
                return Ok(response);
            }
            found.push(response);
        }

        if found.len() > 1 {
            debug!("{} members of group {} have {}, serving the first", found.len(), group, request.path);
        }
        Ok(found.into_iter().next().unwrap_or_else(|| Response::status(StatusCode::NOT_FOUND)))
    }
}
