//! Read requests and change iteration
//!
//! `get_item[s]` serves from the session's working copy. When the read
//! targets the running datastore of a session that may see state data
//! and matching operational-data providers exist, the request is parked:
//! a `DataProvide` message goes to each provider, an `OperDataTimeout`
//! self-message is armed and the worker moves on. Provider responses are
//! merged into the working tree; when the last one arrives, or the
//! timeout's request identity still matches, the request is re-enqueued
//! and served from the already populated tree.

use std::sync::Arc;

use crate::core::error::{Error, ErrorKind};
use crate::core::runtime::CoreRuntime;
use crate::core::types::Datastore;
use crate::core::value::Item;
use crate::dm::commit_context::ChangeRecord;
use crate::np::{schema_path_within, strip_predicates, ProviderRequest};
use crate::observability::{self, Event};
use crate::yang::path::XPath;

use super::messages::{Request, RequestBody, Response, ResponsePayload};
use super::session::{RequestState, RpSession};
use super::{InternalBody, RequestProcessor, OPER_DATA_TIMEOUT};

/// Handle a `get_item`/`get_items` request. Returns `None` when the
/// request was parked waiting for operational data.
pub(crate) fn handle_read(
    runtime: &Arc<CoreRuntime>,
    rp_session: &Arc<RpSession>,
    mut dm_session: std::sync::MutexGuard<'_, crate::dm::Session>,
    request: Request,
) -> Option<Response> {
    let (path_text, single, offset, limit) = match &request.body {
        RequestBody::GetItem { path } => (path.clone(), true, None, None),
        RequestBody::GetItems {
            path,
            offset,
            limit,
        } => (path.clone(), false, *offset, *limit),
        _ => return Some(Response::from_error(Error::internal("not a read request"))),
    };

    let path = match XPath::parse(&path_text) {
        Ok(p) => p,
        Err(e) => return Some(Response::from_error(e)),
    };

    let resumed = rp_session.state().state == RequestState::DataLoaded;
    if !resumed {
        rp_session.state().state = RequestState::Reading;

        let wants_oper_data = dm_session.datastore == Datastore::Running
            && !dm_session.options.config_only
            && !dm_session.is_notification();
        if wants_oper_data {
            let providers = runtime.np.providers_for(&path.module, &path);
            if !providers.is_empty() {
                // make sure the configured part is loaded before the
                // provider values are merged on top of it
                if let Err(e) = runtime.dm.data_info(&mut dm_session, &path.module) {
                    return Some(Response::from_error(e));
                }
                let session_id = rp_session.id;
                let request_id = request.request_id;
                rp_session.state().park(request, request_id, providers.len());
                drop(dm_session);

                observability::info(
                    Event::OperDataWait,
                    &[
                        ("session", &session_id.to_string()),
                        ("path", &path_text),
                        ("providers", &providers.len().to_string()),
                    ],
                );
                for sub in &providers {
                    runtime.np.notify_data_provider_request(
                        sub,
                        &ProviderRequest {
                            xpath: sub.xpath.clone().unwrap_or_else(|| path_text.clone()),
                            session_id,
                            request_id,
                            subscription_id: sub.id,
                        },
                    );
                }
                RequestProcessor::arm_timer(
                    Arc::clone(runtime.rp.queue()),
                    OPER_DATA_TIMEOUT,
                    InternalBody::OperDataTimeout {
                        session_id,
                        request_id,
                    },
                );
                return None;
            }
        }
    }

    let response = if single {
        match runtime.dm.get_item(&mut dm_session, &path) {
            Ok(item) => Response::ok(ResponsePayload::Item(item)),
            Err(e) => Response::from_error(e),
        }
    } else {
        match runtime.dm.get_items(&mut dm_session, &path) {
            Ok(items) => window_items(items, offset, limit, &path),
            Err(e) => Response::from_error(e),
        }
    };
    rp_session.state().finish();
    Some(response)
}

/// Apply the `(offset, limit)` window. `offset == total` (and beyond)
/// reports `NotFound`; `offset == 0, limit > total` returns everything.
fn window_items(
    items: Vec<Item>,
    offset: Option<usize>,
    limit: Option<usize>,
    path: &XPath,
) -> Response {
    let total = items.len();
    let offset = offset.unwrap_or(0);
    if offset >= total {
        return Response::from_error(Error::not_found(format!(
            "no items at '{}' for the requested window",
            path
        )));
    }
    let mut out: Vec<Item> = items.into_iter().skip(offset).collect();
    if let Some(limit) = limit {
        out.truncate(limit);
    }
    Response::ok(ResponsePayload::Items(out))
}

/// Handle `get_changes` on a notification session.
pub(crate) fn handle_get_changes(
    runtime: &Arc<CoreRuntime>,
    dm_session: &mut crate::dm::Session,
    xpath: &str,
    offset: usize,
    limit: usize,
) -> Response {
    let commit_id = match dm_session.commit_id {
        Some(id) => id,
        None => {
            return Response::from_error(Error::unsupported(
                "get_changes requires a notification session",
            ))
        }
    };
    let ctx = match runtime.dm.commit_store().get(commit_id) {
        Some(ctx) => ctx,
        None => {
            return Response::from_error(Error::not_found(format!(
                "commit {} is not available",
                commit_id
            )))
        }
    };
    let path = match XPath::parse(xpath) {
        Ok(p) => p,
        Err(e) => return Response::from_error(e),
    };
    let schema = match runtime.catalog.get(&path.module) {
        Ok(s) => s,
        Err(e) => return Response::from_error(e),
    };
    let changes = match ctx.changes(&path.module, &schema) {
        Ok(c) => c,
        Err(e) => return Response::from_error(e),
    };

    let filter = path.schema_path();
    let matching: Vec<ChangeRecord> = changes
        .iter()
        .filter(|c| schema_path_within(&filter, &strip_predicates(c.path())))
        .cloned()
        .collect();

    let total = matching.len();
    if offset >= total {
        return Response::from_error(Error::with_xpath(
            ErrorKind::NotFound,
            "no changes in the requested window",
            xpath,
        ));
    }
    let out: Vec<ChangeRecord> = matching.into_iter().skip(offset).take(limit).collect();
    Response::ok(ResponsePayload::Changes(out))
}
