//! Request dispatch
//!
//! One entry point per queued message. Request dispatch binds the
//! message to its session, clears the session's error slate, takes the
//! commit latch (shared for reads and edits, exclusive for commit) and
//! routes by message kind. Session teardown is deferred while other
//! messages of the session are inflight; the last one performs it.

use std::sync::mpsc::Sender;
use std::sync::{Arc, RwLockReadGuard, RwLockWriteGuard};

use crate::core::error::Error;
use crate::core::runtime::CoreRuntime;
use crate::dm::procedures::ProcedureKind;
use crate::np::{SubscriptionHandler, SubscriptionKind};
use crate::observability::{self, Event};
use crate::yang::path::XPath;

use super::get;
use super::messages::{
    InternalBody, Message, Request, RequestBody, Response, ResponsePayload, SchemaInfo,
};
use super::session::RpSession;
use super::{RequestProcessor, COMMIT_RELEASE_TIMEOUT};

enum LatchGuard<'a> {
    Shared(RwLockReadGuard<'a, ()>),
    Exclusive(RwLockWriteGuard<'a, ()>),
}

fn send(reply: &Option<Sender<Response>>, response: Response) {
    if let Some(tx) = reply {
        let _ = tx.send(response);
    }
}

/// Process one queued message.
pub(crate) fn process(runtime: &Arc<CoreRuntime>, message: Message) {
    match message {
        Message::Internal(body) => process_internal(runtime, body),
        Message::Request(request) => process_request(runtime, request),
    }
}

fn process_internal(runtime: &Arc<CoreRuntime>, body: InternalBody) {
    match body {
        InternalBody::UnsubscribeDestination { destination } => {
            runtime.np.unsubscribe_destination(&destination);
        }
        InternalBody::CommitRelease { commit_id } => {
            runtime.dm.release_commit(commit_id);
        }
        InternalBody::OperDataTimeout {
            session_id,
            request_id,
        } => {
            if let Some(session) = runtime.rp.session(session_id) {
                let resumed = session.state().wait_expired(request_id);
                if let Some(request) = resumed {
                    observability::warn(
                        Event::OperDataTimeout,
                        &[("session", &session_id.to_string())],
                    );
                    let _ = runtime.rp.queue.enqueue(Message::Request(request));
                }
            }
        }
        InternalBody::DataProvideResp {
            session_id,
            request_id,
            items,
        } => {
            let session = match runtime.rp.session(session_id) {
                Some(s) => s,
                None => return,
            };
            // a stale identity means the request already resumed or died
            let valid = {
                let state = session.state();
                state
                    .pending
                    .as_ref()
                    .map(|p| p.request_id == request_id)
                    .unwrap_or(false)
            };
            if !valid {
                return;
            }
            {
                let mut dm_session = session.dm();
                runtime.dm.apply_provider_items(&mut dm_session, &items);
            }
            let resumed = session.state().provider_answered(request_id);
            if let Some(request) = resumed {
                observability::info(
                    Event::OperDataLoaded,
                    &[("session", &session_id.to_string())],
                );
                let _ = runtime.rp.queue.enqueue(Message::Request(request));
            }
        }
    }
}

fn process_request(runtime: &Arc<CoreRuntime>, request: Request) {
    let reply = request.reply.clone();
    let session_ref = request.session_id;
    let request_id = request.request_id;

    // session_start is the only request with no session to bind to
    let request = match request.body {
        RequestBody::SessionStart {
            credentials,
            datastore,
            commit_id,
        } => {
            let response = match commit_id {
                Some(cid) => match runtime.dm.notification_session_start(credentials, cid) {
                    Ok(dm_session) => {
                        let id = dm_session.id;
                        runtime.rp.insert_session(RpSession::new(dm_session));
                        Response::ok(ResponsePayload::SessionId(id))
                    }
                    Err(e) => Response::from_error(e),
                },
                None => {
                    let dm_session = runtime.dm.session_start(credentials, datastore);
                    let id = dm_session.id;
                    runtime.rp.insert_session(RpSession::new(dm_session));
                    Response::ok(ResponsePayload::SessionId(id))
                }
            };
            send(&reply, response);
            return;
        }
        body => Request {
            session_id: session_ref,
            request_id,
            body,
            reply: request.reply,
        },
    };

    let session = match runtime.rp.session(request.session_id) {
        Some(s) => s,
        None => {
            send(
                &reply,
                Response::from_error(Error::not_found(format!(
                    "unknown session {}",
                    request.session_id
                ))),
            );
            return;
        }
    };
    let session_id = session.id;
    session.message_arrived();

    let (response, stop_now) = dispatch_body(runtime, &session, request);
    if let Some(response) = response {
        send(&reply, response);
    }

    if stop_now {
        teardown(runtime, session_id);
    }
    if session.message_done() {
        teardown(runtime, session_id);
    }
}

fn teardown(runtime: &Arc<CoreRuntime>, session_id: u32) {
    if let Some(session) = runtime.rp.remove_session(session_id) {
        let mut dm_session = session.dm();
        runtime.dm.session_stop(&mut dm_session);
    }
}

fn dispatch_body(
    runtime: &Arc<CoreRuntime>,
    session: &Arc<RpSession>,
    request: Request,
) -> (Option<Response>, bool) {
    let _latch = if request.body.is_commit() {
        LatchGuard::Exclusive(
            runtime
                .rp
                .commit_latch
                .write()
                .unwrap_or_else(|p| p.into_inner()),
        )
    } else {
        LatchGuard::Shared(
            runtime
                .rp
                .commit_latch
                .read()
                .unwrap_or_else(|p| p.into_inner()),
        )
    };

    let mut dm_session = session.dm();
    dm_session.clear_errors();

    if dm_session.is_notification() && !request.body.allowed_on_notification_session() {
        let error = Error::unsupported(format!(
            "'{}' is not allowed on a notification session",
            request.body.name()
        ));
        dm_session.report_error(&error);
        observability::warn(
            Event::RequestRejected,
            &[
                ("session", &session.id.to_string()),
                ("operation", request.body.name()),
            ],
        );
        return (Some(Response::from_error(error)), false);
    }

    if matches!(request.body, RequestBody::SessionStop) {
        let stop_now = session.request_stop();
        drop(dm_session);
        return (Some(Response::ok(ResponsePayload::None)), stop_now);
    }

    if matches!(
        request.body,
        RequestBody::GetItem { .. } | RequestBody::GetItems { .. }
    ) {
        let response = get::handle_read(runtime, session, dm_session, request);
        if let Some(r) = &response {
            if !r.is_ok() {
                let mut dm_session = session.dm();
                for error in &r.errors {
                    dm_session.report_error(error);
                }
            }
        }
        return (response, false);
    }

    let response = match request.body {
        RequestBody::SessionRefresh => match runtime.dm.refresh(&mut dm_session) {
            Ok(up_to_date) => Response::ok(ResponsePayload::UpToDate(up_to_date)),
            Err(e) => Response::from_error(e),
        },
        RequestBody::SessionSwitchDs { datastore } => {
            runtime.dm.session_switch_ds(&mut dm_session, datastore);
            Response::ok(ResponsePayload::None)
        }
        RequestBody::SessionSetOpts { options } => {
            dm_session.options = options;
            Response::ok(ResponsePayload::None)
        }
        RequestBody::ListSchemas => {
            let schemas: Vec<SchemaInfo> = runtime
                .catalog
                .list()
                .into_iter()
                .map(SchemaInfo::from)
                .collect();
            Response::ok(ResponsePayload::Schemas(schemas))
        }
        RequestBody::GetSchema { module, revision } => {
            match runtime.catalog.schema_text(&module, revision.as_deref()) {
                Ok(text) => Response::ok(ResponsePayload::SchemaText(text)),
                Err(e) => Response::from_error(e),
            }
        }
        RequestBody::ModuleInstall {
            module,
            revision,
            installed,
        } => {
            let result = if installed {
                runtime.catalog.install(&module, revision.as_deref())
            } else {
                runtime.catalog.uninstall(&module)
            };
            match result {
                Ok(()) => {
                    runtime
                        .np
                        .notify_module_install(&module, revision.as_deref(), installed);
                    Response::ok(ResponsePayload::None)
                }
                Err(e) => Response::from_error(e),
            }
        }
        RequestBody::FeatureEnable {
            module,
            feature,
            enabled,
        } => match runtime.catalog.set_feature(&module, &feature, enabled) {
            Ok(()) => {
                let persisted = runtime.pm.set_module_feature(&module, &feature, enabled);
                runtime.np.notify_feature_enable(&module, &feature, enabled);
                match persisted {
                    Ok(()) => Response::ok(ResponsePayload::None),
                    Err(e) => Response::from_error(e),
                }
            }
            Err(e) => Response::from_error(e),
        },
        RequestBody::SetItem {
            path,
            value,
            options,
        } => match runtime.dm.set_item(&mut dm_session, &path, value, options) {
            Ok(()) => Response::ok(ResponsePayload::None),
            Err(e) => Response::from_error(e),
        },
        RequestBody::DeleteItem { path, options } => {
            match runtime.dm.delete_item(&mut dm_session, &path, options) {
                Ok(()) => Response::ok(ResponsePayload::None),
                Err(e) => Response::from_error(e),
            }
        }
        RequestBody::MoveItem {
            path,
            position,
            relative,
        } => match runtime
            .dm
            .move_item(&mut dm_session, &path, position, relative.as_deref())
        {
            Ok(()) => Response::ok(ResponsePayload::None),
            Err(e) => Response::from_error(e),
        },
        RequestBody::Validate => match runtime.dm.validate(&mut dm_session) {
            Ok(()) => Response::ok(ResponsePayload::None),
            Err(errors) => Response::from_errors(errors),
        },
        RequestBody::Commit => match runtime.dm.commit(&mut dm_session, &runtime.np) {
            Ok(commit_id) => {
                if let Some(id) = commit_id {
                    // bound the context's lifetime if a subscriber
                    // never acknowledges
                    if runtime.dm.commit_store().contains(id) {
                        RequestProcessor::arm_timer(
                            Arc::clone(runtime.rp.queue()),
                            COMMIT_RELEASE_TIMEOUT,
                            InternalBody::CommitRelease { commit_id: id },
                        );
                    }
                }
                Response::ok(ResponsePayload::CommitId(commit_id))
            }
            Err(errors) => Response::from_errors(errors),
        },
        RequestBody::DiscardChanges => {
            runtime.dm.discard_changes(&mut dm_session);
            Response::ok(ResponsePayload::None)
        }
        RequestBody::CopyConfig { module, src, dst } => {
            match runtime
                .dm
                .copy_config(&mut dm_session, module.as_deref(), src, dst)
            {
                Ok(()) => Response::ok(ResponsePayload::None),
                Err(e) => Response::from_error(e),
            }
        }
        RequestBody::Lock { module } => {
            let result = match module.as_deref() {
                Some(m) => runtime.dm.lock_module(&mut dm_session, m),
                None => runtime.dm.lock_datastore(&mut dm_session),
            };
            match result {
                Ok(()) => Response::ok(ResponsePayload::None),
                Err(e) => Response::from_error(e),
            }
        }
        RequestBody::Unlock { module } => {
            let result = match module.as_deref() {
                Some(m) => runtime.dm.unlock_module(&mut dm_session, m),
                None => runtime.dm.unlock_datastore(&mut dm_session),
            };
            match result {
                Ok(()) => Response::ok(ResponsePayload::None),
                Err(e) => Response::from_error(e),
            }
        }
        RequestBody::Subscribe { spec } => {
            let module = spec.module.clone();
            let enable_running = spec.options.enable_running;
            match runtime.np.subscribe(spec) {
                Ok(id) => {
                    let enabled = if enable_running {
                        runtime.dm.enable_module_running(&module, true)
                    } else {
                        Ok(())
                    };
                    match enabled {
                        Ok(()) => Response::ok(ResponsePayload::SubscriptionId(id)),
                        Err(e) => Response::from_error(e),
                    }
                }
                Err(e) => Response::from_error(e),
            }
        }
        RequestBody::Unsubscribe { destination, id } => {
            match runtime.np.unsubscribe(&destination, id) {
                Ok(()) => Response::ok(ResponsePayload::None),
                Err(e) => Response::from_error(e),
            }
        }
        RequestBody::CheckEnabledRunning { module, xpath } => {
            match runtime.dm.check_enabled_running(&module, xpath.as_deref()) {
                Ok(enabled) => Response::ok(ResponsePayload::Enabled(enabled)),
                Err(e) => Response::from_error(e),
            }
        }
        RequestBody::GetChanges {
            xpath,
            offset,
            limit,
        } => get::handle_get_changes(runtime, &mut dm_session, &xpath, offset, limit),
        RequestBody::Rpc { xpath, args } => handle_procedure(
            runtime,
            &mut dm_session,
            ProcedureKind::Rpc,
            SubscriptionKind::Rpc,
            &xpath,
            args,
        ),
        RequestBody::Action { xpath, args } => handle_procedure(
            runtime,
            &mut dm_session,
            ProcedureKind::Action,
            SubscriptionKind::Action,
            &xpath,
            args,
        ),
        RequestBody::EventNotif { xpath, args } => {
            handle_event_notif(runtime, &mut dm_session, &xpath, args)
        }
        RequestBody::SessionStart { .. } | RequestBody::SessionStop => {
            Response::from_error(Error::internal("request handled out of band"))
        }
        RequestBody::GetItem { .. } | RequestBody::GetItems { .. } => {
            Response::from_error(Error::internal("request handled out of band"))
        }
    };

    for error in &response.errors {
        dm_session.report_error(error);
    }
    (Some(response), false)
}

/// Validate, route to the unique subscriber, validate the output.
fn handle_procedure(
    runtime: &Arc<CoreRuntime>,
    dm_session: &mut crate::dm::Session,
    kind: ProcedureKind,
    subscription_kind: SubscriptionKind,
    xpath: &str,
    args: Vec<crate::core::value::Item>,
) -> Response {
    let materialized = match runtime
        .dm
        .validate_procedure(dm_session, kind, xpath, &args, true)
    {
        Ok(items) => items,
        Err(e) => return Response::from_error(e),
    };

    let path = match XPath::parse(xpath) {
        Ok(p) => p,
        Err(e) => return Response::from_error(e),
    };
    let schema = match runtime.catalog.get(&path.module) {
        Ok(s) => s,
        Err(e) => return Response::from_error(e),
    };
    let schema_path = schema.schema_path(&path.step_names());

    let subscription =
        match runtime
            .np
            .procedure_subscription(subscription_kind, &path.module, &schema_path)
        {
            Some(s) => s,
            None => {
                return Response::from_error(Error::not_found(format!(
                    "no {} subscription for '{}'",
                    subscription_kind.as_str(),
                    schema_path
                )))
            }
        };

    let output = match &subscription.handler {
        SubscriptionHandler::Procedure(handler) => match handler(xpath, &materialized) {
            Ok(output) => output,
            Err(e) => return Response::from_error(e),
        },
        _ => return Response::from_error(Error::internal("subscription has a mismatched handler")),
    };

    // outputs are validated before being forwarded to the originator
    match runtime
        .dm
        .validate_procedure(dm_session, kind, xpath, &output, false)
    {
        Ok(validated) => Response::ok(ResponsePayload::Output(validated)),
        Err(e) => Response::from_error(e),
    }
}

/// Validate and broadcast an event notification.
fn handle_event_notif(
    runtime: &Arc<CoreRuntime>,
    dm_session: &mut crate::dm::Session,
    xpath: &str,
    args: Vec<crate::core::value::Item>,
) -> Response {
    let materialized = match runtime.dm.validate_procedure(
        dm_session,
        ProcedureKind::EventNotification,
        xpath,
        &args,
        true,
    ) {
        Ok(items) => items,
        Err(e) => return Response::from_error(e),
    };

    let path = match XPath::parse(xpath) {
        Ok(p) => p,
        Err(e) => return Response::from_error(e),
    };
    let schema = match runtime.catalog.get(&path.module) {
        Ok(s) => s,
        Err(e) => return Response::from_error(e),
    };
    let schema_path = schema.schema_path(&path.step_names());

    for subscription in runtime.np.event_subscriptions(&path.module, &schema_path) {
        if let SubscriptionHandler::EventNotification(handler) = &subscription.handler {
            handler(xpath, &materialized);
        }
    }
    Response::ok(ResponsePayload::None)
}
