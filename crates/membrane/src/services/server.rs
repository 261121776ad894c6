// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Facade request dispatch.
//!
//! Maps one wire `ServiceRequest` onto the matching plugin call and the
//! result back onto a `ServiceResponse`. Plugin errors become error responses;
//! they never fail the stream.

use std::time::Duration;

use membrane_protocol::service_proto::{
    self, KvGetResponse, PreSignOperation, QueueReceiveResponse, SecretAccessResponse,
    SecretPutResponse, ServiceRequest, ServiceResponse, StorageExistsResponse,
    StorageListResponse, StoragePreSignUrlResponse, StorageReadResponse, service_request,
    service_response,
};
use tracing::debug;

use super::{
    AccessMode, KeyValueService, QueueService, Result, SecretService, ServiceError,
    ServicePlugins, StorageService,
};

/// Default lifetime of a pre-signed URL when the caller gives none.
const DEFAULT_PRESIGN_EXPIRY: Duration = Duration::from_secs(600);

/// Execute a facade request against the configured plugins.
pub async fn handle_service_request(
    plugins: &ServicePlugins,
    request: ServiceRequest,
) -> ServiceResponse {
    let Some(request) = request.request else {
        return ServiceResponse::error("INVALID_ARGUMENT", "empty service request");
    };

    match dispatch(plugins, request).await {
        Ok(response) => ServiceResponse {
            response: Some(response),
        },
        Err(e) => {
            debug!(code = e.code(), error = %e, "service request failed");
            ServiceResponse::error(e.code(), e.to_string())
        }
    }
}

async fn dispatch(
    plugins: &ServicePlugins,
    request: service_request::Request,
) -> Result<service_response::Response> {
    use service_request::Request;
    use service_response::Response;

    let empty = || Response::Empty(service_proto::EmptyResponse {});

    Ok(match request {
        Request::KvGet(req) => Response::KvGet(KvGetResponse {
            value: plugins.key_value()?.get(&req.store, &req.key).await?,
        }),
        Request::KvSet(req) => {
            plugins
                .key_value()?
                .set(&req.store, &req.key, req.value)
                .await?;
            empty()
        }
        Request::KvDelete(req) => {
            plugins.key_value()?.delete(&req.store, &req.key).await?;
            empty()
        }
        Request::StorageRead(req) => Response::StorageRead(StorageReadResponse {
            body: plugins.storage()?.read(&req.bucket, &req.key).await?,
        }),
        Request::StorageWrite(req) => {
            plugins
                .storage()?
                .write(&req.bucket, &req.key, req.body)
                .await?;
            empty()
        }
        Request::StorageDelete(req) => {
            plugins.storage()?.delete(&req.bucket, &req.key).await?;
            empty()
        }
        Request::StorageList(req) => Response::StorageList(StorageListResponse {
            keys: plugins.storage()?.list(&req.bucket, &req.prefix).await?,
        }),
        Request::StoragePreSignUrl(req) => {
            let mode = match PreSignOperation::try_from(req.operation) {
                Ok(PreSignOperation::Read) => AccessMode::Read,
                Ok(PreSignOperation::Write) => AccessMode::Write,
                Err(_) => {
                    return Err(ServiceError::InvalidArgument(format!(
                        "unknown pre-sign operation {}",
                        req.operation
                    )));
                }
            };
            let expiry = match req.expiry_seconds {
                0 => DEFAULT_PRESIGN_EXPIRY,
                secs => Duration::from_secs(secs.into()),
            };
            Response::StoragePreSignUrl(StoragePreSignUrlResponse {
                url: plugins
                    .storage()?
                    .pre_sign_url(&req.bucket, &req.key, mode, expiry)
                    .await?,
            })
        }
        Request::StorageExists(req) => Response::StorageExists(StorageExistsResponse {
            exists: plugins.storage()?.exists(&req.bucket, &req.key).await?,
        }),
        Request::QueueSend(req) => {
            plugins.queue()?.send(&req.queue, req.payloads).await?;
            empty()
        }
        Request::QueueReceive(req) => {
            let depth = usize::try_from(req.depth).unwrap_or(usize::MAX);
            let tasks = plugins.queue()?.receive(&req.queue, depth).await?;
            Response::QueueReceive(QueueReceiveResponse {
                tasks: tasks
                    .into_iter()
                    .map(|task| service_proto::LeasedTask {
                        lease_id: task.lease_id,
                        payload: task.payload,
                    })
                    .collect(),
            })
        }
        Request::QueueComplete(req) => {
            plugins
                .queue()?
                .complete(&req.queue, &req.lease_id)
                .await?;
            empty()
        }
        Request::SecretPut(req) => {
            let stored = plugins.secrets()?.put(&req.name, req.value).await?;
            Response::SecretPut(SecretPutResponse {
                name: stored.name,
                version: stored.version,
            })
        }
        Request::SecretAccess(req) => {
            let secret = plugins.secrets()?.access(&req.name, &req.version).await?;
            Response::SecretAccess(SecretAccessResponse {
                version: secret.version,
                value: secret.value,
            })
        }
    })
}
