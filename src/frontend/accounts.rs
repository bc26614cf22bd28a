//! Target account and container resolution.
//!
//! Every blob operation runs with a resolved (account, container) pair in
//! the request args before the router is dispatched. POST resolves from the
//! target headers (or the service id, for legacy clients); GET/HEAD/DELETE
//! resolve from the ids embedded in the blob id.

use account_service::{
    Account, AccountService, Container, UNKNOWN_ACCOUNT_ID, UNKNOWN_ACCOUNT_NAME,
    UNKNOWN_CONTAINER_ID, UNKNOWN_CONTAINER_NAME,
};
use cluster_map::BlobId;
use tracing::debug;

use crate::rest::{
    headers::{
        self, PRIVATE, SERVICE_ID, TARGET_ACCOUNT, TARGET_ACCOUNT_KEY, TARGET_CONTAINER,
        TARGET_CONTAINER_KEY,
    },
    Arg, RestError, RestErrorKind, RestRequest,
};

/// Rejects requests that arrive already carrying the pipeline's internal
/// keys. Runs before any collaborator is invoked.
pub fn ensure_no_internal_keys(request: &RestRequest) -> Result<(), RestError> {
    for key in [TARGET_ACCOUNT_KEY, TARGET_CONTAINER_KEY] {
        if request.has_arg(key) {
            return Err(RestError::bad_request(format!(
                "request must not carry internal key {key}"
            )));
        }
    }
    Ok(())
}

fn inject(request: &RestRequest, account: Account, container: Container) {
    debug!(
        account = %account.name,
        container = %container.name,
        "resolved target account and container"
    );
    request.set_arg(TARGET_ACCOUNT_KEY, Arg::TargetAccount(account));
    request.set_arg(TARGET_CONTAINER_KEY, Arg::TargetContainer(container));
}

/// Resolves the upload target from `x-ambry-target-account` and
/// `x-ambry-target-container`, falling back to the service id and then to
/// the unknown account for clients that predate the directory.
pub fn inject_for_post(
    request: &RestRequest,
    accounts: &dyn AccountService,
) -> Result<(), RestError> {
    let account_header = request.header(TARGET_ACCOUNT);
    let container_header = request.header(TARGET_CONTAINER);
    match account_header {
        None => match container_header {
            None => inject_from_service_id(request, accounts),
            Some(name) if name == UNKNOWN_CONTAINER_NAME => Err(RestError::new(
                RestErrorKind::InvalidContainer,
                "the unknown container cannot be named as a target",
            )),
            Some(_) => Err(RestError::missing_args(format!(
                "{TARGET_CONTAINER} is set but {TARGET_ACCOUNT} is not"
            ))),
        },
        Some(account_name) => {
            if account_name == UNKNOWN_ACCOUNT_NAME {
                return Err(RestError::new(
                    RestErrorKind::InvalidAccount,
                    "the unknown account cannot be named as a target",
                ));
            }
            let container_name = container_header.ok_or_else(|| {
                RestError::missing_args(format!(
                    "{TARGET_ACCOUNT} is set but {TARGET_CONTAINER} is not"
                ))
            })?;
            let account = accounts.account_by_name(&account_name).ok_or_else(|| {
                RestError::new(
                    RestErrorKind::InvalidAccount,
                    format!("no account named {account_name}"),
                )
            })?;
            if container_name == UNKNOWN_CONTAINER_NAME {
                return Err(RestError::new(
                    RestErrorKind::InvalidContainer,
                    "the unknown container cannot be named as a target",
                ));
            }
            let container = account
                .container_by_name(&container_name)
                .cloned()
                .ok_or_else(|| {
                    RestError::new(
                        RestErrorKind::InvalidContainer,
                        format!("account {account_name} has no container {container_name}"),
                    )
                })?;
            inject(request, account, container);
            Ok(())
        }
    }
}

/// No target headers at all: the service id is tried as an account name for
/// legacy clients, otherwise the upload lands in the unknown account. A
/// service id naming a real account that lacks the legacy default
/// containers also falls back to the unknown account.
fn inject_from_service_id(
    request: &RestRequest,
    accounts: &dyn AccountService,
) -> Result<(), RestError> {
    let is_private = headers::parse_bool(PRIVATE, request.header(PRIVATE).as_deref())?;
    if let Some(service_id) = request.header(SERVICE_ID) {
        if service_id == UNKNOWN_ACCOUNT_NAME {
            return Err(RestError::new(
                RestErrorKind::InvalidAccount,
                "service id names the unknown account",
            ));
        }
        if let Some(account) = accounts.account_by_name(&service_id) {
            if let Some(container) = account.legacy_default_container(is_private).cloned() {
                inject(request, account, container);
                return Ok(());
            }
            debug!(
                service_id,
                "account named by service id has no legacy containers, using unknown account"
            );
        }
    }
    let unknown = accounts
        .account_by_id(UNKNOWN_ACCOUNT_ID)
        .ok_or_else(|| RestError::internal("directory is missing the unknown account"))?;
    let container = unknown
        .legacy_default_container(is_private)
        .cloned()
        .ok_or_else(|| RestError::internal("unknown account is missing default containers"))?;
    inject(request, unknown, container);
    Ok(())
}

/// Resolves the owning account and container from the ids a blob id
/// carries, re-checking them against the directory.
pub fn inject_for_blob_id(
    request: &RestRequest,
    blob_id: &BlobId,
    accounts: &dyn AccountService,
) -> Result<(), RestError> {
    let account_id = blob_id.account_id();
    let container_id = blob_id.container_id();
    if account_id == UNKNOWN_ACCOUNT_ID {
        if container_id != UNKNOWN_CONTAINER_ID {
            return Err(RestError::new(
                RestErrorKind::InvalidContainer,
                format!("container {container_id} under the unknown account"),
            ));
        }
        let unknown = accounts
            .account_by_id(UNKNOWN_ACCOUNT_ID)
            .ok_or_else(|| RestError::internal("directory is missing the unknown account"))?;
        let container = unknown
            .container_by_id(UNKNOWN_CONTAINER_ID)
            .cloned()
            .ok_or_else(|| RestError::internal("unknown account is missing its container"))?;
        inject(request, unknown, container);
        return Ok(());
    }
    let account = accounts.account_by_id(account_id).ok_or_else(|| {
        RestError::new(
            RestErrorKind::InvalidAccount,
            format!("blob id names unknown account {account_id}"),
        )
    })?;
    if container_id == UNKNOWN_CONTAINER_ID {
        return Err(RestError::new(
            RestErrorKind::InvalidContainer,
            "blob id mixes a real account with the unknown container",
        ));
    }
    let container = account.container_by_id(container_id).cloned().ok_or_else(|| {
        RestError::new(
            RestErrorKind::InvalidContainer,
            format!("account {} has no container {container_id}", account.name),
        )
    })?;
    inject(request, account, container);
    Ok(())
}
