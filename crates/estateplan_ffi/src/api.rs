//! Allocation API exposed to Dart via FRB.
//!
//! # Responsibility
//! - Map host UI events onto one process-wide allocation session.
//! - Convert results into flat response envelopes with stable error codes.
//!
//! # Invariants
//! - Exported functions never panic across the FFI boundary.
//! - Session state is kept between calls; the SQLite connection is not.
//! - Ids cross the boundary as strings and are parsed here.

use estateplan_core::db::open_db;
use estateplan_core::{
    core_version as core_version_inner, equal_split, init_logging as init_logging_inner,
    ping as ping_inner, AllocationConfig, AllocationError, AllocationSession,
    AllocationState, BeneficiaryKey, ContainerId, ContainerKind, SqliteLinkStore, ValidationError,
};
use log::warn;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};
use uuid::Uuid;

const DB_FILE_NAME: &str = "estateplan_allocations.sqlite3";
const DB_PATH_ENV: &str = "ESTATEPLAN_DB_PATH";
const PREVIEW_MAX_BENEFICIARIES: u32 = 1000;

static DB_PATH: OnceLock<PathBuf> = OnceLock::new();
static SESSION_STATE: OnceLock<Mutex<AllocationState>> = OnceLock::new();
static SESSION_CONFIG: OnceLock<Mutex<AllocationConfig>> = OnceLock::new();

/// Health check for FRB smoke integration.
#[flutter_rust_bridge::frb(sync)]
pub fn ping() -> String {
    ping_inner().to_owned()
}

#[flutter_rust_bridge::frb(sync)]
pub fn core_version() -> String {
    core_version_inner().to_owned()
}

/// Starts core file logging.
///
/// # FFI contract
/// - Idempotent for the same `level + log_dir`.
/// - Returns an empty string on success, an error message otherwise.
#[flutter_rust_bridge::frb(sync)]
pub fn init_logging(level: String, log_dir: String) -> String {
    match init_logging_inner(level.as_str(), log_dir.as_str()) {
        Ok(()) => String::new(),
        Err(err) => err.to_string(),
    }
}

/// Replaces the allocation settings used by later calls.
///
/// Accepts a JSON object with any of `tolerance_percent`, `write_mode`,
/// `removal_policy`, `commit_timing`; omitted keys take defaults.
/// Returns an empty string on success, an error message otherwise.
#[flutter_rust_bridge::frb(sync)]
pub fn allocation_configure(config_json: String) -> String {
    match AllocationConfig::from_json_str(&config_json) {
        Ok(config) => {
            *lock(session_config()) = config;
            String::new()
        }
        Err(err) => err.to_string(),
    }
}

/// Beneficiary identity as seen by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FfiBeneficiaryKey {
    /// Added in the form but not saved yet.
    Draft { local_id: String },
    Persisted { beneficiary_id: String },
}

/// One beneficiary's share.
#[derive(Debug, Clone, PartialEq)]
pub struct FfiShare {
    pub key: FfiBeneficiaryKey,
    /// Percentage with two decimals, e.g. `33.34`.
    pub percentage: f64,
}

/// Response envelope for allocation calls.
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationResponse {
    pub ok: bool,
    /// Current shares of the container, in display order.
    pub shares: Vec<FfiShare>,
    /// Persisted shares may not total 100 until `allocation_retry_rebalance`.
    pub needs_rebalance: bool,
    /// Human-readable message for diagnostics/UI.
    pub message: String,
    /// Stable code on failure (`not_100`, `no_positive_share`,
    /// `partial_redistribution`, `store_error`, ...).
    pub error_code: Option<String>,
}

impl AllocationResponse {
    fn failure(code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            shares: Vec::new(),
            needs_rebalance: false,
            message: message.into(),
            error_code: Some(code.to_string()),
        }
    }
}

/// Equal split percentages for `count` beneficiaries, without touching state.
#[flutter_rust_bridge::frb(sync)]
pub fn allocation_equal_split_preview(count: u32) -> Vec<f64> {
    let slots: Vec<u32> = (0..count.min(PREVIEW_MAX_BENEFICIARIES)).collect();
    equal_split(&slots)
        .into_iter()
        .map(|(_, share)| share.as_f64())
        .collect()
}

/// Opens a container for editing and returns its initial shares.
#[flutter_rust_bridge::frb(sync)]
pub fn allocation_container_selected(
    container_kind: String,
    container_id: String,
    beneficiaries: Vec<FfiBeneficiaryKey>,
) -> AllocationResponse {
    with_container(&container_kind, &container_id, |session, container| {
        let keys = parse_keys(&beneficiaries)?;
        session.on_container_selected(container, &keys)?;
        Ok("container selected".to_string())
    })
}

/// Reports the container's new beneficiary list (add, remove or reorder).
#[flutter_rust_bridge::frb(sync)]
pub fn allocation_beneficiaries_changed(
    container_kind: String,
    container_id: String,
    beneficiaries: Vec<FfiBeneficiaryKey>,
) -> AllocationResponse {
    with_container(&container_kind, &container_id, |session, container| {
        let keys = parse_keys(&beneficiaries)?;
        let outcome = session.on_beneficiary_set_changed(container, &keys)?;
        Ok(format!("beneficiaries updated: {outcome:?}").to_lowercase())
    })
}

/// Stores a user-typed percentage. Non-numeric input is stored as 0.
#[flutter_rust_bridge::frb(sync)]
pub fn allocation_manual_edit(
    container_kind: String,
    container_id: String,
    beneficiary: FfiBeneficiaryKey,
    raw_input: String,
) -> AllocationResponse {
    with_container(&container_kind, &container_id, |session, container| {
        let key = parse_key(&beneficiary)?;
        let stored = session.on_manual_edit(container, key, &raw_input)?;
        Ok(format!("stored {stored}%"))
    })
}

/// Validates the container before the wizard moves on.
#[flutter_rust_bridge::frb(sync)]
pub fn allocation_step_advance(container_kind: String, container_id: String) -> AllocationResponse {
    with_container(&container_kind, &container_id, |session, container| {
        session.on_step_advance_requested(container)?;
        Ok("allocation valid".to_string())
    })
}

#[flutter_rust_bridge::frb(sync)]
pub fn allocation_container_deselected(
    container_kind: String,
    container_id: String,
) -> AllocationResponse {
    with_container(&container_kind, &container_id, |session, container| {
        let existed = session.on_container_deselected(container);
        Ok(if existed {
            "container closed".to_string()
        } else {
            "container was not open".to_string()
        })
    })
}

/// Swaps a saved draft's local id for its database id.
#[flutter_rust_bridge::frb(sync)]
pub fn allocation_promote_draft(
    container_kind: String,
    container_id: String,
    local_id: String,
    beneficiary_id: String,
) -> AllocationResponse {
    with_container(&container_kind, &container_id, |session, container| {
        let draft = parse_uuid(&local_id, "local_id")?;
        let persisted = parse_uuid(&beneficiary_id, "beneficiary_id")?;
        session.promote_draft(container, draft, persisted)?;
        Ok("draft promoted".to_string())
    })
}

/// Validates and persists the container's shares.
#[flutter_rust_bridge::frb(sync)]
pub fn allocation_save(container_kind: String, container_id: String) -> AllocationResponse {
    with_container(&container_kind, &container_id, |session, container| {
        let report = session.save(container)?;
        Ok(format!("saved with {} writes", report.writes))
    })
}

#[flutter_rust_bridge::frb(sync)]
pub fn allocation_retry_rebalance(
    container_kind: String,
    container_id: String,
) -> AllocationResponse {
    with_container(&container_kind, &container_id, |session, container| {
        let report = session.retry_rebalance(container)?;
        Ok(format!("rebalanced with {} writes", report.writes))
    })
}

/// Drops every link of a deleted asset or policy.
#[flutter_rust_bridge::frb(sync)]
pub fn allocation_delete_container(
    container_kind: String,
    container_id: String,
) -> AllocationResponse {
    with_container(&container_kind, &container_id, |session, container| {
        let removed = session.delete_container(container)?;
        Ok(format!("removed {removed} links"))
    })
}

/// Unlinks a deleted beneficiary from every asset and policy.
#[flutter_rust_bridge::frb(sync)]
pub fn allocation_delete_beneficiary(beneficiary_id: String) -> AllocationResponse {
    let beneficiary = match parse_uuid(&beneficiary_id, "beneficiary_id") {
        Ok(value) => value,
        Err(err) => return failure_from(&err),
    };
    with_session(None, |session| {
        let reports = session.delete_beneficiary(beneficiary)?;
        Ok(format!("updated {} containers", reports.len()))
    })
}

/// Failure raised before the core is reached.
struct InputError(String);

enum CallError {
    Input(String),
    Core(AllocationError),
}

type CallResult<T> = Result<T, CallError>;

impl From<AllocationError> for CallError {
    fn from(value: AllocationError) -> Self {
        Self::Core(value)
    }
}

impl From<ValidationError> for CallError {
    fn from(value: ValidationError) -> Self {
        Self::Core(value.into())
    }
}

impl From<InputError> for CallError {
    fn from(value: InputError) -> Self {
        Self::Input(value.0)
    }
}

fn with_container(
    container_kind: &str,
    container_id: &str,
    op: impl FnOnce(&mut AllocationSession<SqliteLinkStore<'_>>, ContainerId) -> CallResult<String>,
) -> AllocationResponse {
    let container = match parse_container(container_kind, container_id) {
        Ok(container) => container,
        Err(err) => return failure_from(&err),
    };
    with_session(Some(container), |session| op(session, container))
}

fn with_session(
    container: Option<ContainerId>,
    op: impl FnOnce(&mut AllocationSession<SqliteLinkStore<'_>>) -> CallResult<String>,
) -> AllocationResponse {
    let db_path = resolve_db_path();
    let conn = match open_db(&db_path) {
        Ok(conn) => conn,
        Err(err) => return AllocationResponse::failure("db_open_failed", err.to_string()),
    };
    let store = match SqliteLinkStore::try_new(&conn) {
        Ok(store) => store,
        Err(err) => return AllocationResponse::failure("store_error", err.to_string()),
    };
    let config = lock(session_config()).clone();

    // Work on a copy so an unwinding `op` leaves the shared state as it was.
    let mut state_guard = lock(session_state());
    let mut session = AllocationSession::with_state(store, &config, state_guard.clone());
    let result = op(&mut session);

    let shares = container
        .map(|container| session.allocation(container))
        .unwrap_or_default()
        .into_iter()
        .map(|(key, share)| FfiShare {
            key: to_ffi_key(key),
            percentage: share.as_f64(),
        })
        .collect();
    let needs_rebalance = container.is_some_and(|container| session.needs_rebalance(container));
    *state_guard = session.into_state();

    match result {
        Ok(message) => AllocationResponse {
            ok: true,
            shares,
            needs_rebalance,
            message,
            error_code: None,
        },
        Err(err) => {
            let mut response = failure_from(&err);
            response.shares = shares;
            response.needs_rebalance = needs_rebalance;
            response
        }
    }
}

fn failure_from(err: &CallError) -> AllocationResponse {
    match err {
        CallError::Input(message) => AllocationResponse::failure("invalid_input", message.clone()),
        CallError::Core(err) => {
            if matches!(
                err,
                AllocationError::Store(_) | AllocationError::PartialRedistribution { .. }
            ) {
                warn!("event=ffi_call module=ffi status=error error_code={}", err.code());
            }
            AllocationResponse::failure(err.code(), err.to_string())
        }
    }
}

fn parse_container(kind: &str, id: &str) -> CallResult<ContainerId> {
    let kind = ContainerKind::parse(kind.trim()).ok_or_else(|| {
        InputError(format!("unknown container kind `{kind}`; expected asset|policy"))
    })?;
    Ok(ContainerId::new(kind, parse_uuid(id, "container_id")?))
}

fn parse_keys(keys: &[FfiBeneficiaryKey]) -> CallResult<Vec<BeneficiaryKey>> {
    keys.iter().map(parse_key).collect()
}

fn parse_key(key: &FfiBeneficiaryKey) -> CallResult<BeneficiaryKey> {
    Ok(match key {
        FfiBeneficiaryKey::Draft { local_id } => {
            BeneficiaryKey::Draft(parse_uuid(local_id, "local_id")?)
        }
        FfiBeneficiaryKey::Persisted { beneficiary_id } => {
            BeneficiaryKey::Persisted(parse_uuid(beneficiary_id, "beneficiary_id")?)
        }
    })
}

fn parse_uuid(value: &str, field: &str) -> CallResult<Uuid> {
    Uuid::parse_str(value.trim())
        .map_err(|_| InputError(format!("invalid {field} `{value}`")).into())
}

fn to_ffi_key(key: BeneficiaryKey) -> FfiBeneficiaryKey {
    match key {
        BeneficiaryKey::Draft(id) => FfiBeneficiaryKey::Draft {
            local_id: id.to_string(),
        },
        BeneficiaryKey::Persisted(id) => FfiBeneficiaryKey::Persisted {
            beneficiary_id: id.to_string(),
        },
    }
}

fn resolve_db_path() -> PathBuf {
    DB_PATH
        .get_or_init(|| {
            std::env::var(DB_PATH_ENV)
                .ok()
                .map(|raw| raw.trim().to_string())
                .filter(|raw| !raw.is_empty())
                .map_or_else(|| std::env::temp_dir().join(DB_FILE_NAME), PathBuf::from)
        })
        .clone()
}

fn session_state() -> &'static Mutex<AllocationState> {
    SESSION_STATE.get_or_init(|| Mutex::new(AllocationState::new()))
}

fn session_config() -> &'static Mutex<AllocationConfig> {
    SESSION_CONFIG.get_or_init(|| Mutex::new(AllocationConfig::default()))
}

/// Locks `mutex`, recovering the data if a previous holder panicked.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::{
        allocation_beneficiaries_changed, allocation_configure, allocation_container_deselected,
        allocation_container_selected, allocation_delete_container,
        allocation_equal_split_preview, allocation_manual_edit, allocation_promote_draft,
        allocation_save, allocation_step_advance, core_version, init_logging, ping,
        with_container, FfiBeneficiaryKey,
    };
    use uuid::Uuid;

    fn persisted() -> FfiBeneficiaryKey {
        FfiBeneficiaryKey::Persisted {
            beneficiary_id: Uuid::new_v4().to_string(),
        }
    }

    fn draft() -> FfiBeneficiaryKey {
        FfiBeneficiaryKey::Draft {
            local_id: Uuid::new_v4().to_string(),
        }
    }

    fn percentages(shares: &[super::FfiShare]) -> Vec<f64> {
        shares.iter().map(|share| share.percentage).collect()
    }

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }

    #[test]
    fn init_logging_rejects_relative_dir() {
        assert!(!init_logging("info".to_string(), "logs".to_string()).is_empty());
    }

    #[test]
    fn configure_rejects_unknown_fields_and_bad_tolerance() {
        assert!(!allocation_configure(r#"{"tolerance": 1}"#.to_string()).is_empty());
        assert!(!allocation_configure(r#"{"tolerance_percent": -1}"#.to_string()).is_empty());
        assert!(!allocation_configure("not json".to_string()).is_empty());
    }

    #[test]
    fn preview_sums_to_one_hundred() {
        assert_eq!(allocation_equal_split_preview(3), vec![33.33, 33.33, 33.34]);
        assert!(allocation_equal_split_preview(0).is_empty());
    }

    #[test]
    fn invalid_ids_are_reported_as_input_errors() {
        let response = allocation_container_selected(
            "vehicle".to_string(),
            Uuid::new_v4().to_string(),
            vec![],
        );
        assert!(!response.ok);
        assert_eq!(response.error_code.as_deref(), Some("invalid_input"));

        let response = allocation_container_selected(
            "asset".to_string(),
            Uuid::new_v4().to_string(),
            vec![FfiBeneficiaryKey::Draft {
                local_id: "draft-1".to_string(),
            }],
        );
        assert_eq!(response.error_code.as_deref(), Some("invalid_input"));
    }

    #[test]
    fn wizard_flow_selects_edits_validates_and_saves() {
        let container_id = Uuid::new_v4().to_string();
        let kind = || "policy".to_string();
        let (a, new_draft) = (persisted(), draft());

        let response =
            allocation_container_selected(kind(), container_id.clone(), vec![a.clone()]);
        assert!(response.ok, "{}", response.message);
        assert_eq!(percentages(&response.shares), vec![100.0]);

        let response = allocation_beneficiaries_changed(
            kind(),
            container_id.clone(),
            vec![a.clone(), new_draft.clone()],
        );
        assert_eq!(percentages(&response.shares), vec![50.0, 50.0]);

        let response =
            allocation_manual_edit(kind(), container_id.clone(), a.clone(), "60".to_string());
        assert_eq!(percentages(&response.shares), vec![60.0, 50.0]);

        let response = allocation_step_advance(kind(), container_id.clone());
        assert!(!response.ok);
        assert_eq!(response.error_code.as_deref(), Some("not_100"));

        allocation_manual_edit(kind(), container_id.clone(), new_draft.clone(), "40".to_string());
        assert!(allocation_step_advance(kind(), container_id.clone()).ok);

        let response = allocation_save(kind(), container_id.clone());
        assert_eq!(response.error_code.as_deref(), Some("unsaved_draft"));

        let FfiBeneficiaryKey::Draft { local_id } = new_draft else {
            unreachable!("draft helper builds drafts");
        };
        let response = allocation_promote_draft(
            kind(),
            container_id.clone(),
            local_id,
            Uuid::new_v4().to_string(),
        );
        assert!(response.ok, "{}", response.message);

        let response = allocation_save(kind(), container_id.clone());
        assert!(response.ok, "{}", response.message);
        assert_eq!(percentages(&response.shares), vec![60.0, 40.0]);
        assert!(!response.needs_rebalance);

        assert!(allocation_container_deselected(kind(), container_id.clone()).ok);
        let response = allocation_container_selected(kind(), container_id.clone(), vec![]);
        assert!(response.shares.is_empty());
        assert!(allocation_delete_container(kind(), container_id).ok);
    }

    #[test]
    fn panicking_call_leaves_session_state_intact() {
        let container_id = Uuid::new_v4().to_string();
        let response = allocation_container_selected(
            "asset".to_string(),
            container_id.clone(),
            vec![persisted()],
        );
        assert_eq!(percentages(&response.shares), vec![100.0]);

        let unwound = std::panic::catch_unwind(|| {
            with_container("asset", &container_id, |session, container| {
                session.on_container_deselected(container);
                panic!("call aborted mid-way");
            })
        });
        assert!(unwound.is_err());

        let response = allocation_step_advance("asset".to_string(), container_id);
        assert!(response.ok, "{}", response.message);
        assert_eq!(percentages(&response.shares), vec![100.0]);
    }
}
