//! Status vocabularies and the requisition state machine.
//!
//! Statuses are stored as stable English codes; the Chinese labels are only
//! for display and exports.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("此申請單狀態不是待處理，無法進行物料確認。")]
    NotPending,
    #[error("此申請單已處理完成，無法補料。")]
    AlreadyCompleted,
    #[error("此物料清單版本中的所有物料尚未確認，無法進行最終簽收。")]
    UnconfirmedItems,
    #[error("找不到要簽收的物料清單版本。")]
    NoVersion,
    #[error("unknown status code: {0}")]
    UnknownStatus(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequisitionStatus {
    Pending,
    MaterialsConfirmed,
    Completed,
}

impl RequisitionStatus {
    pub const ALL: [RequisitionStatus; 3] = [
        RequisitionStatus::Pending,
        RequisitionStatus::MaterialsConfirmed,
        RequisitionStatus::Completed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RequisitionStatus::Pending => "pending",
            RequisitionStatus::MaterialsConfirmed => "materials_confirmed",
            RequisitionStatus::Completed => "completed",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RequisitionStatus::Pending => "待處理",
            RequisitionStatus::MaterialsConfirmed => "物料已確認",
            RequisitionStatus::Completed => "已處理",
        }
    }
}

impl FromStr for RequisitionStatus {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| WorkflowError::UnknownStatus(s.to_string()))
    }
}

impl fmt::Display for RequisitionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Display label for a stored status code, falling back to the raw code.
pub fn requisition_status_label(code: &str) -> &str {
    code.parse::<RequisitionStatus>()
        .map(|s| s.label())
        .unwrap_or(code)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StocktakeStatus {
    InProgress,
    Completed,
}

impl StocktakeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StocktakeStatus::InProgress => "in_progress",
            StocktakeStatus::Completed => "completed",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            StocktakeStatus::InProgress => "進行中",
            StocktakeStatus::Completed => "已完成",
        }
    }

    pub fn label_for(code: &str) -> &str {
        match code {
            "in_progress" => StocktakeStatus::InProgress.label(),
            "completed" => StocktakeStatus::Completed.label(),
            other => other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountStatus {
    Pending,
    Counted,
}

impl CountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CountStatus::Pending => "pending",
            CountStatus::Counted => "counted",
        }
    }

    pub fn label_for(code: &str) -> &str {
        match code {
            "pending" => "待盤點",
            "counted" => "已盤點",
            other => other,
        }
    }

    pub fn for_count(counted: Option<i32>) -> Self {
        if counted.is_some() {
            CountStatus::Counted
        } else {
            CountStatus::Pending
        }
    }
}

/// Kind of a quantity movement recorded in the audit tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionType {
    Allocation,
    Return,
    ManualUpdate,
    InitialImport,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Allocation => "ALLOCATION",
            TransactionType::Return => "RETURN",
            TransactionType::ManualUpdate => "MANUAL_UPDATE",
            TransactionType::InitialImport => "INITIAL_IMPORT",
        }
    }

    pub fn label_for(code: &str) -> &str {
        match code {
            "ALLOCATION" => "撥料",
            "RETURN" => "退料",
            "MANUAL_UPDATE" => "手動修改",
            "INITIAL_IMPORT" => "初始匯入",
            other => other,
        }
    }

    /// Stock adjustments on the material master: adding stock back is a return.
    pub fn for_stock_delta(delta: i32) -> Self {
        if delta > 0 {
            TransactionType::Return
        } else {
            TransactionType::Allocation
        }
    }

    /// Dispatch deltas on a work order: adding to the dispatched amount is an allocation.
    pub fn for_dispatch_delta(delta: Decimal) -> Self {
        if delta > Decimal::ZERO {
            TransactionType::Allocation
        } else {
            TransactionType::Return
        }
    }
}

pub fn ensure_can_confirm(status: RequisitionStatus) -> Result<(), WorkflowError> {
    if status == RequisitionStatus::Pending {
        Ok(())
    } else {
        Err(WorkflowError::NotPending)
    }
}

pub fn ensure_can_supplement(status: RequisitionStatus) -> Result<(), WorkflowError> {
    if status == RequisitionStatus::Completed {
        Err(WorkflowError::AlreadyCompleted)
    } else {
        Ok(())
    }
}

/// Every item carries a confirmed quantity. An empty list never counts as confirmed.
pub fn all_confirmed<T>(confirmed: &[Option<T>]) -> bool {
    !confirmed.is_empty() && confirmed.iter().all(Option::is_some)
}

pub fn all_signed_off(signed: &[bool]) -> bool {
    !signed.is_empty() && signed.iter().all(|s| *s)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    /// All items confirmed; the requisition moves to `materials_confirmed`.
    Confirmed,
    /// Saved, but some items still lack a confirmed quantity.
    Partial,
}

impl ConfirmationOutcome {
    pub fn next_status(&self) -> Option<RequisitionStatus> {
        match self {
            ConfirmationOutcome::Confirmed => Some(RequisitionStatus::MaterialsConfirmed),
            ConfirmationOutcome::Partial => None,
        }
    }
}

/// Confirmed quantities of a version once `updates` are laid over the
/// stored ones. Updates for unknown items are ignored.
pub fn confirmed_after<T: Copy>(current: &[(Uuid, Option<T>)], updates: &[(Uuid, Option<T>)]) -> Vec<Option<T>> {
    current
        .iter()
        .map(|(id, stored)| {
            updates
                .iter()
                .rev()
                .find(|(updated, _)| updated == id)
                .map_or(*stored, |(_, quantity)| *quantity)
        })
        .collect()
}

pub fn confirmation_outcome<T>(confirmed: &[Option<T>]) -> ConfirmationOutcome {
    // An empty version stays pending instead of counting as vacuously confirmed.
    if all_confirmed(confirmed) {
        ConfirmationOutcome::Confirmed
    } else {
        ConfirmationOutcome::Partial
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignOffOutcome {
    /// Current version fully signed; the requisition is completed.
    Completed,
    /// A historical version is fully signed; the requisition status is untouched.
    VersionSigned,
    /// Some items are still unsigned.
    Partial,
}

impl SignOffOutcome {
    pub fn next_status(&self) -> Option<RequisitionStatus> {
        match self {
            SignOffOutcome::Completed => Some(RequisitionStatus::Completed),
            SignOffOutcome::VersionSigned | SignOffOutcome::Partial => None,
        }
    }
}

/// Sign-off flags of a version after one more item is signed.
pub fn signed_after_item(items: &[(Uuid, bool)], item_id: Uuid) -> Vec<bool> {
    items.iter().map(|(id, signed)| *signed || *id == item_id).collect()
}

pub fn ensure_can_sign_off<T>(confirmed: &[Option<T>]) -> Result<(), WorkflowError> {
    if confirmed.iter().all(Option::is_some) {
        Ok(())
    } else {
        Err(WorkflowError::UnconfirmedItems)
    }
}

pub fn sign_off_outcome(signed: &[bool], is_current_version: bool) -> SignOffOutcome {
    if !all_signed_off(signed) {
        SignOffOutcome::Partial
    } else if is_current_version {
        SignOffOutcome::Completed
    } else {
        SignOffOutcome::VersionSigned
    }
}

/// What produced a new material-list version. Every new version puts the
/// requisition back to pending with its confirmation and sign-off stamps
/// cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionChange {
    Upload,
    Import,
    Activation,
    Supplement,
}

impl VersionChange {
    /// Only a supplement keeps the confirmed quantities and sign-offs of the
    /// items it copies from the previous version.
    pub fn keeps_progress(&self) -> bool {
        matches!(self, VersionChange::Supplement)
    }

    pub fn next_status(&self) -> RequisitionStatus {
        RequisitionStatus::Pending
    }
}

/// Effect of one dispatch delta on a work-order material.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchMovement {
    pub new_confirmed: Decimal,
    pub transaction_type: TransactionType,
    /// Dispatched more than required; saved anyway with a warning.
    pub over_required: bool,
}

pub fn plan_dispatch(required: Decimal, confirmed: Option<Decimal>, delta: Decimal) -> DispatchMovement {
    let new_confirmed = confirmed.unwrap_or(Decimal::ZERO) + delta;
    DispatchMovement {
        new_confirmed,
        transaction_type: TransactionType::for_dispatch_delta(delta),
        over_required: new_confirmed > required,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_round_trip_through_from_str() {
        for status in RequisitionStatus::ALL {
            assert_eq!(status.as_str().parse::<RequisitionStatus>(), Ok(status));
        }
        assert!("archived".parse::<RequisitionStatus>().is_err());
    }

    #[test]
    fn test_status_labels() {
        assert_eq!(requisition_status_label("pending"), "待處理");
        assert_eq!(requisition_status_label("materials_confirmed"), "物料已確認");
        assert_eq!(requisition_status_label("completed"), "已處理");
        assert_eq!(requisition_status_label("legacy"), "legacy");
        assert_eq!(RequisitionStatus::Completed.to_string(), "已處理");
    }

    #[test]
    fn test_confirmation_only_while_pending() {
        assert!(ensure_can_confirm(RequisitionStatus::Pending).is_ok());
        assert_eq!(
            ensure_can_confirm(RequisitionStatus::MaterialsConfirmed),
            Err(WorkflowError::NotPending)
        );
        assert_eq!(
            ensure_can_confirm(RequisitionStatus::Completed),
            Err(WorkflowError::NotPending)
        );
    }

    #[test]
    fn test_confirmation_outcome() {
        let one = Some(Decimal::ONE);
        assert_eq!(confirmation_outcome(&[one, one]), ConfirmationOutcome::Confirmed);
        assert_eq!(confirmation_outcome(&[one, None]), ConfirmationOutcome::Partial);
        assert_eq!(confirmation_outcome::<Decimal>(&[]), ConfirmationOutcome::Partial);
        // Zero is a real confirmation.
        assert_eq!(
            confirmation_outcome(&[Some(Decimal::ZERO)]),
            ConfirmationOutcome::Confirmed
        );
    }

    #[test]
    fn test_sign_off_requires_confirmed_items() {
        assert!(ensure_can_sign_off(&[Some(1), Some(2)]).is_ok());
        assert_eq!(
            ensure_can_sign_off(&[Some(1), None]),
            Err(WorkflowError::UnconfirmedItems)
        );
    }

    #[test]
    fn test_sign_off_outcome() {
        assert_eq!(sign_off_outcome(&[true, true], true), SignOffOutcome::Completed);
        assert_eq!(sign_off_outcome(&[true, true], false), SignOffOutcome::VersionSigned);
        assert_eq!(sign_off_outcome(&[true, false], true), SignOffOutcome::Partial);
        assert_eq!(sign_off_outcome(&[], true), SignOffOutcome::Partial);
    }

    #[test]
    fn test_supplement_blocked_when_completed() {
        assert!(ensure_can_supplement(RequisitionStatus::Pending).is_ok());
        assert!(ensure_can_supplement(RequisitionStatus::MaterialsConfirmed).is_ok());
        assert_eq!(
            ensure_can_supplement(RequisitionStatus::Completed),
            Err(WorkflowError::AlreadyCompleted)
        );
    }

    #[test]
    fn test_transaction_type_direction() {
        assert_eq!(TransactionType::for_stock_delta(5), TransactionType::Return);
        assert_eq!(TransactionType::for_stock_delta(-5), TransactionType::Allocation);
        assert_eq!(
            TransactionType::for_dispatch_delta(Decimal::new(25, 1)),
            TransactionType::Allocation
        );
        assert_eq!(
            TransactionType::for_dispatch_delta(Decimal::new(-1, 0)),
            TransactionType::Return
        );
        assert_eq!(TransactionType::label_for("INITIAL_IMPORT"), "初始匯入");
    }

    #[test]
    fn test_count_status() {
        assert_eq!(CountStatus::for_count(Some(0)), CountStatus::Counted);
        assert_eq!(CountStatus::for_count(None), CountStatus::Pending);
        assert_eq!(CountStatus::label_for("counted"), "已盤點");
        assert_eq!(StocktakeStatus::label_for("in_progress"), "進行中");
    }
    #[test]
    fn test_confirming_every_item_moves_to_materials_confirmed() {
        let (a, b) = (Uuid::from_u128(1), Uuid::from_u128(2));
        let current = [(a, Some(Decimal::ONE)), (b, None)];

        let partial = confirmed_after(&current, &[(a, Some(Decimal::from(2)))]);
        assert_eq!(partial, vec![Some(Decimal::from(2)), None]);
        assert_eq!(confirmation_outcome(&partial).next_status(), None);

        let full = confirmed_after(&current, &[(b, Some(Decimal::ZERO))]);
        assert_eq!(
            confirmation_outcome(&full).next_status(),
            Some(RequisitionStatus::MaterialsConfirmed)
        );
    }

    #[test]
    fn test_clearing_a_quantity_keeps_requisition_pending() {
        let a = Uuid::from_u128(1);
        let current = [(a, Some(Decimal::ONE))];
        let after = confirmed_after(&current, &[(a, None), (Uuid::from_u128(9), Some(Decimal::ONE))]);
        assert_eq!(after, vec![None]);
        assert_eq!(confirmation_outcome(&after), ConfirmationOutcome::Partial);
    }

    #[test]
    fn test_signing_last_item_completes_current_version_only() {
        let (a, b) = (Uuid::from_u128(1), Uuid::from_u128(2));
        let items = [(a, true), (b, false)];

        let signed = signed_after_item(&items, b);
        assert_eq!(signed, vec![true, true]);
        assert_eq!(
            sign_off_outcome(&signed, true).next_status(),
            Some(RequisitionStatus::Completed)
        );
        assert_eq!(sign_off_outcome(&signed, false).next_status(), None);

        let still_open = signed_after_item(&[(a, false), (b, false)], a);
        assert_eq!(sign_off_outcome(&still_open, true), SignOffOutcome::Partial);
    }

    #[test]
    fn test_new_versions_reset_to_pending() {
        for change in [
            VersionChange::Upload,
            VersionChange::Import,
            VersionChange::Activation,
            VersionChange::Supplement,
        ] {
            assert_eq!(change.next_status(), RequisitionStatus::Pending);
        }
        assert!(VersionChange::Supplement.keeps_progress());
        assert!(!VersionChange::Activation.keeps_progress());
        assert!(!VersionChange::Upload.keeps_progress());
    }

    #[test]
    fn test_plan_dispatch() {
        let required = Decimal::from(10);

        let first = plan_dispatch(required, None, Decimal::from(4));
        assert_eq!(first.new_confirmed, Decimal::from(4));
        assert_eq!(first.transaction_type, TransactionType::Allocation);
        assert!(!first.over_required);

        let over = plan_dispatch(required, Some(Decimal::from(8)), Decimal::new(25, 1));
        assert_eq!(over.new_confirmed, Decimal::new(105, 1));
        assert!(over.over_required);

        let back = plan_dispatch(required, Some(Decimal::from(8)), Decimal::from(-3));
        assert_eq!(back.new_confirmed, Decimal::from(5));
        assert_eq!(back.transaction_type, TransactionType::Return);
        assert!(!back.over_required);
    }
}
