pub mod inventory;
pub mod rbac;
pub mod requisition;
pub mod specification;
pub mod user;

pub use inventory::{
    DifferenceStats, InventoryRecord, LocationStats, MaterialRow, StocktakeItemRow, StocktakeRow,
};
pub use rbac::{AuditLogDisplay, Group, UserWithGroups};
pub use requisition::{
    ImageRow, MachineModel, ProcessTypeOption, ProcessTypeRow, RequisitionItemRow, RequisitionRow, VersionRow,
    WorkOrderMaterialRow,
};
pub use specification::MaterialSpecRow;
pub use user::User;
