use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

pub const SPEC_SELECT: &str = r#"
    SELECT mt.id AS material_id, mt.material_code, mt.material_description,
           l.name AS location, mt.bin,
           s.size, s.weight, s.detailed_description, s.image_path
    FROM materials mt
    JOIN storage_locations l ON l.id = mt.location_id
    LEFT JOIN material_specifications s ON s.material_id = mt.id
"#;

/// A material with its (possibly missing) specification.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MaterialSpecRow {
    pub material_id: Uuid,
    pub material_code: String,
    pub material_description: String,
    pub location: String,
    pub bin: String,
    pub size: Option<String>,
    pub weight: Option<Decimal>,
    pub detailed_description: Option<String>,
    pub image_path: Option<String>,
}
