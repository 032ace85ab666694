//! Helpers for forms whose field names carry row ids, such as
//! `confirmed_<uuid>` or `quantity_<uuid>`.

use std::str::FromStr;

use rust_decimal::Decimal;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct FormFields(pub Vec<(String, String)>);

impl FormFields {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn all(&self, name: &str) -> Vec<&str> {
        self.0
            .iter()
            .filter(|(k, _)| k == name)
            .map(|(_, v)| v.trim())
            .filter(|v| !v.is_empty())
            .collect()
    }

    pub fn all_ids(&self, name: &str) -> Vec<Uuid> {
        self.all(name)
            .into_iter()
            .filter_map(|v| Uuid::parse_str(v).ok())
            .collect()
    }

    pub fn is_checked(&self, name: &str) -> bool {
        self.0.iter().any(|(k, _)| k == name)
    }

    /// `(id, raw value)` for every field named `<prefix><uuid>`, in form order.
    pub fn prefixed(&self, prefix: &str) -> Vec<(Uuid, &str)> {
        self.0
            .iter()
            .filter_map(|(k, v)| {
                let id = k.strip_prefix(prefix)?;
                Some((Uuid::parse_str(id).ok()?, v.trim()))
            })
            .collect()
    }
}

/// Empty input means "no value"; anything else must be a decimal.
pub fn parse_optional_decimal(raw: &str) -> Result<Option<Decimal>, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    Decimal::from_str(trimmed)
        .map(Some)
        .map_err(|_| format!("無效的數量: '{}'", trimmed))
}

pub fn parse_optional_int(raw: &str) -> Result<Option<i32>, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse::<i32>()
        .map(Some)
        .map_err(|_| format!("無效的數量: '{}'", trimmed))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> FormFields {
        FormFields(pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect())
    }

    #[test]
    fn test_prefixed_ids() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let form = fields(&[
            (&format!("confirmed_{}", a), " 3 "),
            ("confirmed_not-a-uuid", "1"),
            (&format!("confirmed_{}", b), ""),
            ("csrf", "x"),
        ]);
        assert_eq!(form.prefixed("confirmed_"), vec![(a, "3"), (b, "")]);
    }

    #[test]
    fn test_get_all_and_checked() {
        let a = Uuid::new_v4();
        let form = fields(&[
            ("selected_materials", &a.to_string()),
            ("selected_materials", "junk"),
            ("q", "  "),
            ("is_active", "on"),
        ]);
        assert_eq!(form.all_ids("selected_materials"), vec![a]);
        assert_eq!(form.get("q"), None);
        assert!(form.is_checked("is_active"));
        assert!(!form.is_checked("is_superuser"));
    }

    #[test]
    fn test_parse_optional_numbers() {
        assert_eq!(parse_optional_decimal(""), Ok(None));
        assert_eq!(parse_optional_decimal("2.50"), Ok(Some(Decimal::new(250, 2))));
        assert!(parse_optional_decimal("two").is_err());
        assert_eq!(parse_optional_int("-4"), Ok(Some(-4)));
        assert!(parse_optional_int("1.5").is_err());
    }
}
