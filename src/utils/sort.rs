//! Whitelisted column sorting for list pages.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    pub key: String,
    pub descending: bool,
    column: &'static str,
}

/// A clickable column header that toggles between ascending and descending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortHeader {
    pub href: String,
    pub label: String,
    pub icon: &'static str,
}

impl SortSpec {
    /// Resolves a requested sort key against `(key, sql column)` pairs.
    /// Unknown keys fall back to `default_key`; any order other than
    /// `desc` is ascending.
    pub fn resolve(
        requested: Option<&str>,
        order: Option<&str>,
        allowed: &[(&'static str, &'static str)],
        default_key: &'static str,
        default_desc: bool,
    ) -> Self {
        let found = requested.and_then(|r| allowed.iter().find(|(key, _)| *key == r));
        let (key, column, descending) = match found {
            Some((key, column)) => (*key, *column, order == Some("desc")),
            None => {
                let column = allowed
                    .iter()
                    .find(|(key, _)| *key == default_key)
                    .map(|(_, c)| *c)
                    .unwrap_or(default_key);
                let descending = match order {
                    Some(o) => o == "desc",
                    None => default_desc,
                };
                (default_key, column, descending)
            }
        };
        Self {
            key: key.to_string(),
            descending,
            column,
        }
    }

    pub fn order_by(&self) -> String {
        format!("{} {}", self.column, if self.descending { "DESC" } else { "ASC" })
    }

    pub fn order(&self) -> &'static str {
        if self.descending {
            "desc"
        } else {
            "asc"
        }
    }

    /// `extra` is an already-encoded query string (without `?`) carried over
    /// so filters survive a re-sort.
    pub fn header(&self, field: &str, label: &str, extra: &str) -> SortHeader {
        let active = self.key == field;
        let next = if active && !self.descending { "desc" } else { "asc" };
        let mut href = format!("?sort_by={}&order={}", urlencoding::encode(field), next);
        if !extra.is_empty() {
            href.push('&');
            href.push_str(extra);
        }
        let icon = match (active, self.descending) {
            (true, false) => " ▲",
            (true, true) => " ▼",
            _ => "",
        };
        SortHeader {
            href,
            label: label.to_string(),
            icon,
        }
    }

    pub fn headers(&self, columns: &[(&str, &str)], extra: &str) -> Vec<SortHeader> {
        columns
            .iter()
            .map(|(field, label)| self.header(field, label, extra))
            .collect()
    }
}

/// Encodes non-empty filter pairs into a query string fragment.
pub fn query_string(pairs: &[(&str, &str)]) -> String {
    pairs
        .iter()
        .filter(|(_, v)| !v.is_empty())
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALLOWED: [(&str, &str); 3] = [
        ("material_number", "ri.material_number"),
        ("item_name", "ri.item_name"),
        ("required_quantity", "ri.required_quantity"),
    ];

    #[test]
    fn test_unknown_key_falls_back_to_default() {
        let sort = SortSpec::resolve(Some("1; DROP TABLE x"), Some("desc"), &ALLOWED, "material_number", false);
        assert_eq!(sort.key, "material_number");
        assert_eq!(sort.order_by(), "ri.material_number DESC");
    }

    #[test]
    fn test_known_key_and_order() {
        let sort = SortSpec::resolve(Some("item_name"), Some("asc"), &ALLOWED, "material_number", false);
        assert_eq!(sort.order_by(), "ri.item_name ASC");
        let sort = SortSpec::resolve(None, None, &ALLOWED, "material_number", true);
        assert_eq!(sort.order_by(), "ri.material_number DESC");
    }

    #[test]
    fn test_header_toggles_and_marks_active_column() {
        let sort = SortSpec::resolve(Some("item_name"), Some("asc"), &ALLOWED, "material_number", false);
        let active = sort.header("item_name", "品名", "");
        assert_eq!(active.href, "?sort_by=item_name&order=desc");
        assert_eq!(active.icon, " ▲");

        let other = sort.header("required_quantity", "需求數量", "process_type=%E5%89%8D");
        assert_eq!(other.href, "?sort_by=required_quantity&order=asc&process_type=%E5%89%8D");
        assert_eq!(other.icon, "");

        let sort = SortSpec::resolve(Some("item_name"), Some("desc"), &ALLOWED, "material_number", false);
        let active = sort.header("item_name", "品名", "");
        assert_eq!(active.href, "?sort_by=item_name&order=asc");
        assert_eq!(active.icon, " ▼");
    }

    #[test]
    fn test_query_string_skips_empty_values() {
        assert_eq!(query_string(&[("a", "1"), ("b", ""), ("c", "前段")]), "a=1&c=%E5%89%8D%E6%AE%B5");
    }
}
